//! Translation of [`GenerationSettings`] into the engine's native option set.
//!
//! The translation is a fixed table: each row names the engine option and how
//! to read it from the settings. Rows whose source field is absent are skipped,
//! so the engine keeps its built-in default for them. No range validation
//! happens here; out-of-range values surface later as engine errors.

use indexmap::IndexMap;
use serde::Serialize;

use crate::settings::GenerationSettings;

/// Engine option name for the total sequence length limit.
pub const MAX_LENGTH_OPTION: &str = "max_length";

/// A single engine search option value, stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOption {
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl SearchOption {
    /// Numeric view of the option, for engines that take doubles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SearchOption::Int(value) => Some(f64::from(*value)),
            SearchOption::Float(value) => Some(f64::from(*value)),
            SearchOption::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SearchOption::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

/// The engine's native option set for one run, in table order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EngineParams {
    options: IndexMap<&'static str, SearchOption>,
}

impl EngineParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an option under its engine name, replacing any previous value.
    pub fn set_search_option(&mut self, name: &'static str, value: SearchOption) {
        self.options.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<SearchOption> {
        self.options.get(name).copied()
    }

    /// The `max_length` option as a token count, if set to a non-negative integer.
    pub fn max_length(&self) -> Option<usize> {
        match self.get(MAX_LENGTH_OPTION) {
            Some(SearchOption::Int(value)) => usize::try_from(value).ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, SearchOption)> + '_ {
        self.options.iter().map(|(name, value)| (*name, *value))
    }
}

type Extract = fn(&GenerationSettings) -> Option<SearchOption>;

/// Settings field → engine option name. `num_beams` is deliberately absent.
const SEARCH_OPTION_TABLE: &[(&str, Extract)] = &[
    ("top_p", |s: &GenerationSettings| s.top_p.map(SearchOption::Float)),
    ("top_k", |s: &GenerationSettings| s.top_k.map(SearchOption::Int)),
    ("temperature", |s: &GenerationSettings| {
        s.temperature.map(SearchOption::Float)
    }),
    ("repetition_penalty", |s: &GenerationSettings| {
        s.repetition_penalty.map(SearchOption::Float)
    }),
    ("past_present_share_buffer", |s: &GenerationSettings| {
        s.past_present_share_buffer.map(SearchOption::Bool)
    }),
    ("num_return_sequences", |s: &GenerationSettings| {
        s.num_return_sequences.map(SearchOption::Int)
    }),
    ("no_repeat_ngram_size", |s: &GenerationSettings| {
        s.no_repeat_ngram_size.map(SearchOption::Int)
    }),
    ("min_length", |s: &GenerationSettings| {
        s.min_tokens.map(SearchOption::Int)
    }),
    (MAX_LENGTH_OPTION, |s: &GenerationSettings| {
        s.max_tokens.map(SearchOption::Int)
    }),
    ("length_penalty", |s: &GenerationSettings| {
        s.length_penalty.map(SearchOption::Float)
    }),
    ("early_stopping", |s: &GenerationSettings| {
        s.early_stopping.map(SearchOption::Bool)
    }),
    ("do_sample", |s: &GenerationSettings| s.do_sample.map(SearchOption::Bool)),
    ("diversity_penalty", |s: &GenerationSettings| {
        s.diversity_penalty.map(SearchOption::Float)
    }),
];

/// Translate caller settings into engine options.
pub fn map_settings(settings: &GenerationSettings) -> EngineParams {
    let mut params = EngineParams::new();
    for &(name, extract) in SEARCH_OPTION_TABLE {
        if let Some(value) = extract(settings) {
            params.set_search_option(name, value);
        }
    }

    if settings.num_beams.is_some() {
        tracing::debug!("num_beams is not supported by the engine option set; ignoring it");
    }
    if !settings.extra.is_empty() {
        tracing::debug!(
            "Ignoring unrecognised settings: {:?}",
            settings.extra.keys().collect::<Vec<_>>()
        );
    }

    params
}
