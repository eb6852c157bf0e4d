//! Sampling settings supplied by a caller for one generation request.
//!
//! Every knob is optional. A present value means "override the engine default
//! for this run"; an absent one leaves the engine default untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::GenerationError;

/// Partial set of sampling options for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Informational model identifier carried by generic execution settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// Top k tokens to sample from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,

    /// Top p probability to sample with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Temperature to sample with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Repetition penalty to sample with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,

    /// Past/present kv tensors are shared and allocated once to max_length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub past_present_share_buffer: Option<bool>,

    /// Number of independently computed returned sequences per batch element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_return_sequences: Option<i32>,

    /// Number of beams for beam search. Accepted but never forwarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_beams: Option<i32>,

    /// No repeated ngram of this size in the output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_repeat_ngram_size: Option<i32>,

    /// Min number of tokens to generate, including the prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_tokens: Option<i32>,

    /// Max number of tokens to generate, including the prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,

    /// Length penalty applied to generated sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_penalty: Option<f32>,

    /// Penalty for common words between beam groups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_penalty: Option<f32>,

    /// Stop early once all beam candidates reach the end token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_stopping: Option<bool>,

    /// Do random sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,

    /// Keys the engine does not recognise. Kept for round-tripping, never
    /// forwarded to the engine.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl GenerationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a generic settings object into typed settings.
    ///
    /// `null` yields empty settings. Recognised keys must carry values of the
    /// right JSON type; unknown keys land in [`GenerationSettings::extra`].
    pub fn from_json(value: Value) -> Result<Self, GenerationError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| {
            GenerationError::InvalidArgument(format!("Invalid generation settings: {}", e))
        })
    }

    /// Set max_tokens using builder pattern
    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature using builder pattern
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top_p using builder pattern
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set top_k using builder pattern
    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set do_sample using builder pattern
    pub fn with_do_sample(mut self, do_sample: bool) -> Self {
        self.do_sample = Some(do_sample);
        self
    }
}
