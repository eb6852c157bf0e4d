//! Recorded engine for fixture playback
//!
//! Plays back pre-recorded token streams instead of running a model, so the
//! whole orchestration pipeline can be exercised quickly and deterministically.
//! Exchanges are consumed in order, one per [`InferenceEngine::encode`] call.
//!
//! ```json
//! {
//!   "exchanges": [
//!     { "prompt": "<|user|>\n2+2?<|end|>\n<|assistant|>", "tokens": [" 4", "."] },
//!     { "tokens": ["Hi"], "fail_at_step": 1 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use super::{EncodedSequence, EngineError, GenerationSession, InferenceEngine, TokenId};
use crate::error::GenerationError;
use crate::mapper::EngineParams;

/// A single recorded request/response exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedExchange {
    /// Expected prompt. When present, `encode` rejects any other prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Decoded text of each generated token, in order.
    pub tokens: Vec<String>,
    /// Make this 0-based step fail with an engine error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_at_step: Option<usize>,
    /// Make prompt encoding fail for this exchange.
    #[serde(default)]
    pub fail_on_encode: bool,
}

impl RecordedExchange {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn for_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn failing_at_step(mut self, step: usize) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    pub fn failing_on_encode(mut self) -> Self {
        self.fail_on_encode = true;
        self
    }
}

/// Recorded engine fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFixture {
    pub exchanges: Vec<RecordedExchange>,
}

impl RecordedFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange(mut self, exchange: RecordedExchange) -> Self {
        self.exchanges.push(exchange);
        self
    }
}

/// Maps token text to ids and back. Ids are handed out in first-seen order.
#[derive(Debug, Default)]
struct Vocabulary {
    texts: Vec<String>,
    ids: HashMap<String, TokenId>,
}

impl Vocabulary {
    fn intern(&mut self, text: &str) -> TokenId {
        if let Some(id) = self.ids.get(text) {
            return *id;
        }
        let id = self.texts.len() as TokenId;
        self.texts.push(text.to_string());
        self.ids.insert(text.to_string(), id);
        id
    }

    fn text(&self, id: TokenId) -> Option<&str> {
        self.texts.get(id as usize).map(String::as_str)
    }
}

/// Usage counters, shared with every session the engine opens.
#[derive(Debug, Default)]
struct EngineCounters {
    sessions_opened: AtomicUsize,
    sessions_released: AtomicUsize,
    steps_taken: AtomicUsize,
}

/// An encoded prompt waiting for its session, tagged with its exchange.
#[derive(Debug)]
struct PendingExchange {
    prompt_tokens: Vec<TokenId>,
    exchange: usize,
}

/// Engine that plays back a [`RecordedFixture`].
///
/// Every successful [`encode`](InferenceEngine::encode) queues its exchange
/// until a [`new_session`](InferenceEngine::new_session) for the same tokens
/// claims it, so each encode must be followed by exactly one `new_session`.
/// [`DecodeLoop`](crate::decode::DecodeLoop) always makes both calls in one
/// worker job. An encoded prompt that is never opened stays queued until the
/// engine is dropped; see [`pending_sessions`](Self::pending_sessions).
#[derive(Debug)]
pub struct RecordedEngine {
    fixture: RecordedFixture,
    next_exchange: Mutex<usize>,
    pending: Mutex<VecDeque<PendingExchange>>,
    vocabulary: Arc<Mutex<Vocabulary>>,
    counters: Arc<EngineCounters>,
    last_params: Mutex<Option<EngineParams>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordedEngine {
    pub fn new(fixture: RecordedFixture) -> Self {
        Self {
            fixture,
            next_exchange: Mutex::new(0),
            pending: Mutex::new(VecDeque::new()),
            vocabulary: Arc::new(Mutex::new(Vocabulary::default())),
            counters: Arc::new(EngineCounters::default()),
            last_params: Mutex::new(None),
        }
    }

    /// Load a recorded fixture from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenerationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GenerationError::InvalidArgument(format!(
                "Failed to read fixture at {}: {}",
                path.display(),
                e
            ))
        })?;
        let fixture: RecordedFixture = serde_json::from_str(&content).map_err(|e| {
            GenerationError::InvalidArgument(format!(
                "Failed to parse fixture JSON at {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!(
            "Loaded recorded fixture with {} exchanges from {}",
            fixture.exchanges.len(),
            path.display()
        );
        Ok(Self::new(fixture))
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_released(&self) -> usize {
        self.counters.sessions_released.load(Ordering::SeqCst)
    }

    /// Encoded prompts still waiting for their session.
    pub fn pending_sessions(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn steps_taken(&self) -> usize {
        self.counters.steps_taken.load(Ordering::SeqCst)
    }

    /// Engine options applied to the most recently opened session.
    pub fn last_params(&self) -> Option<EngineParams> {
        lock(&self.last_params).clone()
    }

    /// Take the next exchange index, or fail if the fixture is used up.
    fn take_next_exchange(&self) -> Result<usize, EngineError> {
        let mut idx = lock(&self.next_exchange);
        if *idx >= self.fixture.exchanges.len() {
            return Err(EngineError::FixtureExhausted {
                attempted: *idx + 1,
                recorded: self.fixture.exchanges.len(),
            });
        }
        let exchange = *idx;
        *idx += 1;
        Ok(exchange)
    }
}

impl InferenceEngine for RecordedEngine {
    fn encode(&self, text: &str) -> Result<EncodedSequence, EngineError> {
        let index = self.take_next_exchange()?;
        let exchange = &self.fixture.exchanges[index];

        if exchange.fail_on_encode {
            return Err(EngineError::Tokenization(format!(
                "recorded encode failure for exchange {}",
                index + 1
            )));
        }
        if let Some(expected) = &exchange.prompt {
            if expected != text {
                return Err(EngineError::Tokenization(format!(
                    "prompt does not match recorded exchange {}: expected {:?}, got {:?}",
                    index + 1,
                    expected,
                    text
                )));
            }
        }

        let prompt_tokens: Vec<TokenId> = {
            let mut vocabulary = lock(&self.vocabulary);
            text.split_whitespace()
                .map(|word| vocabulary.intern(word))
                .collect()
        };
        trace!(
            "Encoded prompt into {} tokens for exchange {}",
            prompt_tokens.len(),
            index + 1
        );

        lock(&self.pending).push_back(PendingExchange {
            prompt_tokens: prompt_tokens.clone(),
            exchange: index,
        });
        Ok(EncodedSequence::new(prompt_tokens))
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, EngineError> {
        let vocabulary = lock(&self.vocabulary);
        tokens
            .iter()
            .map(|id| {
                vocabulary
                    .text(*id)
                    .ok_or_else(|| EngineError::Decode(format!("unknown token id {}", id)))
            })
            .collect()
    }

    fn new_session(
        &self,
        prompt: EncodedSequence,
        params: &EngineParams,
    ) -> Result<Box<dyn GenerationSession>, EngineError> {
        let pending = {
            let mut pending = lock(&self.pending);
            let position = pending
                .iter()
                .position(|entry| entry.prompt_tokens == prompt.tokens())
                .ok_or_else(|| {
                    EngineError::SessionCreation(
                        "no recorded exchange was encoded for this prompt".to_string(),
                    )
                })?;
            pending.remove(position).ok_or_else(|| {
                EngineError::SessionCreation("pending exchange disappeared".to_string())
            })?
        };
        let exchange = &self.fixture.exchanges[pending.exchange];

        let generated: VecDeque<TokenId> = {
            let mut vocabulary = lock(&self.vocabulary);
            exchange
                .tokens
                .iter()
                .map(|text| vocabulary.intern(text))
                .collect()
        };

        *lock(&self.last_params) = Some(params.clone());
        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Opened recorded session for exchange {} ({} tokens recorded)",
            pending.exchange + 1,
            generated.len()
        );

        Ok(Box::new(RecordedSession {
            sequence: prompt.into_tokens(),
            generated,
            max_length: params.max_length(),
            fail_at_step: exchange.fail_at_step,
            steps: 0,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Per-request playback state.
struct RecordedSession {
    sequence: Vec<TokenId>,
    generated: VecDeque<TokenId>,
    max_length: Option<usize>,
    fail_at_step: Option<usize>,
    steps: usize,
    counters: Arc<EngineCounters>,
}

impl GenerationSession for RecordedSession {
    fn is_done(&self) -> bool {
        // max_length counts the prompt too
        self.generated.is_empty()
            || self
                .max_length
                .is_some_and(|max_length| self.sequence.len() >= max_length)
    }

    fn step(&mut self) -> Result<(), EngineError> {
        if self.fail_at_step == Some(self.steps) {
            return Err(EngineError::Step(format!(
                "recorded failure at step {}",
                self.steps
            )));
        }
        let token = self
            .generated
            .pop_front()
            .ok_or_else(|| EngineError::Step("no recorded tokens left".to_string()))?;
        self.sequence.push(token);
        self.steps += 1;
        self.counters.steps_taken.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sequence(&self, batch_index: usize) -> Result<&[TokenId], EngineError> {
        if batch_index != 0 {
            return Err(EngineError::InvalidSequence(format!(
                "recorded sessions have a single sequence, got batch index {}",
                batch_index
            )));
        }
        Ok(&self.sequence)
    }

    fn release(&mut self) {
        self.counters.sessions_released.fetch_add(1, Ordering::SeqCst);
    }
}
