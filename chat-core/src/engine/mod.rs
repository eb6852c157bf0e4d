//! # Inference engine capability
//!
//! The orchestration core never tokenizes, runs the model, or samples by
//! itself. Everything model-specific sits behind two traits:
//!
//! - [`InferenceEngine`] - the shared, long-lived model + tokenizer. One
//!   instance serves every request and must be safe for concurrent read-only
//!   use (`Send + Sync`).
//! - [`GenerationSession`] - the per-request generator state. Exactly one
//!   decode loop owns a session; it is moved between the async caller and the
//!   step workers but never shared.
//!
//! Sessions release their engine resources through [`GenerationSession::release`],
//! which the decode loop calls exactly once on every exit path (see
//! `crate::decode::ActiveSession`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapper::EngineParams;

pub mod recorded;

pub use recorded::{RecordedEngine, RecordedExchange, RecordedFixture};

/// Opaque token identifier produced by the engine's tokenizer.
pub type TokenId = u32;

/// Engine-produced token sequence for one prompt.
///
/// Created at request start and handed to [`InferenceEngine::new_session`],
/// which takes ownership; it is never reused across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSequence {
    tokens: Vec<TokenId>,
}

impl EncodedSequence {
    pub fn new(tokens: Vec<TokenId>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn into_tokens(self) -> Vec<TokenId> {
        self.tokens
    }
}

/// Errors raised by an inference engine.
///
/// These cover malformed prompts, context-window overflow, and device or
/// resource exhaustion. The core never retries them; they are surfaced to the
/// caller as `GenerationError::GenerationFailed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Failed to tokenize the prompt.
    #[error("Failed to tokenize prompt: {0}")]
    Tokenization(String),

    /// Failed to create the per-request generator.
    #[error("Failed to create generation session: {0}")]
    SessionCreation(String),

    /// A decode step (compute distribution + select next token) failed.
    #[error("Decode step failed: {0}")]
    Step(String),

    /// Failed to turn token ids back into text.
    #[error("Token decoding failed: {0}")]
    Decode(String),

    /// The session's output sequence was not in the expected shape.
    #[error("Invalid output sequence: {0}")]
    InvalidSequence(String),

    /// A recorded engine ran out of recorded exchanges.
    #[error("Recorded fixture exhausted: attempted exchange {attempted} but only {recorded} recorded")]
    FixtureExhausted { attempted: usize, recorded: usize },
}

impl EngineError {
    /// Create a new tokenization error from a source error.
    pub fn tokenization<E: std::error::Error>(err: E) -> Self {
        Self::Tokenization(err.to_string())
    }

    /// Create a new session creation error from a source error.
    pub fn session_creation<E: std::error::Error>(err: E) -> Self {
        Self::SessionCreation(err.to_string())
    }

    /// Create a new step error from a source error.
    pub fn step<E: std::error::Error>(err: E) -> Self {
        Self::Step(err.to_string())
    }

    /// Create a new decoding error from a source error.
    pub fn decoding<E: std::error::Error>(err: E) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Shared model + tokenizer capability.
pub trait InferenceEngine: Send + Sync {
    /// Encode a prompt string into the engine's token sequence.
    fn encode(&self, text: &str) -> Result<EncodedSequence, EngineError>;

    /// Decode a token slice back into text. The decode loop always passes a
    /// single-token slice.
    fn decode(&self, tokens: &[TokenId]) -> Result<String, EngineError>;

    /// Open a generator bound to the shared model for one request, applying
    /// the translated sampling options.
    fn new_session(
        &self,
        prompt: EncodedSequence,
        params: &EngineParams,
    ) -> Result<Box<dyn GenerationSession>, EngineError>;
}

/// Per-request generator state.
///
/// Not `Sync`: a session is only ever touched by one decode step at a time.
pub trait GenerationSession: Send {
    /// Whether the engine has finished (end of sequence or length limit).
    fn is_done(&self) -> bool;

    /// Advance one decoding step: compute the next-token distribution and
    /// append the selected token to the running output sequence.
    fn step(&mut self) -> Result<(), EngineError>;

    /// The running output sequence (prompt plus generated tokens) for the
    /// given batch index.
    fn sequence(&self, batch_index: usize) -> Result<&[TokenId], EngineError>;

    /// Release engine resources held by this session. Called exactly once by
    /// the session guard; implementations must not rely on being dropped
    /// afterwards in any particular thread.
    fn release(&mut self) {}
}
