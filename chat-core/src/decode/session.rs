//! Scoped ownership of a generation session.

use crate::engine::{EngineError, GenerationSession, TokenId};

/// Owns a [`GenerationSession`] and releases it exactly once when dropped.
///
/// The guard travels with the session between the async caller and the step
/// workers, so release runs on every exit path: normal completion, engine
/// error, cancellation, a dropped stream, or a panicking worker.
pub struct ActiveSession {
    inner: Box<dyn GenerationSession>,
}

impl ActiveSession {
    pub fn new(inner: Box<dyn GenerationSession>) -> Self {
        Self { inner }
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    pub fn step(&mut self) -> Result<(), EngineError> {
        self.inner.step()
    }

    /// The token appended by the most recent step: exactly the last token of
    /// sequence 0, never more.
    pub fn newest_token(&self) -> Result<TokenId, EngineError> {
        let sequence = self.inner.sequence(0)?;
        sequence.last().copied().ok_or_else(|| {
            EngineError::InvalidSequence("output sequence is empty after a step".to_string())
        })
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("is_done", &self.inner.is_done())
            .finish()
    }
}
