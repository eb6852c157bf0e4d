//! Error types for generation orchestration.

use chat_common::error::{CategorizedError, ErrorCategory};
use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by the generation service and decode loop.
///
/// Cancellation is deliberately absent: it is a normal early termination and
/// is reported through `FinishReason::Cancelled`.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A required input was missing or empty. Raised at startup, not per request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine failed while encoding, opening the session, or stepping.
    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] EngineError),

    /// The step worker pool could not run a decode step.
    #[error("Step worker failed: {0}")]
    WorkerFailed(String),

    /// Model options could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GenerationError {
    /// Create an invalid argument error naming the offending input.
    pub fn invalid_argument(name: &str, reason: &str) -> Self {
        Self::InvalidArgument(format!("{} {}", name, reason))
    }

    /// The engine error behind a `GenerationFailed`, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            GenerationError::GenerationFailed(cause) => Some(cause),
            _ => None,
        }
    }
}

impl CategorizedError for GenerationError {
    fn category(&self) -> ErrorCategory {
        match self {
            GenerationError::InvalidArgument(_) => ErrorCategory::User,
            GenerationError::Config(_) => ErrorCategory::User,
            GenerationError::GenerationFailed(EngineError::FixtureExhausted { .. }) => {
                ErrorCategory::External
            }
            GenerationError::GenerationFailed(_) => ErrorCategory::System,
            GenerationError::WorkerFailed(_) => ErrorCategory::Internal,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            GenerationError::InvalidArgument(_) => "GENERATION_INVALID_ARGUMENT",
            GenerationError::GenerationFailed(_) => "GENERATION_FAILED",
            GenerationError::WorkerFailed(_) => "GENERATION_WORKER",
            GenerationError::Config(_) => "GENERATION_CONFIG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_engine_failure_keeps_cause() {
        let err = GenerationError::from(EngineError::Step("out of memory".to_string()));

        assert!(matches!(err, GenerationError::GenerationFailed(_)));
        assert_eq!(
            err.engine_error(),
            Some(&EngineError::Step("out of memory".to_string()))
        );
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "Generation failed: Decode step failed: out of memory"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            GenerationError::invalid_argument("model_path", "cannot be empty").category(),
            ErrorCategory::User
        );
        assert_eq!(
            GenerationError::from(EngineError::Tokenization("bad".into())).category(),
            ErrorCategory::System
        );
        assert_eq!(
            GenerationError::from(EngineError::FixtureExhausted {
                attempted: 2,
                recorded: 1
            })
            .category(),
            ErrorCategory::External
        );
        assert_eq!(
            GenerationError::WorkerFailed("panic".into()).error_code(),
            "GENERATION_WORKER"
        );
    }

    #[test]
    fn test_invalid_argument_message() {
        let err = GenerationError::invalid_argument("model_id", "cannot be empty");
        assert_eq!(err.to_string(), "Invalid argument: model_id cannot be empty");
        assert!(err.engine_error().is_none());
    }
}
