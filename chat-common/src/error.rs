//! Shared error categorisation for consistent handling across crates

use std::fmt::Debug;

/// Category of error for consistent handling and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User input or configuration error - can be fixed by user
    User,
    /// Engine or environmental error - resources, device, context window
    System,
    /// Internal logic error - indicates a bug
    Internal,
    /// External collaborator error - fixtures, files, services
    External,
}

impl ErrorCategory {
    /// Short lowercase label used in structured log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::User => "user",
            ErrorCategory::System => "system",
            ErrorCategory::Internal => "internal",
            ErrorCategory::External => "external",
        }
    }
}

/// Trait for all errors in the chat workspace
///
/// Every error type surfaced to a caller implements this so the CLI (or any
/// other front end) can pick an exit code and a message without matching on
/// concrete variants.
pub trait CategorizedError: std::error::Error + Send + Sync + Debug {
    /// Get the error category for proper handling
    fn category(&self) -> ErrorCategory;

    /// Get a unique error code for this error type
    fn error_code(&self) -> &'static str;

    /// Check if this is a user-correctable error
    fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Get a user-friendly error message with actionable advice
    fn user_friendly_message(&self) -> String {
        let hint = match self.category() {
            ErrorCategory::User => "Check the model options and request parameters.",
            ErrorCategory::System => {
                "The inference engine rejected the request; check prompt length and available resources."
            }
            ErrorCategory::External => "Check that the referenced files exist and are readable.",
            ErrorCategory::Internal => "This appears to be a bug. Please report it with the error details.",
        };
        format!("{} [{}]\n💡 {}", self, self.error_code(), hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum SampleError {
        #[error("missing model path")]
        MissingPath,
        #[error("decode step failed")]
        Step,
    }

    impl CategorizedError for SampleError {
        fn category(&self) -> ErrorCategory {
            match self {
                SampleError::MissingPath => ErrorCategory::User,
                SampleError::Step => ErrorCategory::System,
            }
        }

        fn error_code(&self) -> &'static str {
            match self {
                SampleError::MissingPath => "SAMPLE_MISSING_PATH",
                SampleError::Step => "SAMPLE_STEP",
            }
        }
    }

    #[test]
    fn test_error_categories() {
        assert!(SampleError::MissingPath.is_user_error());
        assert!(!SampleError::Step.is_user_error());
        assert_eq!(SampleError::Step.category().as_str(), "system");
    }

    #[test]
    fn test_user_friendly_message_includes_code_and_hint() {
        let message = SampleError::MissingPath.user_friendly_message();
        assert!(message.contains("missing model path"));
        assert!(message.contains("SAMPLE_MISSING_PATH"));
        assert!(message.contains("💡"));
    }
}
