//! Results of a finished generation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why the decode loop stopped producing chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The engine reported done (end of sequence or length limit).
    EndOfSequence,
    /// The caller cancelled; observed at a step boundary.
    Cancelled,
}

/// Result of a blocking chat completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    /// Concatenated, shaped text. Also appended to the history as an assistant turn.
    pub text: String,
    /// Number of chunks (generated tokens) that made up `text`.
    pub chunk_count: usize,
    pub finish_reason: FinishReason,
    pub elapsed: Duration,
}

/// Result of a blocking raw-text generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCompletion {
    pub text: String,
    pub chunk_count: usize,
    pub finish_reason: FinishReason,
    pub elapsed: Duration,
}
