//! # Chat Core
//!
//! Generation orchestration for a local language model. The engine itself
//! (tokenizer, weights, sampling) sits behind [`engine::InferenceEngine`];
//! this crate turns a conversation or raw prompt plus sampling settings into
//! an incrementally produced, cancellable text stream.
//!
//! Pipeline, leaves first:
//!
//! - [`mapper`] translates [`GenerationSettings`] into engine options
//! - [`prompt`] renders a [`ConversationHistory`] into one prompt string
//! - [`decode`] drives the step-by-step decode loop on a bounded worker pool
//! - [`shaper`] strips the tokenizer's leading space from the first chunk
//! - [`service`] presents blocking and streaming completions
//!
//! ```ignore
//! use chat_core::{GenerationService, GenerationSettings, ModelOptions};
//!
//! let service = GenerationService::new(engine, &ModelOptions::load(None)?)?;
//! let mut history = ConversationHistory::new();
//! history.add_user_message("2+2?");
//! let reply = service
//!     .generate(&mut history, &GenerationSettings::new().with_max_tokens(5), cancel)
//!     .await?;
//! ```

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod metadata;
pub mod prompt;
pub mod service;
pub mod settings;
pub mod shaper;
pub mod types;

pub use config::ModelOptions;
pub use decode::{ChunkPosition, DecodeLoop, DecodeStream, StepPool, TextChunk};
pub use engine::{
    EncodedSequence, EngineError, GenerationSession, InferenceEngine, RecordedEngine,
    RecordedExchange, RecordedFixture, TokenId,
};
pub use error::GenerationError;
pub use mapper::{map_settings, EngineParams, SearchOption};
pub use metadata::ServiceMetadata;
pub use prompt::assemble;
pub use service::{ChatStream, GenerationService};
pub use settings::GenerationSettings;
pub use shaper::{shape, ShapedStream};
pub use types::{
    AuthorRole, ChatCompletion, ConversationHistory, ConversationTurn, FinishReason, RequestId,
    TextCompletion,
};
