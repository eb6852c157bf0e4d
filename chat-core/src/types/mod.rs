//! Core data types shared by the generation pipeline.

pub mod completion;
pub mod ids;
pub mod messages;

pub use completion::{ChatCompletion, FinishReason, TextCompletion};
pub use ids::RequestId;
pub use messages::{AuthorRole, ConversationHistory, ConversationTurn};
