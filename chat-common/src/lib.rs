//! # Chat Common
//!
//! Shared types, traits, and utilities for the local chat workspace.
//! Error categorisation, validated configuration, and logging helpers live
//! here so the core library and the CLI report things the same way.

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;

// Re-export main traits for convenience
pub use async_utils::cancel_after;
pub use config::{DefaultConfig, ValidatedConfig};
pub use error::{CategorizedError, ErrorCategory};
pub use logging::{init_tracing, Pretty};
