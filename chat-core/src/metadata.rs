//! Typed identity of the loaded model.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ModelOptions;
use crate::error::GenerationError;

/// Model identifier and on-disk location, fixed for the service's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceMetadata {
    model_id: String,
    model_path: PathBuf,
}

impl ServiceMetadata {
    /// Both values are required; empty ones are rejected.
    pub fn new(
        model_id: impl Into<String>,
        model_path: impl Into<PathBuf>,
    ) -> Result<Self, GenerationError> {
        let model_id = model_id.into();
        let model_path = model_path.into();

        if model_id.trim().is_empty() {
            return Err(GenerationError::invalid_argument(
                "model_id",
                "cannot be empty",
            ));
        }
        if model_path.as_os_str().is_empty() {
            return Err(GenerationError::invalid_argument(
                "model_path",
                "cannot be empty",
            ));
        }

        Ok(Self {
            model_id,
            model_path,
        })
    }

    pub fn from_options(options: &ModelOptions) -> Result<Self, GenerationError> {
        Self::new(options.model_id.clone(), options.model_path.clone())
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}
