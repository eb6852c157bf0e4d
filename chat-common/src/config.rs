//! Configuration trait for validated, consistent configuration across crates

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for configuration types that can be validated and have defaults
pub trait ValidatedConfig:
    Send + Sync + Clone + Debug + Serialize + for<'de> Deserialize<'de>
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate the configuration, returning an error if invalid
    fn validate(&self) -> Result<(), Self::Error>;

    /// Get a description of what this configuration controls
    fn description() -> &'static str;
}

/// Helper trait for configurations that can be created with sensible defaults
pub trait DefaultConfig: ValidatedConfig + Default {
    /// Create a validated default configuration
    fn validated_default() -> Result<Self, Self::Error> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }
}

impl<T> DefaultConfig for T where T: ValidatedConfig + Default {}
