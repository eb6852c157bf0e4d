//! Model options loaded at startup.
//!
//! Sources, later overriding earlier:
//! 1. built-in defaults
//! 2. an optional YAML, TOML or JSON file (format picked by extension)
//! 3. environment variables prefixed `CHAT_MODEL_`, e.g. `CHAT_MODEL_MAX_LENGTH=512`

use chat_common::config::ValidatedConfig;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::GenerationError;

/// Environment variable prefix for model options.
pub const ENV_PREFIX: &str = "CHAT_MODEL_";

/// Total sequence length used when a request does not set `max_tokens`.
pub const DEFAULT_MAX_LENGTH: u32 = 2048;

pub const DEFAULT_MODEL_ID: &str = "local-model";

/// Startup options for the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    pub model_id: String,
    pub model_path: PathBuf,
    /// Default `max_length` for requests that omit `max_tokens`
    pub max_length: u32,
    /// Upper bound on decode steps running at once across all sessions
    pub step_workers: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_path: PathBuf::new(),
            max_length: DEFAULT_MAX_LENGTH,
            step_workers: num_cpus::get().max(1),
        }
    }
}

impl ModelOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Default::default()
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_step_workers(mut self, step_workers: usize) -> Self {
        self.step_workers = step_workers;
        self
    }

    /// Load options from defaults, `config_file` (if given) and the environment,
    /// then validate them.
    pub fn load(config_file: Option<&Path>) -> Result<Self, GenerationError> {
        let options = Self::extract(config_file)?;
        options.validate()?;
        Ok(options)
    }

    /// Like [`ModelOptions::load`] but without validation, for callers that
    /// fill in missing values before validating.
    pub fn extract(config_file: Option<&Path>) -> Result<Self, GenerationError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ModelOptions::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Self::file_provider(path)?);
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().into()));

        let options: ModelOptions = figment
            .extract()
            .map_err(|e| GenerationError::Config(e.to_string()))?;

        debug!(
            "Loaded model options: model_id={}, max_length={}, step_workers={}",
            options.model_id, options.max_length, options.step_workers
        );
        Ok(options)
    }

    fn file_provider(path: &Path) -> Result<Figment, GenerationError> {
        if !path.is_file() {
            return Err(GenerationError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        trace!("Loading model options from {}", path.display());

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml") | Some("yml") => Ok(Figment::from(Yaml::file(path))),
            Some("toml") => Ok(Figment::from(Toml::file(path))),
            Some("json") => Ok(Figment::from(Json::file(path))),
            _ => Err(GenerationError::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }
}

impl ValidatedConfig for ModelOptions {
    type Error = GenerationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.model_id.trim().is_empty() {
            return Err(GenerationError::invalid_argument(
                "model_id",
                "cannot be empty",
            ));
        }
        if self.model_path.as_os_str().is_empty() {
            return Err(GenerationError::invalid_argument(
                "model_path",
                "cannot be empty",
            ));
        }
        if self.max_length == 0 {
            return Err(GenerationError::invalid_argument(
                "max_length",
                "must be greater than 0",
            ));
        }
        if self.step_workers == 0 {
            return Err(GenerationError::invalid_argument(
                "step_workers",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    fn description() -> &'static str {
        "Model identity, default length limit and decode step concurrency"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn clear_env() {
        for key in ["MODEL_ID", "MODEL_PATH", "MAX_LENGTH", "STEP_WORKERS"] {
            std::env::remove_var(format!("{}{}", ENV_PREFIX, key));
        }
    }

    #[test]
    fn test_defaults() {
        let options = ModelOptions::default();
        assert_eq!(options.model_id, "local-model");
        assert_eq!(options.max_length, 2048);
        assert!(options.step_workers >= 1);
    }

    #[test]
    fn test_default_without_path_is_invalid() {
        assert!(matches!(
            ModelOptions::default().validate(),
            Err(GenerationError::InvalidArgument(_))
        ));
        assert!(ModelOptions::new("/models/phi-3").validate().is_ok());
    }

    #[test]
    fn test_zero_limits_are_invalid() {
        assert!(ModelOptions::new("/m").with_max_length(0).validate().is_err());
        assert!(ModelOptions::new("/m").with_step_workers(0).validate().is_err());
        assert!(ModelOptions::new("/m").with_model_id("").validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_yaml_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.yaml");
        fs::write(&path, "model_path: /models/phi-3\nmax_length: 512\n").unwrap();

        let options = ModelOptions::load(Some(&path)).unwrap();
        assert_eq!(options.model_path, PathBuf::from("/models/phi-3"));
        assert_eq!(options.max_length, 512);
        assert_eq!(options.model_id, "local-model");
    }

    #[test]
    #[serial]
    fn test_load_toml_and_json_files() {
        clear_env();
        let dir = TempDir::new().unwrap();

        let toml = dir.path().join("model.toml");
        fs::write(&toml, "model_path = \"/m\"\nmodel_id = \"phi\"\n").unwrap();
        assert_eq!(ModelOptions::load(Some(&toml)).unwrap().model_id, "phi");

        let json = dir.path().join("model.json");
        fs::write(&json, r#"{"model_path": "/m", "step_workers": 3}"#).unwrap();
        assert_eq!(ModelOptions::load(Some(&json)).unwrap().step_workers, 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.yaml");
        fs::write(&path, "model_path: /models/phi-3\nmax_length: 512\n").unwrap();

        std::env::set_var("CHAT_MODEL_MAX_LENGTH", "64");
        let result = ModelOptions::load(Some(&path));
        clear_env();

        assert_eq!(result.unwrap().max_length, 64);
    }

    #[test]
    #[serial]
    fn test_missing_path_fails_validation() {
        clear_env();
        let err = ModelOptions::load(None).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidArgument(_)));

        let unvalidated = ModelOptions::extract(None).unwrap();
        assert!(unvalidated.model_path.as_os_str().is_empty());
    }

    #[test]
    #[serial]
    fn test_bad_file_inputs() {
        clear_env();
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            ModelOptions::load(Some(&missing)),
            Err(GenerationError::Config(_))
        ));

        let ini = dir.path().join("model.ini");
        fs::write(&ini, "model_path=/m").unwrap();
        assert!(matches!(
            ModelOptions::load(Some(&ini)),
            Err(GenerationError::Config(_))
        ));

        let bad_type = dir.path().join("model.yaml");
        fs::write(&bad_type, "model_path: /m\nmax_length: lots\n").unwrap();
        assert!(matches!(
            ModelOptions::load(Some(&bad_type)),
            Err(GenerationError::Config(_))
        ));
    }
}
