//! Configuration Loader
//!
//! Environment-aware configuration loading. Layers the base YAML file, an
//! optional per-environment override file, and `FLOWRELAY__` environment
//! variables with the `config` crate, then deserializes and validates.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde_json::Value;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::WorkerConfig;

/// Base configuration file name inside the configuration directory
pub const CONFIG_FILE_STEM: &str = "worker";

/// Environment variable selecting the environment override file
pub const ENVIRONMENT_VARIABLE: &str = "FLOWRELAY_ENV";

/// Environment variable pointing at the configuration directory
pub const CONFIG_DIR_VARIABLE: &str = "FLOWRELAY_CONFIG_DIR";

/// Prefix of per-key environment overrides (`FLOWRELAY__WORKER__CAPACITY=8`)
pub const ENV_OVERRIDE_PREFIX: &str = "FLOWRELAY";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: WorkerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let base_file = Self::find_config_file(&config_directory)?;
        let override_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"));

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let builder = Config::builder()
            .add_source(File::from(base_file.clone()).format(FileFormat::Yaml).required(true))
            .add_source(File::from(override_file).format(FileFormat::Yaml).required(false))
            .add_source(Self::environment_overrides());

        let config = Self::deserialize(builder, &base_file.display().to_string())?;
        Self::finish(config, environment, config_directory)
    }

    /// Load a single configuration file (plus environment variable overrides)
    pub fn load_from_file(path: &Path, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        if !path.is_file() {
            return Err(ConfigurationError::config_file_not_found(vec![
                path.to_path_buf()
            ]));
        }

        let builder = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(Self::environment_overrides());

        let config = Self::deserialize(builder, &path.display().to_string())?;
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::finish(config, environment, directory)
    }

    fn environment_overrides() -> Environment {
        Environment::with_prefix(ENV_OVERRIDE_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn deserialize(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        source_name: &str,
    ) -> ConfigResult<WorkerConfig> {
        builder
            .build()
            .and_then(|config| config.try_deserialize::<WorkerConfig>())
            .map_err(|e| ConfigurationError::parse_error(source_name, e))
    }

    fn finish(
        config: WorkerConfig,
        environment: &str,
        config_directory: PathBuf,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        // Use sanitized configuration for logging to avoid exposing key material
        let sanitized_config = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitized_config)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            identity = %config.worker.identity(),
            capacity = config.worker.capacity,
            workflows = config.workflows.len(),
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get sanitized configuration for debugging/logging that masks key material
    pub fn debug_config(&self) -> Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment from `FLOWRELAY_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_VARIABLE)
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var(CONFIG_DIR_VARIABLE)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let candidates = [
            config_directory.join(format!("{CONFIG_FILE_STEM}.yaml")),
            config_directory.join(format!("{CONFIG_FILE_STEM}.yml")),
        ];
        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| ConfigurationError::config_file_not_found(candidates.to_vec()))
    }

    /// Mask fields whose names look sensitive
    fn sanitize_config_for_logging(config: &WorkerConfig) -> Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(Value::Null);
        let sensitive_patterns = ["private_key", "secret", "token", "password"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut Value, sensitive_patterns: &[&str]) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if !is_sensitive {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                        continue;
                    }
                    *val = match val {
                        Value::String(s) if s.is_empty() => Value::String("[EMPTY]".to_string()),
                        Value::String(s) if s.len() > 4 && s.is_ascii() => Value::String(format!(
                            "[MASKED: {}***{}]",
                            &s[..2],
                            &s[s.len() - 2..]
                        )),
                        _ => Value::String("[MASKED]".to_string()),
                    };
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::generate_key_pair;
    use std::fs;
    use tempfile::TempDir;

    fn write_base_config(dir: &Path, extra: &str) {
        let worker = generate_key_pair();
        let dispatcher = generate_key_pair();
        let yaml = format!(
            "worker:\n  id: 2\n  capacity: 3\nchannel:\n  private_key: \"{}\"\n  dispatcher_public_key: \"{}\"\n{}",
            worker.private_key, dispatcher.public_key, extra
        );
        fs::write(dir.join("worker.yaml"), yaml).unwrap();
    }

    #[test]
    fn test_base_config_loads() {
        let dir = TempDir::new().unwrap();
        write_base_config(dir.path(), "");

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().worker.capacity, 3);
        assert_eq!(manager.config().worker.identity(), "Worker-2");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = TempDir::new().unwrap();
        write_base_config(dir.path(), "");
        fs::write(dir.path().join("worker.staging.yaml"), "worker:\n  capacity: 9\n").unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
                .unwrap();
        assert_eq!(manager.config().worker.capacity, 9);
        assert_eq!(manager.config().worker.id, 2);
    }

    #[test]
    fn test_missing_directory_reports_searched_paths() {
        let dir = TempDir::new().unwrap();
        let err = ConfigManager::load_from_directory_with_env(Some(dir.path().join("nope")), "test")
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_sanitized_config_masks_private_key() {
        let dir = TempDir::new().unwrap();
        write_base_config(dir.path(), "");
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        let private_key = manager.config().channel.private_key.clone();
        let sanitized = manager.debug_config();
        let masked = sanitized["channel"]["private_key"].as_str().unwrap();
        assert!(masked.starts_with("[MASKED"));
        assert!(!sanitized.to_string().contains(&private_key));
    }
}
