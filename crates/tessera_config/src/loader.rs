//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::EngineConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "tessera.toml";

/// Loads and validates a `tessera.toml` configuration from a directory.
///
/// Reads `<dir>/tessera.toml`, parses it, and validates its values.
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `tessera.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and numeric limits are usable.
///
/// Dataset identity is not checked here; the cache layer reports a missing
/// identity when a cache root is requested.
fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.cache.base_dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("cache.base_dir".to_string()));
    }
    if config.cache.storage_backend.is_empty() {
        return Err(ConfigError::MissingField(
            "cache.storage_backend".to_string(),
        ));
    }
    let positive = [
        ("hashing.max_job_bytes", config.hashing.max_job_bytes),
        ("hashing.num_cores", config.hashing.num_cores as u64),
        ("hashing.block_size", config.hashing.block_size as u64),
        ("sync.batch_max_objects", config.sync.batch_max_objects as u64),
        ("sync.batch_max_bytes", config.sync.batch_max_bytes),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{field} must be > 0"
            )));
        }
    }
    Ok(())
}
