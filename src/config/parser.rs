use crate::config::types::RunConfig;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Parses a TOML configuration string without validating it
pub fn parse_config(content: &str) -> Result<RunConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads, parses and validates a configuration file
///
/// Validation warnings are logged and do not fail the load.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use harrow::config::load_config;
///
/// let config = load_config(Path::new("harrow.toml")).unwrap();
/// println!("{} sources", config.sources.len());
/// ```
pub fn load_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;

    for warning in validate(&config).into_result()? {
        tracing::warn!("{}", warning);
    }

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Recorded in run metadata so two runs can be checked for identical inputs.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_config_str(&content))
}

/// Hex-encoded SHA-256 of an in-memory configuration
pub fn hash_config_str(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(RunConfig, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
