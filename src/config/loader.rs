//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mtd-shuffler/config.json";

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: {} hosts, pool={}, policy={}",
        config.hosts.len(),
        config.pool.range,
        config.shuffle.policy
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `MTD_LOG_LEVEL`: Override log level
/// - `MTD_SHUFFLE_POLICY`: Override shuffle policy (`uniform` or `priority`)
/// - `MTD_POOL_RANGE`: Override virtual address pool (CIDR)
/// - `MTD_DNS_RESOLVER`: Override resolver address; empty disables scoping
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides from `lookup` (normally the process environment) and
/// re-validate
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparsable values, or a validation
/// error if the result is invalid.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(level) = lookup("MTD_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(policy) = lookup("MTD_SHUFFLE_POLICY") {
        config.shuffle.policy = policy.parse().map_err(|reason| ConfigError::EnvError {
            name: "MTD_SHUFFLE_POLICY".into(),
            reason,
        })?;
        debug!("Shuffle policy overridden to {}", config.shuffle.policy);
    }

    if let Some(range) = lookup("MTD_POOL_RANGE") {
        config.pool.range = range.parse().map_err(|_| ConfigError::EnvError {
            name: "MTD_POOL_RANGE".into(),
            reason: format!("Invalid CIDR range: {range}"),
        })?;
        debug!("Pool range overridden to {}", config.pool.range);
    }

    if let Some(resolver) = lookup("MTD_DNS_RESOLVER") {
        config.dns.resolver_address = if resolver.is_empty() {
            None
        } else {
            Some(resolver.parse().map_err(|_| ConfigError::EnvError {
                name: "MTD_DNS_RESOLVER".into(),
                reason: format!("Invalid IPv4 address: {resolver}"),
            })?)
        };
        debug!("DNS resolver overridden to {:?}", config.dns.resolver_address);
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
