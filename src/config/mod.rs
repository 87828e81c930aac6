//! Configuration module for mtd-shuffler
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use mtd_shuffler::config::{load_config, Config};
//!
//! let config = load_config("/etc/mtd-shuffler/config.json").unwrap();
//! println!("Protecting {} hosts", config.hosts.len());
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env, DEFAULT_CONFIG_PATH,
};
pub use types::{
    Config, DiagnosticsConfig, DnsConfig, HostConfig, LogConfig, PoolConfig, ShuffleConfig,
    ShufflePolicyKind,
};
