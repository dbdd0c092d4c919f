//! Configuration for embedding front-ends
//!
//! This module handles the table settings an embedding typically reads
//! from its own configuration file: geometry, sharing, and preload
//! behavior. Callback hooks are code, not configuration, and are supplied
//! to the factory directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Declarative description of one cache table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of concurrently held records. Rounded up to a power
    /// of two and to at least 64.
    pub capacity: u64,

    /// Bytes reserved for each record's value, padded to an 8-byte
    /// multiple (sizes up to 4 keep their natural width).
    pub value_size: u32,

    /// Join or create the shared instance registered under this name
    /// instead of creating a private table.
    #[serde(default)]
    pub share_name: Option<String>,

    /// Image to preload the table from.
    #[serde(default)]
    pub load_path: Option<PathBuf>,

    /// Fail hard if `load_path` cannot be read instead of starting empty,
    /// and skip the geometry check when joining a shared instance.
    #[serde(default)]
    pub readonly: bool,

    /// Run the eviction hook over every loaded record before serving, so
    /// externally owned resources referenced from cells get re-attached.
    #[serde(default)]
    pub scour_after_load: bool,

    /// Accept header-less legacy images when loading.
    #[serde(default)]
    pub allow_legacy_images: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 10_000,
            value_size: 8,
            share_name: None,
            load_path: None,
            readonly: false,
            scour_after_load: false,
            allow_legacy_images: false,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let config_str = std::fs::read_to_string(path)?;
    let config: CacheConfig = toml::from_str(&config_str)?;
    Ok(config)
}

/// Load configuration from a file or use defaults
pub fn load_config_or_default(path: Option<&str>) -> CacheConfig {
    match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                tracing::info!("loaded configuration from: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("failed to load config from {}: {}. using defaults", path, e);
                CacheConfig::default()
            }
        },
        None => {
            tracing::info!("no config file specified, using defaults");
            CacheConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            capacity = 4096
            value_size = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.value_size, 16);
        assert!(config.share_name.is_none());
        assert!(!config.readonly);
        assert!(!config.allow_legacy_images);
    }

    #[test]
    fn full_toml_roundtrips() {
        let config: CacheConfig = toml::from_str(
            r#"
            capacity = 256
            value_size = 8
            share_name = "flows"
            load_path = "/var/tmp/flows.img"
            readonly = true
            scour_after_load = true
            "#,
        )
        .unwrap();
        assert_eq!(config.share_name.as_deref(), Some("flows"));
        assert!(config.readonly);
        assert!(config.scour_after_load);
        let text = toml::to_string(&config).unwrap();
        let back: CacheConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.capacity, config.capacity);
        assert_eq!(back.share_name, config.share_name);
    }
}
