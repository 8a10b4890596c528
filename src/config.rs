//! Relay configuration.
//!
//! Everything has a default, so an empty YAML document (or an empty
//! environment) gives a working relay.

use crate::{crypto::keystore::KeyStoreParams, error::Result};
use serde_derive::{Deserialize, Serialize};
use std::env;

/// How (and how often) roots get pushed to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::CopyGetters, getset::Setters)]
#[getset(get_copy = "pub", set = "pub")]
#[serde(default)]
pub struct PublisherConfig {
    /// Seconds between refreshes of the ledger's view of the last root.
    interval_secs: u64,
    /// First retry delay after a failed publish.
    retry_base_ms: u64,
    /// Retry delays double up to this.
    retry_max_ms: u64,
    /// How long a single publish may take before it counts as failed.
    timeout_secs: u64,
    /// How many published roots to remember.
    history: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            retry_base_ms: 500,
            retry_max_ms: 30_000,
            timeout_secs: 10,
            history: 64,
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters, getset::Setters)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum levels of every claim tree.
    #[getset(get_copy = "pub", set = "pub")]
    tree_depth: usize,
    #[getset(get = "pub", set = "pub")]
    publisher: PublisherConfig,
    /// Seconds between sweeps of expired nonces.
    #[getset(get_copy = "pub", set = "pub")]
    nonce_sweep_secs: u64,
    /// How old a published root may be and still anchor a proof.
    #[getset(get_copy = "pub", set = "pub")]
    max_root_age_secs: u64,
    #[getset(get_copy = "pub", set = "pub")]
    keystore: KeyStoreParams,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tree_depth: 140,
            publisher: PublisherConfig::default(),
            nonce_sweep_secs: 30,
            max_root_age_secs: 3600,
            keystore: KeyStoreParams::default(),
        }
    }
}

impl RelayConfig {
    /// Load from a YAML document. Missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from `RELAY_*` environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        fn parse_or<T: std::str::FromStr>(val: Option<String>, default: T) -> T {
            val.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        }
        let mut config = Self::default();
        config.tree_depth = parse_or(lookup("RELAY_TREE_DEPTH"), config.tree_depth);
        config.publisher.interval_secs = parse_or(lookup("RELAY_PUBLISH_INTERVAL"), config.publisher.interval_secs);
        config.nonce_sweep_secs = parse_or(lookup("RELAY_NONCE_SWEEP"), config.nonce_sweep_secs);
        config.max_root_age_secs = parse_or(lookup("RELAY_MAX_ROOT_AGE"), config.max_root_age_secs);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_fills_in_defaults() {
        let config = RelayConfig::from_yaml("tree_depth: 64\npublisher:\n  interval_secs: 5\n").unwrap();
        assert_eq!(config.tree_depth(), 64);
        assert_eq!(config.publisher().interval_secs(), 5);
        assert_eq!(config.publisher().retry_base_ms(), 500);
        assert_eq!(config.max_root_age_secs(), 3600);

        let config = RelayConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RelayConfig::default());

        let config = RelayConfig::from_yaml("keystore:\n  ops: 1\n  mem: 4096\n").unwrap();
        assert_eq!(config.keystore(), KeyStoreParams::new(1, 4096));

        assert!(RelayConfig::from_yaml("tree_depth: [1, 2]").is_err());
    }

    #[test]
    fn env_overrides() {
        let vars = HashMap::from([
            ("RELAY_TREE_DEPTH", "32"),
            ("RELAY_PUBLISH_INTERVAL", " 7 "),
            ("RELAY_NONCE_SWEEP", "not a number"),
        ]);
        let config = RelayConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.tree_depth(), 32);
        assert_eq!(config.publisher().interval_secs(), 7);
        assert_eq!(config.nonce_sweep_secs(), 30);
        assert_eq!(config.max_root_age_secs(), 3600);
    }
}
