use crate::aggregation::{AggregationConfig, DEFAULT_MAX_BATCH_SIZE};
use crate::crypto::Address;
use crate::error::{CustodyError, CustodyResult};
use crate::events::DEFAULT_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CustodyConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub aggregation: AggregationSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_db_path() -> String {
    "./data/custody".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AggregationSection {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub aggregator_id: Address,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_chain_id() -> u64 {
    1
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            aggregator_id: Address::ZERO,
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl From<&AggregationSection> for AggregationConfig {
    fn from(section: &AggregationSection) -> Self {
        AggregationConfig {
            chain_id: section.chain_id,
            aggregator_id: section.aggregator_id,
            max_batch_size: section.max_batch_size,
        }
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            aggregation: AggregationSection::default(),
        }
    }
}

impl CustodyConfig {
    pub fn from_toml(s: &str) -> CustodyResult<Self> {
        let config: CustodyConfig = toml::from_str(s).map_err(|e| CustodyError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> CustodyResult<()> {
        if self.aggregation.max_batch_size == 0 {
            return Err(CustodyError::Config("max_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load the config at `path`, writing the defaults there if it is missing
    pub fn load_or_default(path: &str) -> CustodyResult<Self> {
        if Path::new(path).exists() {
            let s = std::fs::read_to_string(path).map_err(|e| CustodyError::Config(e.to_string()))?;
            Self::from_toml(&s)
        } else {
            let config = Self::default();
            let s = toml::to_string_pretty(&config).map_err(|e| CustodyError::Config(e.to_string()))?;
            std::fs::write(path, s).map_err(|e| CustodyError::Config(e.to_string()))?;
            Ok(config)
        }
    }

    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig::from(&self.aggregation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = CustodyConfig::from_toml(
            r#"
            [aggregation]
            chain_id = 31337
            "#,
        )
        .unwrap();
        assert_eq!(config.aggregation.chain_id, 31337);
        assert_eq!(config.aggregation.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.node, NodeConfig::default());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = CustodyConfig::from_toml("[aggregation]\nmax_batch_size = 0\n").unwrap_err();
        assert!(matches!(err, CustodyError::Config(_)));
    }

    #[test]
    fn test_load_or_default_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.toml");
        let path = path.to_str().unwrap();

        let written = CustodyConfig::load_or_default(path).unwrap();
        assert_eq!(written, CustodyConfig::default());
        assert!(Path::new(path).exists());

        let reloaded = CustodyConfig::load_or_default(path).unwrap();
        assert_eq!(reloaded, written);
    }
}
