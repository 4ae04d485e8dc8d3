//! Configuration types for HASHWEAVE

use crate::error::HashweaveError;
use crate::traits::HashweaveResult;
use crate::types::Weight;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Consensus configuration
    pub consensus: ConsensusConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Fixed participant set
    pub participants: Vec<ParticipantConfig>,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "hashweave-node".to_string(),
            data_dir: PathBuf::from("./data"),
            consensus: ConsensusConfig::default(),
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            participants: vec![],
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &str) -> HashweaveResult<Self> {
        let config: NodeConfig = serde_json::from_str(json)
            .map_err(|e| HashweaveError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> HashweaveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> HashweaveResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HashweaveError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> HashweaveResult<()> {
        self.consensus.validate()?;
        for participant in &self.participants {
            if participant.weight == 0 {
                return Err(HashweaveError::ConfigError(format!(
                    "participant {} has zero weight",
                    participant.public_key
                )));
            }
        }
        Ok(())
    }
}

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Every n-th voting round of a fame election is a coin round
    pub coin_round_frequency: u64,

    /// Upper bound on events held while waiting for their parents
    pub max_deferred_events: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            coin_round_frequency: 10,
            max_deferred_events: 10_000,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> HashweaveResult<()> {
        if self.coin_round_frequency < 2 {
            return Err(HashweaveError::ConfigError(
                "coin_round_frequency must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

/// Participant entry: hex-encoded Ed25519 public key and voting weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub public_key: String,
    #[serde(default = "default_weight")]
    pub weight: Weight,
}

fn default_weight() -> Weight {
    1
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist events and finalized order under `data_dir`
    pub persistent: bool,

    /// Database directory name inside `data_dir`
    pub db_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            db_name: "consensus.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_coin_frequency_validation() {
        let config = ConsensusConfig {
            coin_round_frequency: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = NodeConfig::default();
        config.participants.push(ParticipantConfig {
            public_key: "00".repeat(32),
            weight: 3,
        });
        let json = config.to_json().unwrap();
        let parsed = NodeConfig::from_json(&json).unwrap();
        assert_eq!(parsed.participants, config.participants);
        assert_eq!(parsed.consensus.coin_round_frequency, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed = NodeConfig::from_json(r#"{"name": "alpha", "participants": [{"public_key": "ab"}]}"#)
            .unwrap();
        assert_eq!(parsed.name, "alpha");
        assert_eq!(parsed.participants[0].weight, 1);
        assert_eq!(parsed.api.listen_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_zero_weight_rejected() {
        let json = r#"{"participants": [{"public_key": "ab", "weight": 0}]}"#;
        assert!(NodeConfig::from_json(json).is_err());
    }
}
