//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use hashweave_core::{HashweaveError, HashweaveResult, NodeConfig};
use hashweave_crypto::keys::KeyPair;
use hashweave_state::{create_memory_store, PersistentConsensusStore, SharedConsensusStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Open the store the configuration asks for
pub fn open_store(config: &NodeConfig) -> HashweaveResult<SharedConsensusStore> {
    if !config.storage.persistent {
        return Ok(create_memory_store());
    }
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| HashweaveError::StorageError(format!("{}: {}", config.data_dir.display(), e)))?;
    let path = config.data_dir.join(&config.storage.db_name);
    info!("Opening store at {}", path.display());
    Ok(Arc::new(PersistentConsensusStore::open(path)?))
}

/// Full HASHWEAVE node
pub struct HashweaveNode {
    config: NodeConfig,
    keypair: KeyPair,
}

impl HashweaveNode {
    /// Create a new node
    pub fn new(config: NodeConfig, keypair: KeyPair) -> Self {
        Self { config, keypair }
    }

    /// Run the node until ctrl-c
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting HASHWEAVE node {}...", self.config.name);

        let store = open_store(&self.config)?;
        let (runtime, runtime_handle) =
            NodeRuntime::start(&self.config, self.keypair.clone(), store).await?;

        let api_handle = if self.config.api.enabled {
            let api_runtime = runtime.clone();
            let api_addr = self.config.api.listen_addr.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                    error!("API server error: {}", e);
                }
            }))
        } else {
            None
        };

        info!("Node started successfully");
        info!("Node ID: {}", runtime.node_id().to_hex());
        info!("Participant: {}", runtime.is_participant());

        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        if let Some(handle) = api_handle {
            handle.abort();
        }
        runtime.shutdown().await?;
        runtime_handle.await?;

        info!("Node stopped, {} events finalized", runtime.log().len());

        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<KeyPair>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.data_dir = dir;
        self
    }

    /// Keep events and finalized order in memory only
    pub fn in_memory(mut self) -> Self {
        self.config.storage.persistent = false;
        self
    }

    pub fn build(self) -> HashweaveNode {
        let keypair = self.keypair.unwrap_or_else(KeyPair::generate);
        HashweaveNode::new(self.config, keypair)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashweave_state::ConsensusStore;

    #[test]
    fn test_builder() {
        let keypair = KeyPair::from_seed(&[5u8; 32]);
        let node = NodeBuilder::new()
            .keypair(keypair.clone())
            .api_addr("127.0.0.1:9999")
            .data_dir(PathBuf::from("/tmp/hashweave-test"))
            .in_memory()
            .build();

        assert_eq!(node.keypair().public_key(), keypair.public_key());
        assert_eq!(node.config().api.listen_addr, "127.0.0.1:9999");
        assert!(!node.config().storage.persistent);
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = NodeBuilder::new().in_memory().build().config().clone();
        let store = open_store(&config).unwrap();
        assert_eq!(store.event_count().await.unwrap(), 0);
    }
}
