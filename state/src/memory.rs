//! In-memory store for testing and ephemeral nodes

use async_trait::async_trait;
use dashmap::DashMap;
use hashweave_consensus::ConsensusRecord;
use hashweave_core::HashweaveResult;
use parking_lot::RwLock;

use std::sync::Arc;

use crate::store::{check_continuity, ConsensusStore, SharedConsensusStore};

/// In-memory consensus store
pub struct MemoryConsensusStore {
    events: DashMap<u64, Vec<u8>>,
    records: DashMap<u64, ConsensusRecord>,
    event_count: RwLock<u64>,
    record_count: RwLock<u64>,
}

impl MemoryConsensusStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            records: DashMap::new(),
            event_count: RwLock::new(0),
            record_count: RwLock::new(0),
        }
    }
}

impl Default for MemoryConsensusStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shared in-memory store
pub fn create_memory_store() -> SharedConsensusStore {
    Arc::new(MemoryConsensusStore::new())
}

#[async_trait]
impl ConsensusStore for MemoryConsensusStore {
    async fn append_event(&self, raw: &[u8]) -> HashweaveResult<u64> {
        let mut count = self.event_count.write();
        let index = *count;
        self.events.insert(index, raw.to_vec());
        *count += 1;
        Ok(index)
    }

    async fn events(&self) -> HashweaveResult<Vec<Vec<u8>>> {
        let count = *self.event_count.read();
        Ok((0..count)
            .filter_map(|i| self.events.get(&i).map(|raw| raw.value().clone()))
            .collect())
    }

    async fn event_count(&self) -> HashweaveResult<u64> {
        Ok(*self.event_count.read())
    }

    async fn append_records(&self, records: &[ConsensusRecord]) -> HashweaveResult<()> {
        let mut count = self.record_count.write();
        check_continuity(*count, records)?;
        for record in records {
            self.records.insert(record.index, record.clone());
        }
        *count += records.len() as u64;
        Ok(())
    }

    async fn records_from(&self, from: u64, limit: usize) -> HashweaveResult<Vec<ConsensusRecord>> {
        let count = *self.record_count.read();
        Ok((from..count)
            .take(limit)
            .filter_map(|i| self.records.get(&i).map(|r| r.value().clone()))
            .collect())
    }

    async fn record_count(&self) -> HashweaveResult<u64> {
        Ok(*self.record_count.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;

    #[tokio::test]
    async fn test_memory_store_events() {
        let store = MemoryConsensusStore::new();

        assert_eq!(store.append_event(b"first").await.unwrap(), 0);
        assert_eq!(store.append_event(b"second").await.unwrap(), 1);

        assert_eq!(store.event_count().await.unwrap(), 2);
        assert_eq!(
            store.events().await.unwrap(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_memory_store_records() {
        let store = MemoryConsensusStore::new();

        store.append_records(&[record(0), record(1), record(2)]).await.unwrap();
        assert_eq!(store.record_count().await.unwrap(), 3);

        let tail = store.records_from(1, 10).await.unwrap();
        assert_eq!(tail, vec![record(1), record(2)]);
        assert_eq!(store.records_from(0, 1).await.unwrap(), vec![record(0)]);
        assert!(store.records_from(7, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_gap() {
        let store = MemoryConsensusStore::new();
        store.append_records(&[record(0)]).await.unwrap();

        assert!(store.append_records(&[record(2)]).await.is_err());
        assert_eq!(store.record_count().await.unwrap(), 1);
    }
}
