//! Persistent store using sled database

use async_trait::async_trait;
use hashweave_consensus::ConsensusRecord;
use hashweave_core::{HashweaveError, HashweaveResult};
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::store::{check_continuity, index_key, ConsensusStore};

const EVENTS_TREE: &str = "events";
const RECORDS_TREE: &str = "records";

fn storage_error(e: sled::Error) -> HashweaveError {
    HashweaveError::StorageError(e.to_string())
}

/// Next free index of a tree keyed by `index_key`
fn next_index(tree: &Tree) -> HashweaveResult<u64> {
    match tree.last().map_err(storage_error)? {
        Some((key, _)) => {
            let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                HashweaveError::StorageError("corrupt index key".into())
            })?;
            Ok(u64::from_be_bytes(bytes) + 1)
        }
        None => Ok(0),
    }
}

/// Consensus store backed by sled database
pub struct PersistentConsensusStore {
    db: Db,
    events: Tree,
    records: Tree,
    event_count: RwLock<u64>,
    record_count: RwLock<u64>,
}

impl PersistentConsensusStore {
    pub fn open<P: AsRef<Path>>(path: P) -> HashweaveResult<Self> {
        let db = sled::open(path).map_err(storage_error)?;
        let events = db.open_tree(EVENTS_TREE).map_err(storage_error)?;
        let records = db.open_tree(RECORDS_TREE).map_err(storage_error)?;

        let event_count = next_index(&events)?;
        let record_count = next_index(&records)?;
        debug!(
            "Opened store with {} events and {} records",
            event_count, record_count
        );

        Ok(Self {
            db,
            events,
            records,
            event_count: RwLock::new(event_count),
            record_count: RwLock::new(record_count),
        })
    }
}

#[async_trait]
impl ConsensusStore for PersistentConsensusStore {
    async fn append_event(&self, raw: &[u8]) -> HashweaveResult<u64> {
        let mut count = self.event_count.write();
        let index = *count;
        self.events
            .insert(index_key(index), raw)
            .map_err(storage_error)?;
        *count += 1;
        Ok(index)
    }

    async fn events(&self) -> HashweaveResult<Vec<Vec<u8>>> {
        self.events
            .iter()
            .values()
            .map(|v| v.map(|raw| raw.to_vec()).map_err(storage_error))
            .collect()
    }

    async fn event_count(&self) -> HashweaveResult<u64> {
        Ok(*self.event_count.read())
    }

    async fn append_records(&self, records: &[ConsensusRecord]) -> HashweaveResult<()> {
        let mut count = self.record_count.write();
        check_continuity(*count, records)?;

        let mut batch = sled::Batch::default();
        for record in records {
            let bytes = bincode::serialize(record)
                .map_err(|e| HashweaveError::SerializationError(e.to_string()))?;
            batch.insert(index_key(record.index).to_vec(), bytes);
        }
        self.records.apply_batch(batch).map_err(storage_error)?;

        *count += records.len() as u64;
        Ok(())
    }

    async fn records_from(&self, from: u64, limit: usize) -> HashweaveResult<Vec<ConsensusRecord>> {
        self.records
            .range(index_key(from)..)
            .values()
            .take(limit)
            .map(|v| {
                let bytes = v.map_err(storage_error)?;
                bincode::deserialize(&bytes)
                    .map_err(|e| HashweaveError::DeserializationError(e.to_string()))
            })
            .collect()
    }

    async fn record_count(&self) -> HashweaveResult<u64> {
        Ok(*self.record_count.read())
    }

    async fn flush(&self) -> HashweaveResult<()> {
        self.db.flush_async().await.map_err(storage_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persistent_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = PersistentConsensusStore::open(dir.path()).unwrap();

        store.append_event(b"a").await.unwrap();
        store.append_event(b"b").await.unwrap();
        store.append_records(&[record(0), record(1)]).await.unwrap();

        assert_eq!(store.events().await.unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(store.records_from(1, 5).await.unwrap(), vec![record(1)]);
        assert_eq!(store.record_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persistent_store_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = PersistentConsensusStore::open(dir.path()).unwrap();
            for i in 0..300u32 {
                store.append_event(&i.to_be_bytes()).await.unwrap();
            }
            store.append_records(&[record(0)]).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = PersistentConsensusStore::open(dir.path()).unwrap();
        assert_eq!(store.event_count().await.unwrap(), 300);
        assert_eq!(store.record_count().await.unwrap(), 1);

        let events = store.events().await.unwrap();
        assert_eq!(events[256], 256u32.to_be_bytes().to_vec());

        assert_eq!(store.append_event(b"next").await.unwrap(), 300);
        assert!(store.append_records(&[record(0)]).await.is_err());
        store.append_records(&[record(1)]).await.unwrap();
    }
}
