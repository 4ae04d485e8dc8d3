//! Storage trait and shared helpers

use async_trait::async_trait;
use hashweave_consensus::ConsensusRecord;
use hashweave_core::{HashweaveError, HashweaveResult};
use std::sync::Arc;

/// Append-only store for raw events and finalized records
#[async_trait]
pub trait ConsensusStore: Send + Sync {
    /// Append a raw event; returns its position in the event log
    async fn append_event(&self, raw: &[u8]) -> HashweaveResult<u64>;

    /// Every stored raw event, in insertion order
    async fn events(&self) -> HashweaveResult<Vec<Vec<u8>>>;

    async fn event_count(&self) -> HashweaveResult<u64>;

    /// Append finalized records. Indices must continue the stored order.
    async fn append_records(&self, records: &[ConsensusRecord]) -> HashweaveResult<()>;

    /// Up to `limit` records starting at consensus index `from`
    async fn records_from(&self, from: u64, limit: usize) -> HashweaveResult<Vec<ConsensusRecord>>;

    async fn record_count(&self) -> HashweaveResult<u64>;

    /// Make everything appended so far durable
    async fn flush(&self) -> HashweaveResult<()> {
        Ok(())
    }
}

/// Shared store handle
pub type SharedConsensusStore = Arc<dyn ConsensusStore>;

/// Reject records that would leave a gap or overwrite the stored order
pub fn check_continuity(next: u64, records: &[ConsensusRecord]) -> HashweaveResult<()> {
    for (offset, record) in records.iter().enumerate() {
        let expected = next + offset as u64;
        if record.index != expected {
            return Err(HashweaveError::StorageError(format!(
                "record index {} does not continue stored order at {}",
                record.index, expected
            )));
        }
    }
    Ok(())
}

/// Sled-friendly key: big-endian so byte order matches numeric order
pub fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hashweave_core::{Hash, NodeId, Timestamp};

    pub(crate) fn record(index: u64) -> ConsensusRecord {
        ConsensusRecord {
            index,
            hash: Hash::from_bytes([index as u8; 32]),
            creator: NodeId::from_bytes([7u8; 32]),
            round_received: index / 4,
            timestamp: Timestamp::from_millis(1_000 + index),
            transactions: vec![format!("tx{}", index).into_bytes()],
        }
    }

    #[test]
    fn test_check_continuity() {
        assert!(check_continuity(0, &[record(0), record(1)]).is_ok());
        assert!(check_continuity(2, &[record(2)]).is_ok());
        assert!(check_continuity(1, &[record(2)]).is_err());
        assert!(check_continuity(0, &[record(0), record(2)]).is_err());
        assert!(check_continuity(5, &[]).is_ok());
    }

    #[test]
    fn test_index_key_orders_numerically() {
        assert!(index_key(255) < index_key(256));
        assert!(index_key(1) < index_key(1 << 40));
    }
}
