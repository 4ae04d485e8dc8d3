//! Finalized consensus output
//!
//! [`ConsensusLog`] is the append-only total order. It is cheap to clone and
//! can be read from any thread while the consensus writer appends to it.

use hashweave_core::{EventHash, Hash, NodeId, Round, Timestamp};
use hashweave_crypto::hashing::hash_multiple;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One event in the total order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    /// Position in the total order, starting at 0
    pub index: u64,
    pub hash: EventHash,
    pub creator: NodeId,
    pub round_received: Round,
    pub timestamp: Timestamp,
    pub transactions: Vec<Vec<u8>>,
}

#[derive(Default)]
struct LogInner {
    records: Vec<Arc<ConsensusRecord>>,
    digest: Hash,
}

/// Shared append-only consensus log
#[derive(Clone, Default)]
pub struct ConsensusLog {
    inner: Arc<RwLock<LogInner>>,
}

impl ConsensusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized batch. Indices must continue the log.
    pub(crate) fn append(&self, batch: Vec<ConsensusRecord>) {
        let mut inner = self.inner.write();
        for record in batch {
            debug_assert_eq!(record.index, inner.records.len() as u64);
            inner.digest = hash_multiple(&[
                inner.digest.as_bytes(),
                record.hash.as_bytes(),
                &record.index.to_le_bytes(),
            ]);
            inner.records.push(Arc::new(record));
        }
    }

    pub fn len(&self) -> u64 {
        self.inner.read().records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<Arc<ConsensusRecord>> {
        self.inner.read().records.get(index as usize).cloned()
    }

    pub fn last(&self) -> Option<Arc<ConsensusRecord>> {
        self.inner.read().records.last().cloned()
    }

    /// Up to `limit` records starting at `from`
    pub fn range(&self, from: u64, limit: usize) -> Vec<Arc<ConsensusRecord>> {
        let inner = self.inner.read();
        inner
            .records
            .iter()
            .skip(from as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Running digest over every `(hash, index)` appended so far.
    ///
    /// Two nodes with equal log lengths agree on the order iff their digests match.
    pub fn digest(&self) -> Hash {
        self.inner.read().digest
    }

    /// Lazy reader starting at `from`
    pub fn cursor(&self, from: u64) -> ConsensusCursor {
        ConsensusCursor {
            log: self.clone(),
            next: from,
        }
    }
}

/// Resumable reader over a [`ConsensusLog`].
///
/// Returns `None` when it catches up with the writer and yields again once
/// more records are appended.
pub struct ConsensusCursor {
    log: ConsensusLog,
    next: u64,
}

impl ConsensusCursor {
    /// Index of the next record to be returned
    pub fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for ConsensusCursor {
    type Item = Arc<ConsensusRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.log.get(self.next)?;
        self.next += 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u64) -> ConsensusRecord {
        ConsensusRecord {
            index,
            hash: Hash::from_bytes([index as u8; 32]),
            creator: NodeId::from_bytes([1u8; 32]),
            round_received: 1,
            timestamp: Timestamp::from_millis(index * 10),
            transactions: vec![vec![index as u8]],
        }
    }

    #[test]
    fn test_cursor_resumes_after_append() {
        let log = ConsensusLog::new();
        log.append(vec![record(0), record(1)]);

        let mut cursor = log.cursor(0);
        assert_eq!(cursor.next().unwrap().index, 0);
        assert_eq!(cursor.next().unwrap().index, 1);
        assert!(cursor.next().is_none());

        log.append(vec![record(2)]);
        assert_eq!(cursor.next().unwrap().index, 2);
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_cursor_from_any_index() {
        let log = ConsensusLog::new();
        log.append((0..5).map(record).collect());

        let indices: Vec<u64> = log.cursor(3).map(|r| r.index).collect();
        assert_eq!(indices, vec![3, 4]);
        assert_eq!(log.cursor(9).next(), None);
    }

    #[test]
    fn test_digest_tracks_order() {
        let a = ConsensusLog::new();
        let b = ConsensusLog::new();
        a.append(vec![record(0), record(1)]);
        b.append(vec![record(0)]);
        assert_ne!(a.digest(), b.digest());

        b.append(vec![record(1)]);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_clones_share_records() {
        let log = ConsensusLog::new();
        let reader = log.clone();
        log.append(vec![record(0)]);

        assert_eq!(reader.len(), 1);
        assert_eq!(reader.last().unwrap().index, 0);
        assert_eq!(reader.range(0, 10).len(), 1);
    }
}
