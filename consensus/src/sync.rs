//! Sync summaries
//!
//! Peers exchange the highest sequence number they hold per creator; the
//! other side answers with every event above those marks.

use crate::event::Event;
use crate::graph::Graph;
use hashweave_core::{NodeId, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest known sequence number per creator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSummary {
    known: BTreeMap<NodeId, Sequence>,
}

impl KnownSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the mark for `creator` to at least `seq`
    pub fn record(&mut self, creator: NodeId, seq: Sequence) {
        let entry = self.known.entry(creator).or_insert(seq);
        if *entry < seq {
            *entry = seq;
        }
    }

    pub fn get(&self, creator: &NodeId) -> Option<Sequence> {
        self.known.get(creator).copied()
    }

    /// True if the holder of this summary has `creator`'s event `seq`
    pub fn knows(&self, creator: &NodeId, seq: Sequence) -> bool {
        self.get(creator).map_or(false, |known| seq <= known)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Sequence)> {
        self.known.iter()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl FromIterator<(NodeId, Sequence)> for KnownSummary {
    fn from_iter<I: IntoIterator<Item = (NodeId, Sequence)>>(iter: I) -> Self {
        let mut summary = KnownSummary::new();
        for (creator, seq) in iter {
            summary.record(creator, seq);
        }
        summary
    }
}

impl Graph {
    /// Summary of this graph's contents
    pub fn known_summary(&self) -> KnownSummary {
        (0..self.participants().len())
            .filter_map(|creator| {
                self.last_sequence(creator)
                    .map(|seq| (self.participants().node_id(creator), seq))
            })
            .collect()
    }

    /// Events the holder of `summary` lacks, parents before children
    pub fn events_unknown_to(&self, summary: &KnownSummary) -> Vec<&Event> {
        let participants = self.participants();
        self.iter()
            .filter(|(_, node)| !summary.knows(&participants.node_id(node.creator()), node.seq()))
            .map(|(_, node)| node.event())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{child, graph_for, initial, keys};

    #[test]
    fn test_summary_record_keeps_max() {
        let creator = NodeId::from_bytes([1u8; 32]);
        let mut summary = KnownSummary::new();
        summary.record(creator, 4);
        summary.record(creator, 2);

        assert_eq!(summary.get(&creator), Some(4));
        assert!(summary.knows(&creator, 4));
        assert!(!summary.knows(&creator, 5));
        assert!(!summary.knows(&NodeId::from_bytes([2u8; 32]), 0));
    }

    #[test]
    fn test_events_unknown_to_peer() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let c0 = initial(&keys[2], 0);
        let a1 = child(&keys[0], &a0, &b0, 1);
        let b1 = child(&keys[1], &b0, &a1, 2);
        for e in [&a0, &b0, &c0, &a1, &b1] {
            graph.insert(e.clone()).unwrap();
        }

        let local = graph.known_summary();
        assert_eq!(local.get(&keys[0].node_id()), Some(1));
        assert_eq!(local.get(&keys[2].node_id()), Some(0));
        assert!(graph.events_unknown_to(&local).is_empty());

        // Peer holds a0 and b0 only
        let peer: KnownSummary = vec![(keys[0].node_id(), 0), (keys[1].node_id(), 0)]
            .into_iter()
            .collect();
        let missing: Vec<_> = graph
            .events_unknown_to(&peer)
            .into_iter()
            .map(|e| e.hash())
            .collect();
        assert_eq!(missing, vec![c0.hash(), a1.hash(), b1.hash()]);

        // An empty summary receives everything in insertion order
        let everything = graph.events_unknown_to(&KnownSummary::new());
        assert_eq!(everything.len(), 5);
        assert_eq!(everything[0].hash(), a0.hash());
    }
}
