//! Consensus ordering
//!
//! Rounds are decided strictly in sequence. Deciding a round assigns
//! round-received, consensus timestamp and consensus index to every pending
//! event that all of the round's unique famous witnesses see.

use crate::graph::{EventId, Fame, Graph};
use crate::output::ConsensusRecord;
use crate::round::RoundTable;
use hashweave_core::{Hash, Round, Timestamp};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Tracks not-yet-ordered events and the next round to decide
#[derive(Debug, Default)]
pub struct Orderer {
    /// Unordered events, in insertion order
    pending: Vec<EventId>,
    next_round: Round,
    next_index: u64,
}

impl Orderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, id: EventId) {
        self.pending.push(id);
    }

    /// First round that is not decided yet
    pub fn next_round(&self) -> Round {
        self.next_round
    }

    /// Number of events ordered so far
    pub fn ordered(&self) -> u64 {
        self.next_index
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Decide every round whose witnesses all have a fame decision and
    /// return the newly ordered events.
    pub fn advance(&mut self, graph: &mut Graph, rounds: &mut RoundTable) -> Vec<ConsensusRecord> {
        let mut records = Vec::new();

        while (self.next_round as usize) < rounds.len() {
            let round = self.next_round;
            let witnesses = rounds.witnesses(round);
            if !witnesses
                .iter()
                .all(|&w| graph.node(w).fame().is_decided())
            {
                break;
            }

            let famous = unique_famous(graph, witnesses);
            let whitener = famous.iter().fold(Hash::ZERO, |acc, &w| {
                let signature = graph.node(w).event().signature;
                let mut prefix = [0u8; 32];
                prefix.copy_from_slice(&signature.as_bytes()[..32]);
                acc.xor(&Hash::from_bytes(prefix))
            });
            rounds.mark_decided(round, famous.clone(), whitener);
            self.next_round += 1;

            if famous.is_empty() {
                warn!("Round {} decided without unique famous witnesses", round);
                continue;
            }

            let mut received = Vec::new();
            let mut still_pending = Vec::with_capacity(self.pending.len());
            for &x in &self.pending {
                let node = graph.node(x);
                if node.round() <= round && famous.iter().all(|&w| graph.sees(w, x)) {
                    let timestamp = median_timestamp(graph, &famous, x);
                    received.push((timestamp, node.hash().xor(&whitener), x));
                } else {
                    still_pending.push(x);
                }
            }
            self.pending = still_pending;
            received.sort();

            let batch = received.len();
            for (timestamp, _, x) in received {
                let index = self.next_index;
                self.next_index += 1;

                let node = graph.node_mut(x);
                node.round_received = Some(round);
                node.consensus_timestamp = Some(timestamp);
                node.consensus_index = Some(index);

                records.push(ConsensusRecord {
                    index,
                    hash: node.hash(),
                    creator: node.event().creator_id(),
                    round_received: round,
                    timestamp,
                    transactions: node.event().transactions().to_vec(),
                });
            }

            info!(
                "Round {} decided: {} famous witnesses, {} events ordered, {} total",
                round,
                famous.len(),
                batch,
                self.next_index
            );
        }

        records
    }
}

/// Famous witnesses of a round, minus creators with more than one
fn unique_famous(graph: &Graph, witnesses: &[EventId]) -> Vec<EventId> {
    let mut by_creator: BTreeMap<usize, Vec<EventId>> = BTreeMap::new();
    for &w in witnesses {
        if graph.node(w).fame() == Fame::Famous {
            by_creator.entry(graph.node(w).creator()).or_default().push(w);
        }
    }
    by_creator
        .into_values()
        .filter(|ws| ws.len() == 1)
        .map(|ws| ws[0])
        .collect()
}

/// Upper median over the famous witnesses of the time each first learned of `x`
fn median_timestamp(graph: &Graph, famous: &[EventId], x: EventId) -> Timestamp {
    let mut stamps: Vec<Timestamp> = famous
        .iter()
        .map(|&w| {
            // Earliest self-ancestor of w that still has x as an ancestor
            let mut earliest = w;
            while let Some(parent) = graph.node(earliest).self_parent() {
                if !graph.is_ancestor(parent, x) {
                    break;
                }
                earliest = parent;
            }
            graph.node(earliest).timestamp()
        })
        .collect();
    stamps.sort();
    stamps[stamps.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{child, graph_for, initial, keys};

    #[test]
    fn test_median_timestamp_uses_first_descendant() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let c0 = initial(&keys[2], 0);
        // b learns of a0 at 5, c at 7, a itself at 0
        let b1 = child(&keys[1], &b0, &a0, 5);
        let b2 = child(&keys[1], &b1, &c0, 20);
        let c1 = child(&keys[2], &c0, &b1, 7);
        for e in [&a0, &b0, &c0, &b1, &b2, &c1] {
            graph.insert(e.clone()).unwrap();
        }
        let id = |e: &crate::event::Event| graph.lookup(&e.hash()).unwrap();

        let famous = vec![id(&a0), id(&b2), id(&c1)];
        // Sorted [0, 5, 7], upper median
        assert_eq!(median_timestamp(&graph, &famous, id(&a0)), Timestamp::from_millis(5));
    }

    #[test]
    fn test_unique_famous_drops_duplicate_creators() {
        let keys = keys(2);
        let mut graph = graph_for(&keys);
        let a0 = graph.insert(initial(&keys[0], 0)).unwrap().id;
        let a0_fork = graph.insert(initial(&keys[0], 1)).unwrap().id;
        let b0 = graph.insert(initial(&keys[1], 0)).unwrap().id;
        for id in [a0, a0_fork, b0] {
            graph.set_fame(id, true);
        }

        assert_eq!(unique_famous(&graph, &[a0, a0_fork, b0]), vec![b0]);
    }
}
