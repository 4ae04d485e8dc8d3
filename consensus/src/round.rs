//! Round and witness assignment

use crate::graph::{EventId, Graph};
use hashweave_core::{Hash, Round};
use std::collections::BTreeSet;

/// Witnesses of one round and, once decided, its famous set
#[derive(Debug, Clone, Default)]
pub struct RoundInfo {
    witnesses: Vec<EventId>,
    decided: bool,
    famous: Vec<EventId>,
    whitener: Hash,
}

impl RoundInfo {
    /// Witnesses in insertion order
    pub fn witnesses(&self) -> &[EventId] {
        &self.witnesses
    }

    pub fn is_decided(&self) -> bool {
        self.decided
    }

    /// Unique famous witnesses, empty until decided
    pub fn famous(&self) -> &[EventId] {
        &self.famous
    }

    /// XOR of the famous witnesses' signatures
    pub fn whitener(&self) -> Hash {
        self.whitener
    }
}

/// Per-round witness table
#[derive(Debug, Default)]
pub struct RoundTable {
    rounds: Vec<RoundInfo>,
}

impl RoundTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Round and witness flag of a freshly inserted event.
    ///
    /// Parents must already have their rounds assigned.
    pub fn assign(&self, graph: &Graph, id: EventId) -> (Round, bool) {
        let node = graph.node(id);
        let parent_round = node.parents().map(|p| graph.node(p).round()).max();
        let Some(base) = parent_round else {
            return (0, true);
        };

        let participants = graph.participants();
        let mut creators = BTreeSet::new();
        for &witness in self.witnesses(base) {
            let creator = graph.node(witness).creator();
            if !creators.contains(&creator) && graph.strongly_sees(id, witness) {
                creators.insert(creator);
            }
        }
        let weight = creators.iter().map(|&c| participants.weight(c)).sum();

        let round = if participants.is_supermajority(weight) {
            base + 1
        } else {
            base
        };
        let witness = node
            .self_parent()
            .map_or(true, |sp| graph.node(sp).round() < round);

        (round, witness)
    }

    pub(crate) fn add_witness(&mut self, round: Round, id: EventId) {
        let index = round as usize;
        if self.rounds.len() <= index {
            self.rounds.resize_with(index + 1, RoundInfo::default);
        }
        self.rounds[index].witnesses.push(id);
    }

    pub(crate) fn mark_decided(&mut self, round: Round, famous: Vec<EventId>, whitener: Hash) {
        let info = &mut self.rounds[round as usize];
        info.decided = true;
        info.famous = famous;
        info.whitener = whitener;
    }

    pub fn get(&self, round: Round) -> Option<&RoundInfo> {
        self.rounds.get(round as usize)
    }

    pub fn witnesses(&self, round: Round) -> &[EventId] {
        self.get(round).map(|info| info.witnesses()).unwrap_or(&[])
    }

    pub fn is_decided(&self, round: Round) -> bool {
        self.get(round).map_or(false, |info| info.decided)
    }

    /// Number of rounds that have at least one witness
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Highest round whose fame is fully decided
    pub fn last_decided(&self) -> Option<Round> {
        self.rounds
            .iter()
            .rposition(|info| info.decided)
            .map(|r| r as Round)
    }
}
