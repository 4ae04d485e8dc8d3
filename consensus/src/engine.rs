//! Hashgraph consensus engine
//!
//! [`Hashgraph`] owns the graph and runs the whole pipeline for every event it
//! accepts: insertion, round assignment, virtual voting and ordering. It is a
//! single-writer structure; callers serialize access to it.

use crate::deferred::DeferredEvents;
use crate::event::Event;
use crate::fame::FameDecider;
use crate::graph::{EventId, EventNode, Graph, Inserted};
use crate::order::Orderer;
use crate::output::{ConsensusCursor, ConsensusLog};
use crate::participants::SharedParticipantSet;
use crate::round::RoundTable;
use crate::sync::KnownSummary;
use hashweave_core::{
    ConsensusConfig, EventHash, ForkDetected, HashweaveResult, InsertError, PublicKey, Round,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome of offering an event to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Inserted; parked children that became insertable were inserted too
    Accepted {
        hash: EventHash,
        fork: Option<ForkDetected>,
        released: Vec<EventHash>,
        finalized: u64,
    },
    /// Parked until the missing parents arrive
    Deferred {
        hash: EventHash,
        missing: Vec<EventHash>,
    },
    /// Already in the graph, nothing changed
    Duplicate(EventHash),
}

impl Submission {
    pub fn hash(&self) -> EventHash {
        match self {
            Submission::Accepted { hash, .. }
            | Submission::Deferred { hash, .. }
            | Submission::Duplicate(hash) => *hash,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted { .. })
    }
}

/// Consensus statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusStats {
    pub events: u64,
    pub rounds: u64,
    pub last_decided_round: Option<Round>,
    pub finalized: u64,
    pub pending: u64,
    pub forks: u64,
    pub deferred: u64,
}

/// Hashgraph consensus engine
pub struct Hashgraph {
    config: ConsensusConfig,
    graph: Graph,
    rounds: RoundTable,
    fame: FameDecider,
    orderer: Orderer,
    log: ConsensusLog,
    deferred: DeferredEvents,
}

impl Hashgraph {
    /// Create an empty engine over a fixed participant set
    pub fn new(config: ConsensusConfig, participants: SharedParticipantSet) -> HashweaveResult<Self> {
        config.validate()?;
        info!(
            "Starting hashgraph with {} participants, total weight {}",
            participants.len(),
            participants.total_weight()
        );
        Ok(Self {
            fame: FameDecider::new(config.coin_round_frequency),
            deferred: DeferredEvents::new(config.max_deferred_events),
            graph: Graph::new(participants),
            rounds: RoundTable::new(),
            orderer: Orderer::new(),
            log: ConsensusLog::new(),
            config,
        })
    }

    /// Decode, verify and insert a raw gossiped event
    pub fn submit(&mut self, raw: &[u8]) -> Result<Submission, InsertError> {
        let event = Event::from_bytes(raw)?;
        self.submit_event(event)
    }

    /// Verify and insert an event, parking it if a parent is missing
    pub fn submit_event(&mut self, event: Event) -> Result<Submission, InsertError> {
        let hash = event.hash();
        if self.graph.contains(&hash) {
            debug!("Ignoring duplicate event {}", hash);
            return Ok(Submission::Duplicate(hash));
        }
        self.check(&event)?;

        let missing = self.graph.missing_parents(&event);
        if let Some(&parent) = missing.first() {
            debug!("Deferring event {} until {} arrives", hash, parent);
            self.deferred.defer(hash, event, parent);
            return Ok(Submission::Deferred { hash, missing });
        }

        let finalized_before = self.log.len();
        let inserted = self.insert_checked(event)?;
        let released = self.release_deferred(hash);

        Ok(Submission::Accepted {
            hash,
            fork: inserted.fork,
            released,
            finalized: self.log.len() - finalized_before,
        })
    }

    /// Verify and insert an event whose parents must already be present
    pub fn insert(&mut self, event: Event) -> Result<Inserted, InsertError> {
        self.check(&event)?;
        self.insert_checked(event)
    }

    fn check(&self, event: &Event) -> Result<(), InsertError> {
        event.verify()?;
        if !self.graph.participants().contains(event.creator()) {
            return Err(InsertError::Malformed(format!(
                "creator {} is not a participant",
                event.creator_id()
            )));
        }
        Ok(())
    }

    fn insert_checked(&mut self, event: Event) -> Result<Inserted, InsertError> {
        let inserted = self.graph.insert(event)?;
        let id = inserted.id;

        let (round, witness) = self.rounds.assign(&self.graph, id);
        let node = self.graph.node_mut(id);
        node.round = round;
        node.witness = witness;
        self.orderer.track(id);

        if witness {
            self.rounds.add_witness(round, id);
            if self.rounds.is_decided(round) {
                debug!("Late witness {} in decided round {}", self.graph.node(id).hash(), round);
                self.graph.set_fame(id, false);
            } else {
                self.run_consensus();
            }
        }

        Ok(inserted)
    }

    fn run_consensus(&mut self) {
        let decisions = self
            .fame
            .decide(&self.graph, &self.rounds, self.orderer.next_round());
        if decisions.is_empty() {
            return;
        }
        for (id, famous) in decisions {
            self.graph.set_fame(id, famous);
        }

        let records = self.orderer.advance(&mut self.graph, &mut self.rounds);
        self.fame.prune(&self.graph, self.orderer.next_round());
        if !records.is_empty() {
            self.log.append(records);
        }
    }

    fn release_deferred(&mut self, arrived: EventHash) -> Vec<EventHash> {
        let mut released = Vec::new();
        let mut arrivals = vec![arrived];

        while let Some(parent) = arrivals.pop() {
            for event in self.deferred.release(&parent) {
                let hash = event.hash();
                if self.graph.contains(&hash) {
                    continue;
                }
                if let Some(&missing) = self.graph.missing_parents(&event).first() {
                    self.deferred.defer(hash, event, missing);
                    continue;
                }
                match self.insert_checked(event) {
                    Ok(_) => {
                        released.push(hash);
                        arrivals.push(hash);
                    }
                    Err(err) => warn!("Dropping deferred event {}: {}", hash, err),
                }
            }
        }

        released
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn rounds(&self) -> &RoundTable {
        &self.rounds
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn participants(&self) -> &SharedParticipantSet {
        self.graph.participants()
    }

    pub fn event(&self, hash: &EventHash) -> Option<&EventNode> {
        self.graph.get(hash)
    }

    /// Latest event of a participant
    pub fn head(&self, creator: &PublicKey) -> Option<&Event> {
        let index = self.participants().index_of(creator)?;
        self.graph
            .head(index)
            .map(|id: EventId| self.graph.node(id).event())
    }

    /// Shared handle on the finalized order
    pub fn log(&self) -> ConsensusLog {
        self.log.clone()
    }

    pub fn cursor(&self, from: u64) -> ConsensusCursor {
        self.log.cursor(from)
    }

    pub fn known_summary(&self) -> KnownSummary {
        self.graph.known_summary()
    }

    /// Raw events a peer with `summary` lacks, parents first
    pub fn events_unknown_to(&self, summary: &KnownSummary) -> Vec<Vec<u8>> {
        self.graph
            .events_unknown_to(summary)
            .into_iter()
            .map(Event::to_bytes)
            .collect()
    }

    pub fn stats(&self) -> ConsensusStats {
        ConsensusStats {
            events: self.graph.len() as u64,
            rounds: self.rounds.len() as u64,
            last_decided_round: self.rounds.last_decided(),
            finalized: self.log.len(),
            pending: self.orderer.pending() as u64,
            forks: self.graph.forks().len() as u64,
            deferred: self.deferred.len() as u64,
        }
    }
}
