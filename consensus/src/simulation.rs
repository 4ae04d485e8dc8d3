//! Deterministic gossip simulation
//!
//! Produces the event history a set of participants would create while
//! syncing with each other. Every participant's keys derive from one phrase,
//! so separate processes running the same schedule create identical events.

use crate::event::{Event, EventBody};
use crate::participants::{ParticipantSet, SharedParticipantSet};
use hashweave_core::{EventHash, HashweaveError, HashweaveResult, Timestamp};
use hashweave_crypto::derivation::MasterKey;
use hashweave_crypto::keys::KeyPair;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;

/// Phrase the default simulated participants derive their keys from
pub const SIMULATION_PHRASE: &str = "hashweave simulation";

/// Pair `(creator, peer)` of step `step` in the ring schedule.
///
/// Each participant syncs in turn, cycling through every other peer.
pub fn ring_pair(step: u64, participants: usize) -> (usize, usize) {
    let n = participants as u64;
    let creator = step % n;
    let offset = (step / n) % (n - 1);
    (creator as usize, ((creator + 1 + offset) % n) as usize)
}

/// Event history of simulated participants
pub struct Simulation {
    keys: Vec<KeyPair>,
    participants: SharedParticipantSet,
    initial: Vec<EventHash>,
    heads: Vec<EventHash>,
    events: Vec<Event>,
    clock: u64,
    /// Equivocating branch not yet passed on, with its creator
    hidden_branch: Option<(usize, EventHash)>,
}

impl Simulation {
    /// Start a simulation; every participant creates its first event
    pub fn new(keys: Vec<KeyPair>) -> HashweaveResult<Self> {
        if keys.len() < 2 {
            return Err(HashweaveError::ParticipantSetError(
                "a simulation needs at least two participants".into(),
            ));
        }
        let participants = Arc::new(ParticipantSet::from_keypairs(&keys)?);
        let mut events = Vec::with_capacity(keys.len());
        for (i, kp) in keys.iter().enumerate() {
            let body = EventBody::initial(
                kp.public_key(),
                Timestamp::from_millis(0),
                vec![format!("init{}", i).into_bytes()],
            );
            events.push(Event::create(body, kp)?);
        }
        let initial: Vec<EventHash> = events.iter().map(Event::hash).collect();

        Ok(Self {
            keys,
            participants,
            heads: initial.clone(),
            initial,
            events,
            clock: 1,
            hidden_branch: None,
        })
    }

    /// `count` participants derived from `phrase`
    pub fn from_phrase(phrase: &str, count: u32) -> HashweaveResult<Self> {
        let keys = MasterKey::from_phrase(phrase)?.derive_keypairs(count)?;
        Self::new(keys)
    }

    pub fn with_participants(count: u32) -> HashweaveResult<Self> {
        Self::from_phrase(SIMULATION_PHRASE, count)
    }

    pub fn participants(&self) -> SharedParticipantSet {
        self.participants.clone()
    }

    pub fn keys(&self) -> &[KeyPair] {
        &self.keys
    }

    /// Every event created so far, in creation order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn initial_event(&self, creator: usize) -> EventHash {
        self.initial[creator]
    }

    pub fn head(&self, creator: usize) -> EventHash {
        self.heads[creator]
    }

    /// `creator` extends its chain with `other_parent`
    pub fn create(&mut self, creator: usize, other_parent: EventHash) -> HashweaveResult<EventHash> {
        let hash = self.create_on(creator, self.heads[creator], other_parent, "tx")?;
        self.heads[creator] = hash;
        Ok(hash)
    }

    /// `creator` records a sync from `peer`.
    ///
    /// A hidden equivocating branch of `peer` is handed out to the first
    /// other participant that syncs from it.
    pub fn gossip(&mut self, creator: usize, peer: usize) -> HashweaveResult<EventHash> {
        let handed_out = match self.hidden_branch {
            Some((forker, branch)) if forker == peer && creator != forker => Some(branch),
            _ => None,
        };
        let other_parent = match handed_out {
            Some(branch) => {
                self.hidden_branch = None;
                branch
            }
            None => self.heads[peer],
        };
        self.create(creator, other_parent)
    }

    /// `creator` syncs from `peer` and also signs a conflicting sibling
    pub fn equivocate(&mut self, creator: usize, peer: usize) -> HashweaveResult<(EventHash, EventHash)> {
        let self_parent = self.heads[creator];
        let other_parent = self.heads[peer];
        let first = self.create_on(creator, self_parent, other_parent, "tx")?;
        let second = self.create_on(creator, self_parent, other_parent, "equivocate")?;
        self.heads[creator] = first;
        self.hidden_branch = Some((creator, second));
        Ok((first, second))
    }

    fn create_on(
        &mut self,
        creator: usize,
        self_parent: EventHash,
        other_parent: EventHash,
        label: &str,
    ) -> HashweaveResult<EventHash> {
        let kp = &self.keys[creator];
        let body = EventBody::new(
            kp.public_key(),
            self_parent,
            other_parent,
            Timestamp::from_millis(self.clock),
            vec![format!("{}{}", label, self.clock).into_bytes()],
        );
        let event = Event::create(body, kp)?;
        let hash = event.hash();
        self.clock += 1;
        self.events.push(event);
        Ok(hash)
    }

    /// Run `steps` syncs of the ring schedule
    pub fn run_ring(&mut self, steps: u64) -> HashweaveResult<()> {
        for step in 0..steps {
            let (creator, peer) = ring_pair(step, self.keys.len());
            self.gossip(creator, peer)?;
        }
        Ok(())
    }

    /// Ring schedule where `forker` equivocates once, at its first turn from
    /// `fork_step` on
    pub fn run_ring_with_fork(&mut self, steps: u64, forker: usize, fork_step: u64) -> HashweaveResult<()> {
        let mut forked = false;
        for step in 0..steps {
            let (creator, peer) = ring_pair(step, self.keys.len());
            if creator == forker && step >= fork_step && !forked {
                self.equivocate(creator, peer)?;
                forked = true;
            } else {
                self.gossip(creator, peer)?;
            }
        }
        Ok(())
    }

    /// Run `steps` syncs between random pairs drawn from a seeded generator
    pub fn run_random(&mut self, steps: u64, seed: u64) -> HashweaveResult<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = self.keys.len();
        for _ in 0..steps {
            let creator = rng.gen_range(0..n);
            let mut peer = rng.gen_range(0..n - 1);
            if peer >= creator {
                peer += 1;
            }
            self.gossip(creator, peer)?;
        }
        Ok(())
    }

    /// The events in a random order that still delivers parents first
    pub fn shuffled_topological(&self, seed: u64) -> Vec<Event> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut remaining: Vec<(EventHash, &Event)> =
            self.events.iter().map(|e| (e.hash(), e)).collect();
        let mut delivered: HashSet<EventHash> = HashSet::new();
        let mut out = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, (_, e))| {
                    e.self_parent().map_or(true, |p| delivered.contains(p))
                        && e.other_parent().map_or(true, |p| delivered.contains(p))
                })
                .map(|(i, _)| i)
                .collect();
            let pick = ready[rng.gen_range(0..ready.len())];
            let (hash, event) = remaining.swap_remove(pick);
            delivered.insert(hash);
            out.push(event.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_pair_visits_every_peer() {
        let mut peers = vec![HashSet::new(); 4];
        for step in 0..12 {
            let (creator, peer) = ring_pair(step, 4);
            assert_ne!(creator, peer);
            peers[creator].insert(peer);
        }
        assert!(peers.iter().all(|p| p.len() == 3));
    }

    #[test]
    fn test_simulation_is_reproducible() {
        let mut a = Simulation::with_participants(4).unwrap();
        let mut b = Simulation::with_participants(4).unwrap();
        a.run_random(30, 9).unwrap();
        b.run_random(30, 9).unwrap();

        assert_eq!(a.events().len(), 34);
        let hashes = |s: &Simulation| s.events().iter().map(Event::hash).collect::<Vec<_>>();
        assert_eq!(hashes(&a), hashes(&b));
    }

    #[test]
    fn test_equivocation_branch_is_handed_out_once() {
        let mut sim = Simulation::with_participants(3).unwrap();
        let (_, second) = sim.equivocate(0, 1).unwrap();

        let received = sim.gossip(1, 0).unwrap();
        let event = sim.events().iter().find(|e| e.hash() == received).unwrap();
        assert_eq!(event.other_parent(), Some(&second));

        let next = sim.gossip(2, 0).unwrap();
        let event = sim.events().iter().find(|e| e.hash() == next).unwrap();
        assert_eq!(event.other_parent(), Some(&sim.head(0)));
    }

    #[test]
    fn test_shuffled_order_delivers_parents_first() {
        let mut sim = Simulation::with_participants(4).unwrap();
        sim.run_random(60, 1).unwrap();

        let shuffled = sim.shuffled_topological(42);
        assert_eq!(shuffled.len(), sim.events().len());

        let mut seen = HashSet::new();
        for event in &shuffled {
            for parent in event.self_parent().into_iter().chain(event.other_parent()) {
                assert!(seen.contains(parent));
            }
            seen.insert(event.hash());
        }
    }
}
