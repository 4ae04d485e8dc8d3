//! Graph store
//!
//! Events live in an append-only arena and refer to each other through
//! [`EventId`] handles. Arena order is insertion order, which is always a
//! topological order since parents must be present before their children.

use crate::event::Event;
use crate::participants::SharedParticipantSet;
use hashweave_core::{
    EventHash, ForkDetected, InsertError, NodeId, Round, Sequence, Timestamp,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{trace, warn};

/// Handle of an event in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub(crate) usize);

impl EventId {
    /// Position in insertion order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Fame of a witness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fame {
    Undecided,
    Famous,
    NotFamous,
}

impl Fame {
    pub fn is_decided(self) -> bool {
        self != Fame::Undecided
    }
}

/// Stored event plus everything consensus derives for it
#[derive(Debug, Clone)]
pub struct EventNode {
    event: Event,
    hash: EventHash,
    creator: usize,
    seq: Sequence,
    self_parent: Option<EventId>,
    other_parent: Option<EventId>,
    self_children: Vec<EventId>,
    other_children: Vec<EventId>,
    /// Latest event of each creator that this event has as an ancestor
    pub(crate) last_ancestors: Vec<Option<EventId>>,
    /// Creators with two conflicting branches among this event's ancestors
    pub(crate) forks_seen: BTreeSet<usize>,
    pub(crate) round: Round,
    pub(crate) witness: bool,
    pub(crate) fame: Fame,
    pub(crate) round_received: Option<Round>,
    pub(crate) consensus_timestamp: Option<Timestamp>,
    pub(crate) consensus_index: Option<u64>,
}

impl EventNode {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn hash(&self) -> EventHash {
        self.hash
    }

    /// Dense participant index of the creator
    pub fn creator(&self) -> usize {
        self.creator
    }

    pub fn seq(&self) -> Sequence {
        self.seq
    }

    pub fn self_parent(&self) -> Option<EventId> {
        self.self_parent
    }

    pub fn other_parent(&self) -> Option<EventId> {
        self.other_parent
    }

    pub fn parents(&self) -> impl Iterator<Item = EventId> {
        self.self_parent.into_iter().chain(self.other_parent)
    }

    pub fn self_children(&self) -> &[EventId] {
        &self.self_children
    }

    pub fn other_children(&self) -> &[EventId] {
        &self.other_children
    }

    pub fn timestamp(&self) -> Timestamp {
        self.event.timestamp()
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn is_witness(&self) -> bool {
        self.witness
    }

    pub fn fame(&self) -> Fame {
        self.fame
    }

    pub fn round_received(&self) -> Option<Round> {
        self.round_received
    }

    pub fn consensus_timestamp(&self) -> Option<Timestamp> {
        self.consensus_timestamp
    }

    pub fn consensus_index(&self) -> Option<u64> {
        self.consensus_index
    }

    pub fn is_finalized(&self) -> bool {
        self.consensus_index.is_some()
    }
}

/// Result of a successful insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inserted {
    pub id: EventId,
    /// Set when the event conflicts with an existing event of its creator
    pub fork: Option<ForkDetected>,
}

/// In-memory event DAG
pub struct Graph {
    participants: SharedParticipantSet,
    nodes: Vec<EventNode>,
    by_hash: HashMap<EventHash, EventId>,
    /// `chains[creator][seq]`, more than one entry per slot only for forkers
    chains: Vec<Vec<Vec<EventId>>>,
    forkers: BTreeSet<usize>,
    forks: Vec<ForkDetected>,
}

impl Graph {
    pub fn new(participants: SharedParticipantSet) -> Self {
        let chains = vec![Vec::new(); participants.len()];
        Self {
            participants,
            nodes: Vec::new(),
            by_hash: HashMap::new(),
            chains,
            forkers: BTreeSet::new(),
            forks: Vec::new(),
        }
    }

    /// Store an event whose signature has already been checked.
    ///
    /// Unknown parents and duplicates leave the graph untouched. A fork is
    /// stored and reported in [`Inserted::fork`].
    pub fn insert(&mut self, event: Event) -> Result<Inserted, InsertError> {
        let hash = event.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(InsertError::Duplicate(hash));
        }

        event.body.check_structure()?;
        let creator = self.participants.index_of(event.creator()).ok_or_else(|| {
            InsertError::Malformed(format!(
                "creator {} is not a participant",
                event.creator_id()
            ))
        })?;

        let self_parent = self.resolve_parent(hash, event.self_parent())?;
        let other_parent = self.resolve_parent(hash, event.other_parent())?;

        let seq = match self_parent {
            Some(sp) => {
                let parent = &self.nodes[sp.0];
                if parent.creator != creator {
                    return Err(InsertError::Malformed(
                        "self-parent belongs to another creator".into(),
                    ));
                }
                if event.timestamp() < parent.timestamp() {
                    return Err(InsertError::Malformed(format!(
                        "timestamp {} precedes self-parent timestamp {}",
                        event.timestamp(),
                        parent.timestamp()
                    )));
                }
                parent.seq + 1
            }
            None => 0,
        };
        if let Some(op) = other_parent {
            if self.nodes[op.0].creator == creator {
                return Err(InsertError::Malformed(
                    "other-parent belongs to the same creator".into(),
                ));
            }
        }

        let id = EventId(self.nodes.len());

        let conflicting = match self_parent {
            Some(sp) => self.nodes[sp.0].self_children.first().copied(),
            None => self.chains[creator]
                .first()
                .and_then(|slot| slot.first())
                .copied(),
        };
        let fork = conflicting.map(|other| {
            self.forkers.insert(creator);
            let evidence = ForkDetected {
                creator: self.participants.node_id(creator),
                event: hash,
                conflicts_with: self.nodes[other.0].hash,
            };
            warn!("{}", evidence);
            self.forks.push(evidence.clone());
            evidence
        });

        let (last_ancestors, forks_seen) =
            self.merge_ancestry(id, creator, self_parent, other_parent);

        self.nodes.push(EventNode {
            event,
            hash,
            creator,
            seq,
            self_parent,
            other_parent,
            self_children: Vec::new(),
            other_children: Vec::new(),
            last_ancestors,
            forks_seen,
            round: 0,
            witness: false,
            fame: Fame::Undecided,
            round_received: None,
            consensus_timestamp: None,
            consensus_index: None,
        });
        self.by_hash.insert(hash, id);

        if let Some(sp) = self_parent {
            self.nodes[sp.0].self_children.push(id);
        }
        if let Some(op) = other_parent {
            self.nodes[op.0].other_children.push(id);
        }
        let chain = &mut self.chains[creator];
        if chain.len() <= seq as usize {
            chain.resize(seq as usize + 1, Vec::new());
        }
        chain[seq as usize].push(id);

        trace!("Inserted event {} (creator {}, seq {})", hash, creator, seq);

        Ok(Inserted { id, fork })
    }

    fn resolve_parent(
        &self,
        event: EventHash,
        parent: Option<&EventHash>,
    ) -> Result<Option<EventId>, InsertError> {
        match parent {
            None => Ok(None),
            Some(parent) => self
                .by_hash
                .get(parent)
                .copied()
                .map(Some)
                .ok_or(InsertError::UnknownParent {
                    event,
                    parent: *parent,
                }),
        }
    }

    /// Parent hashes of `event` that are not in the graph
    pub fn missing_parents(&self, event: &Event) -> Vec<EventHash> {
        event
            .self_parent()
            .into_iter()
            .chain(event.other_parent())
            .filter(|parent| !self.by_hash.contains_key(parent))
            .copied()
            .collect()
    }

    pub fn node(&self, id: EventId) -> &EventNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: EventId) -> &mut EventNode {
        &mut self.nodes[id.0]
    }

    pub fn lookup(&self, hash: &EventHash) -> Option<EventId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &EventHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &EventHash) -> Option<&EventNode> {
        self.lookup(hash).map(|id| self.node(id))
    }

    /// Events of `creator` at position `seq`; more than one only after a fork
    pub fn at_sequence(&self, creator: &NodeId, seq: Sequence) -> &[EventId] {
        self.participants
            .index_of_node(creator)
            .and_then(|index| self.chains[index].get(seq as usize))
            .map(|slot| slot.as_slice())
            .unwrap_or(&[])
    }

    /// Creator's events in sequence order
    pub fn chain(&self, creator: usize) -> impl Iterator<Item = EventId> + '_ {
        self.chains[creator].iter().flatten().copied()
    }

    /// Highest sequence number stored for `creator`
    pub fn last_sequence(&self, creator: usize) -> Option<Sequence> {
        self.chains[creator].len().checked_sub(1).map(|s| s as Sequence)
    }

    /// Creator's most recent event, first branch on a fork
    pub fn head(&self, creator: usize) -> Option<EventId> {
        self.chains[creator].last().and_then(|slot| slot.first()).copied()
    }

    pub fn is_forker(&self, creator: usize) -> bool {
        self.forkers.contains(&creator)
    }

    /// Fork registry in detection order
    pub fn forks(&self) -> &[ForkDetected] {
        &self.forks
    }

    pub fn participants(&self) -> &SharedParticipantSet {
        &self.participants
    }

    /// All events in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (EventId, &EventNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (EventId(index), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::EventBody;
    use crate::participants::ParticipantSet;
    use hashweave_crypto::keys::KeyPair;
    use std::sync::Arc;

    pub(crate) fn keys(n: u8) -> Vec<KeyPair> {
        (1..=n).map(|i| KeyPair::from_seed(&[i; 32])).collect()
    }

    pub(crate) fn graph_for(keys: &[KeyPair]) -> Graph {
        Graph::new(Arc::new(ParticipantSet::from_keypairs(keys).unwrap()))
    }

    pub(crate) fn initial(kp: &KeyPair, ts: u64) -> Event {
        Event::create(
            EventBody::initial(kp.public_key(), Timestamp::from_millis(ts), vec![]),
            kp,
        )
        .unwrap()
    }

    pub(crate) fn child(kp: &KeyPair, sp: &Event, op: &Event, ts: u64) -> Event {
        Event::create(
            EventBody::new(
                kp.public_key(),
                sp.hash(),
                op.hash(),
                Timestamp::from_millis(ts),
                vec![ts.to_le_bytes().to_vec()],
            ),
            kp,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let keys = keys(2);
        let mut graph = graph_for(&keys);

        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let a1 = child(&keys[0], &a0, &b0, 1);

        let ia0 = graph.insert(a0.clone()).unwrap();
        let ib0 = graph.insert(b0.clone()).unwrap();
        let ia1 = graph.insert(a1.clone()).unwrap();

        assert!(ia0.fork.is_none() && ib0.fork.is_none() && ia1.fork.is_none());
        assert_eq!(graph.len(), 3);

        let node = graph.node(ia1.id);
        assert_eq!(node.seq(), 1);
        assert_eq!(node.self_parent(), Some(ia0.id));
        assert_eq!(node.other_parent(), Some(ib0.id));
        assert_eq!(graph.node(ia0.id).self_children(), &[ia1.id]);
        assert_eq!(graph.node(ib0.id).other_children(), &[ia1.id]);

        assert_eq!(graph.lookup(&a1.hash()), Some(ia1.id));
        assert_eq!(graph.at_sequence(&keys[0].node_id(), 1), &[ia1.id]);
        assert!(graph.at_sequence(&keys[0].node_id(), 2).is_empty());
        let outsider = KeyPair::from_seed(&[9u8; 32]);
        assert!(graph.at_sequence(&outsider.node_id(), 0).is_empty());
        assert_eq!(graph.head(node.creator()), Some(ia1.id));
        assert_eq!(graph.chain(node.creator()).collect::<Vec<_>>(), vec![ia0.id, ia1.id]);
    }

    #[test]
    fn test_duplicate_not_inserted() {
        let keys = keys(2);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);

        graph.insert(a0.clone()).unwrap();
        assert_eq!(graph.insert(a0.clone()), Err(InsertError::Duplicate(a0.hash())));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_unknown_parent_not_inserted() {
        let keys = keys(2);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let a1 = child(&keys[0], &a0, &b0, 1);

        graph.insert(a0).unwrap();
        assert_eq!(
            graph.insert(a1.clone()),
            Err(InsertError::UnknownParent {
                event: a1.hash(),
                parent: b0.hash()
            })
        );
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.missing_parents(&a1), vec![b0.hash()]);
    }

    #[test]
    fn test_structural_rejections() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 10);
        let b0 = initial(&keys[1], 0);
        graph.insert(a0.clone()).unwrap();
        graph.insert(b0.clone()).unwrap();

        // Self-parent from another creator
        let wrong_sp = child(&keys[2], &a0, &b0, 11);
        assert!(matches!(graph.insert(wrong_sp), Err(InsertError::Malformed(_))));

        // Other-parent from the same creator
        let b1 = child(&keys[1], &b0, &a0, 11);
        graph.insert(b1.clone()).unwrap();
        let same_creator = child(&keys[1], &b1, &b0, 12);
        assert!(matches!(graph.insert(same_creator), Err(InsertError::Malformed(_))));

        // Timestamp regression along the self-parent chain
        let regressed = child(&keys[0], &a0, &b1, 5);
        assert!(matches!(graph.insert(regressed), Err(InsertError::Malformed(_))));

        // Creator outside the participant set
        let stranger = KeyPair::from_seed(&[42u8; 32]);
        assert!(matches!(
            graph.insert(initial(&stranger, 0)),
            Err(InsertError::Malformed(_))
        ));

        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_fork_is_stored_and_reported() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let c0 = initial(&keys[2], 0);
        for e in [&a0, &b0, &c0] {
            graph.insert(e.clone()).unwrap();
        }

        let a1 = child(&keys[0], &a0, &b0, 1);
        let a1_prime = child(&keys[0], &a0, &c0, 1);
        assert!(graph.insert(a1.clone()).unwrap().fork.is_none());
        let inserted = graph.insert(a1_prime.clone()).unwrap();

        let fork = inserted.fork.unwrap();
        assert_eq!(fork.creator, keys[0].node_id());
        assert_eq!(fork.event, a1_prime.hash());
        assert_eq!(fork.conflicts_with, a1.hash());

        let creator = graph.node(inserted.id).creator();
        assert!(graph.is_forker(creator));
        assert_eq!(graph.forks().len(), 1);
        assert_eq!(graph.at_sequence(&keys[0].node_id(), 1).len(), 2);
        assert!(graph.contains(&a1_prime.hash()));
    }

    #[test]
    fn test_two_initial_events_are_a_fork() {
        let keys = keys(2);
        let mut graph = graph_for(&keys);
        graph.insert(initial(&keys[0], 0)).unwrap();
        let second = graph.insert(initial(&keys[0], 1)).unwrap();
        assert!(second.fork.is_some());
    }

    #[test]
    fn test_parents_precede_children() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let mut heads: Vec<Event> = keys.iter().map(|k| initial(k, 0)).collect();
        for e in &heads {
            graph.insert(e.clone()).unwrap();
        }
        for step in 1..30u64 {
            let i = (step % 3) as usize;
            let j = ((step + 1) % 3) as usize;
            let e = child(&keys[i], &heads[i], &heads[j], step);
            graph.insert(e.clone()).unwrap();
            heads[i] = e;
        }

        for (id, node) in graph.iter() {
            for parent in node.parents() {
                assert!(parent < id);
            }
        }
    }
}
