//! Participant set management
//!
//! The set is fixed for the lifetime of a graph. Members are ordered by node
//! ID so every node assigns the same dense index to the same creator.

use hashweave_core::{
    is_supermajority, HashweaveError, HashweaveResult, NodeId, ParticipantConfig, PublicKey,
    Weight,
};
use hashweave_crypto::keys::{is_valid_public_key, node_id_from_public_key, KeyPair};
use std::collections::HashMap;
use std::sync::Arc;

/// Participant information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub weight: Weight,
}

impl Participant {
    pub fn new(public_key: PublicKey, weight: Weight) -> Self {
        Self {
            node_id: node_id_from_public_key(&public_key),
            public_key,
            weight,
        }
    }
}

/// Fixed, weighted participant set
#[derive(Debug, Clone)]
pub struct ParticipantSet {
    members: Vec<Participant>,
    by_key: HashMap<PublicKey, usize>,
    by_node: HashMap<NodeId, usize>,
    total_weight: Weight,
}

impl ParticipantSet {
    pub fn new(participants: Vec<Participant>) -> HashweaveResult<Self> {
        if participants.is_empty() {
            return Err(HashweaveError::ParticipantSetError(
                "participant set is empty".into(),
            ));
        }

        let mut members = participants;
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut by_key = HashMap::with_capacity(members.len());
        let mut by_node = HashMap::with_capacity(members.len());
        let mut total_weight: Weight = 0;
        for (index, member) in members.iter().enumerate() {
            if member.weight == 0 {
                return Err(HashweaveError::ParticipantSetError(format!(
                    "participant {} has zero weight",
                    member.node_id
                )));
            }
            if !is_valid_public_key(&member.public_key) {
                return Err(HashweaveError::InvalidPublicKey);
            }
            if by_key.insert(member.public_key, index).is_some() {
                return Err(HashweaveError::ParticipantSetError(format!(
                    "participant {} listed twice",
                    member.node_id
                )));
            }
            by_node.insert(member.node_id, index);
            total_weight = total_weight.checked_add(member.weight).ok_or_else(|| {
                HashweaveError::ParticipantSetError("total weight overflows".into())
            })?;
        }

        Ok(Self {
            members,
            by_key,
            by_node,
            total_weight,
        })
    }

    /// Build from configuration entries with hex-encoded keys
    pub fn from_config(entries: &[ParticipantConfig]) -> HashweaveResult<Self> {
        let participants = entries
            .iter()
            .map(|entry| {
                let key = PublicKey::from_hex(&entry.public_key)
                    .map_err(|_| HashweaveError::InvalidPublicKey)?;
                Ok(Participant::new(key, entry.weight))
            })
            .collect::<HashweaveResult<Vec<_>>>()?;
        Self::new(participants)
    }

    /// Equal-weight set over the given keys
    pub fn from_keypairs(keypairs: &[KeyPair]) -> HashweaveResult<Self> {
        Self::new(
            keypairs
                .iter()
                .map(|kp| Participant::new(kp.public_key(), 1))
                .collect(),
        )
    }

    /// Dense index of a creator
    pub fn index_of(&self, public_key: &PublicKey) -> Option<usize> {
        self.by_key.get(public_key).copied()
    }

    /// Dense index of the creator with this node ID
    pub fn index_of_node(&self, node_id: &NodeId) -> Option<usize> {
        self.by_node.get(node_id).copied()
    }

    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.by_key.contains_key(public_key)
    }

    pub fn get(&self, index: usize) -> Option<&Participant> {
        self.members.get(index)
    }

    pub fn node_id(&self, index: usize) -> NodeId {
        self.members[index].node_id
    }

    pub fn weight(&self, index: usize) -> Weight {
        self.members[index].weight
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Strictly more than two thirds of the total weight
    pub fn is_supermajority(&self, weight: Weight) -> bool {
        is_supermajority(weight, self.total_weight)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.members.iter()
    }
}

/// Shared participant set
pub type SharedParticipantSet = Arc<ParticipantSet>;
