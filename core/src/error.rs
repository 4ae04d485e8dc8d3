//! Error types for HASHWEAVE

use crate::types::{EventHash, NodeId, Round};
use thiserror::Error;

/// Main error type for HASHWEAVE
#[derive(Error, Debug)]
pub enum HashweaveError {
    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ============ Event Errors ============
    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Insert(#[from] InsertError),

    // ============ Consensus Errors ============
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Participant set error: {0}")]
    ParticipantSetError(String),

    #[error("Replayed consensus diverged from stored order at index {index}")]
    ConsensusDiverged { index: u64 },

    // ============ Storage Errors ============
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    #[error("Message deserialization failed: {0}")]
    DeserializationError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Consensus service stopped")]
    ServiceStopped,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by the event model while signing or checking an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signature verification failed for event {0}")]
    Verification(EventHash),

    #[error("Malformed event: {0}")]
    Malformed(String),
}

/// Errors returned when an event is offered to the graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InsertError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Signature verification failed for event {0}")]
    Verification(EventHash),

    #[error("Event {event} references unknown parent {parent}")]
    UnknownParent { event: EventHash, parent: EventHash },

    #[error("Event {0} is already known")]
    Duplicate(EventHash),
}

impl InsertError {
    /// Errors the gossip layer should hold against the peer that sent the event
    pub fn is_misbehaviour(&self) -> bool {
        matches!(self, InsertError::Malformed(_) | InsertError::Verification(_))
    }
}

impl From<EventError> for InsertError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Verification(hash) => InsertError::Verification(hash),
            EventError::Malformed(reason) => InsertError::Malformed(reason),
            EventError::Signing(reason) => InsertError::Malformed(reason),
        }
    }
}

/// Evidence that a creator produced two events on the same self-parent.
///
/// Not fatal: the event is stored and the creator's conflicting branches are
/// excluded from `sees` for every observer of both branches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Fork by {creator}: event {event} conflicts with {conflicts_with}")]
pub struct ForkDetected {
    pub creator: NodeId,
    pub event: EventHash,
    pub conflicts_with: EventHash,
}

/// Internal signal that a fame election reached a coin round without a
/// supermajority. Never surfaced to callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Fame of witness in round {round} still undecided at voting round {voting_round}")]
pub struct UndecidedFameTimeout {
    pub round: Round,
    pub voting_round: Round,
}

impl From<std::io::Error> for HashweaveError {
    fn from(err: std::io::Error) -> Self {
        HashweaveError::StorageError(err.to_string())
    }
}

impl From<bincode::Error> for HashweaveError {
    fn from(err: bincode::Error) -> Self {
        HashweaveError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for HashweaveError {
    fn from(err: serde_json::Error) -> Self {
        HashweaveError::SerializationError(err.to_string())
    }
}
