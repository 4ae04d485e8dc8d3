//! Event model
//!
//! An event is a creator's signed claim: two parent references, a payload of
//! opaque transactions and a wall-clock timestamp. The hash of the canonical
//! body encoding is the event's identity.

use hashweave_core::{
    EventError, EventHash, Hashable, NodeId, PublicKey, Signable, Signature, Timestamp, Verifiable,
};
use hashweave_crypto::hashing::hash;
use hashweave_crypto::keys::{is_valid_public_key, node_id_from_public_key, KeyPair};
use hashweave_crypto::signing::{self, verify};
use serde::{Deserialize, Serialize};

/// Signed portion of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    /// Public key of the participant that authored the event
    pub creator: PublicKey,
    /// Creator's previous event, `None` for its first event
    pub self_parent: Option<EventHash>,
    /// Event received from another creator, `None` for a first event
    pub other_parent: Option<EventHash>,
    /// Creation time claimed by the creator
    pub timestamp: Timestamp,
    /// Opaque transactions, in creator order
    pub transactions: Vec<Vec<u8>>,
}

impl EventBody {
    /// Body of a creator's first event
    pub fn initial(creator: PublicKey, timestamp: Timestamp, transactions: Vec<Vec<u8>>) -> Self {
        Self {
            creator,
            self_parent: None,
            other_parent: None,
            timestamp,
            transactions,
        }
    }

    pub fn new(
        creator: PublicKey,
        self_parent: EventHash,
        other_parent: EventHash,
        timestamp: Timestamp,
        transactions: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            creator,
            self_parent: Some(self_parent),
            other_parent: Some(other_parent),
            timestamp,
            transactions,
        }
    }

    /// Canonical encoding; the signature and the hash are computed over it
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::Malformed(e.to_string()))
    }

    pub fn hash(&self) -> EventHash {
        hash(&self.to_bytes())
    }

    /// Structural checks that need no graph context
    pub fn check_structure(&self) -> Result<(), EventError> {
        if !is_valid_public_key(&self.creator) {
            return Err(EventError::Malformed("creator is not a valid public key".into()));
        }
        match (&self.self_parent, &self.other_parent) {
            (None, None) => Ok(()),
            (Some(self_parent), Some(other_parent)) if self_parent == other_parent => Err(
                EventError::Malformed("self-parent and other-parent are identical".into()),
            ),
            (Some(_), Some(_)) => Ok(()),
            _ => Err(EventError::Malformed(
                "event must reference both parents or neither".into(),
            )),
        }
    }
}

/// Event as exchanged by gossip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub body: EventBody,
    pub signature: Signature,
}

impl Event {
    /// Wrap an unsigned body
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            signature: Signature::EMPTY,
        }
    }

    /// Build and sign in one step
    pub fn create(body: EventBody, keypair: &KeyPair) -> Result<Self, EventError> {
        let mut event = Self::new(body);
        event.sign(keypair)?;
        Ok(event)
    }

    /// Sign the canonical body with the creator's key
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), EventError> {
        if keypair.public_key() != self.body.creator {
            return Err(EventError::Signing(format!(
                "key {} does not belong to creator {}",
                keypair.public_key().to_hex(),
                self.body.creator.to_hex()
            )));
        }
        self.signature = signing::sign(keypair, &self.body.to_bytes());
        Ok(())
    }

    /// Check structure, then the signature against the embedded creator key
    pub fn verify(&self) -> Result<(), EventError> {
        self.body.check_structure()?;
        verify(&self.body.creator, &self.body.to_bytes(), &self.signature)
            .map_err(|_| EventError::Verification(self.hash()))
    }

    pub fn hash(&self) -> EventHash {
        self.body.hash()
    }

    pub fn creator(&self) -> &PublicKey {
        &self.body.creator
    }

    pub fn creator_id(&self) -> NodeId {
        node_id_from_public_key(&self.body.creator)
    }

    pub fn self_parent(&self) -> Option<&EventHash> {
        self.body.self_parent.as_ref()
    }

    pub fn other_parent(&self) -> Option<&EventHash> {
        self.body.other_parent.as_ref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.body.timestamp
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    pub fn is_initial(&self) -> bool {
        self.body.self_parent.is_none() && self.body.other_parent.is_none()
    }

    /// Raw gossip encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

impl Hashable for Event {
    fn hash(&self) -> EventHash {
        self.body.hash()
    }
}

impl Signable for Event {
    fn signing_bytes(&self) -> Vec<u8> {
        self.body.to_bytes()
    }
}

impl Verifiable for Event {
    fn signer(&self) -> &PublicKey {
        &self.body.creator
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashweave_core::Hash;

    fn dummy_body(creator: PublicKey) -> EventBody {
        EventBody::new(
            creator,
            Hash::from_bytes([1u8; 32]),
            Hash::from_bytes([2u8; 32]),
            Timestamp::from_millis(1_700_000_123_456),
            vec![b"abc".to_vec(), b"def".to_vec()],
        )
    }

    #[test]
    fn test_body_roundtrip() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let body = dummy_body(kp.public_key());

        let decoded = EventBody::from_bytes(&body.to_bytes()).unwrap();

        assert_eq!(decoded.transactions, body.transactions);
        assert_eq!(decoded.self_parent, body.self_parent);
        assert_eq!(decoded.other_parent, body.other_parent);
        assert_eq!(decoded.creator, body.creator);
        assert_eq!(decoded.timestamp, body.timestamp);
        assert_eq!(decoded.hash(), body.hash());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let event = Event::create(dummy_body(kp.public_key()), &kp).unwrap();
        assert!(event.verify().is_ok());
    }

    #[test]
    fn test_event_roundtrip() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let event = Event::create(dummy_body(kp.public_key()), &kp).unwrap();

        let decoded = Event::from_bytes(&event.to_bytes()).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.hash(), event.hash());
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn test_sign_with_foreign_key_fails() {
        let creator = KeyPair::from_seed(&[1u8; 32]);
        let other = KeyPair::from_seed(&[2u8; 32]);
        let mut event = Event::new(dummy_body(creator.public_key()));

        assert!(matches!(event.sign(&other), Err(EventError::Signing(_))));
        assert!(event.signature.is_empty());
    }

    #[test]
    fn test_any_mutated_body_byte_fails_verification() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let event = Event::create(dummy_body(kp.public_key()), &kp).unwrap();
        let bytes = event.body.to_bytes();

        for i in 0..bytes.len() {
            let mut mutated = bytes.clone();
            mutated[i] ^= 0x01;
            // Either the body no longer decodes, or the signature no longer matches
            if let Ok(body) = EventBody::from_bytes(&mutated) {
                let tampered = Event {
                    body,
                    signature: event.signature,
                };
                assert!(tampered.verify().is_err(), "byte {} mutation verified", i);
            }
        }
    }

    #[test]
    fn test_forged_signature_is_verification_error() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let mut event = Event::create(dummy_body(kp.public_key()), &kp).unwrap();
        event.signature.0[0] ^= 0xff;

        assert_eq!(event.verify(), Err(EventError::Verification(event.hash())));
    }

    #[test]
    fn test_single_parent_is_malformed() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let mut body = dummy_body(kp.public_key());
        body.other_parent = None;
        let event = Event::create(body, &kp).unwrap();

        assert!(matches!(event.verify(), Err(EventError::Malformed(_))));
    }

    #[test]
    fn test_identical_parents_are_malformed() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let mut body = dummy_body(kp.public_key());
        body.other_parent = body.self_parent;
        let event = Event::create(body, &kp).unwrap();

        assert!(matches!(event.verify(), Err(EventError::Malformed(_))));
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        assert!(matches!(
            Event::from_bytes(&[0xde, 0xad]),
            Err(EventError::Malformed(_))
        ));
    }

    #[test]
    fn test_initial_event() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let event = Event::create(
            EventBody::initial(kp.public_key(), Timestamp::from_millis(0), vec![]),
            &kp,
        )
        .unwrap();

        assert!(event.is_initial());
        assert_eq!(event.creator_id(), kp.node_id());
        assert!(event.verify().is_ok());
    }
}
