//! Node runtime owning the consensus engine
//!
//! A single tokio task owns the [`Hashgraph`] and the store. Every caller
//! talks to it through [`NodeRuntime`], a cloneable handle that sends
//! commands over an mpsc channel, so ingress is serialized without locks.
//! Reads of the finalized order go straight to the shared [`ConsensusLog`].

use hashweave_consensus::{
    ConsensusLog, ConsensusRecord, ConsensusStats, Event, EventBody, Hashgraph, KnownSummary,
    ParticipantSet, Submission,
};
use hashweave_core::{HashweaveError, HashweaveResult, NodeConfig, NodeId, PublicKey, Timestamp};
use hashweave_crypto::keys::KeyPair;
use hashweave_state::{ConsensusStore, SharedConsensusStore};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 1024;

enum Command {
    Submit {
        raw: Vec<u8>,
        reply: oneshot::Sender<HashweaveResult<Submission>>,
    },
    CreateEvent {
        peer: Option<PublicKey>,
        transactions: Vec<Vec<u8>>,
        reply: oneshot::Sender<HashweaveResult<Submission>>,
    },
    Sync {
        summary: KnownSummary,
        reply: oneshot::Sender<Vec<Vec<u8>>>,
    },
    Summary {
        reply: oneshot::Sender<KnownSummary>,
    },
    Stats {
        reply: oneshot::Sender<ConsensusStats>,
    },
    Shutdown {
        reply: oneshot::Sender<HashweaveResult<()>>,
    },
}

/// Handle on the running consensus task
#[derive(Clone)]
pub struct NodeRuntime {
    commands: mpsc::Sender<Command>,
    log: ConsensusLog,
    name: String,
    node_id: NodeId,
    is_participant: bool,
}

impl NodeRuntime {
    /// Restore state from `store` and spawn the consensus task
    pub async fn start(
        config: &NodeConfig,
        keypair: KeyPair,
        store: SharedConsensusStore,
    ) -> HashweaveResult<(Self, JoinHandle<()>)> {
        let participants = Arc::new(ParticipantSet::from_config(&config.participants)?);
        let is_participant = participants.contains(&keypair.public_key());
        let mut hashgraph = Hashgraph::new(config.consensus.clone(), participants)?;

        let persisted = restore(&mut hashgraph, store.as_ref()).await?;
        let log = hashgraph.log();

        let mut worker = Worker {
            hashgraph,
            store,
            keypair: keypair.clone(),
            unpersisted: VecDeque::new(),
            persisted,
        };
        worker.persist_records().await?;

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(worker.run(receiver));

        if !is_participant {
            warn!("Node {} is not in the participant set, running as observer", keypair.node_id());
        }

        Ok((
            Self {
                commands,
                log,
                name: config.name.clone(),
                node_id: keypair.node_id(),
                is_participant,
            },
            handle,
        ))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> HashweaveResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HashweaveError::ServiceStopped)?;
        response.await.map_err(|_| HashweaveError::ServiceStopped)
    }

    /// Offer a raw gossiped event
    pub async fn submit(&self, raw: Vec<u8>) -> HashweaveResult<Submission> {
        self.request(|reply| Command::Submit { raw, reply }).await?
    }

    /// Create, sign and insert the next event of this node.
    ///
    /// The first event has no parents. Later events extend the node's chain
    /// and take the latest event of `peer` as other-parent.
    pub async fn create_event(
        &self,
        peer: Option<PublicKey>,
        transactions: Vec<Vec<u8>>,
    ) -> HashweaveResult<Submission> {
        self.request(|reply| Command::CreateEvent {
            peer,
            transactions,
            reply,
        })
        .await?
    }

    /// Raw events a peer with `summary` lacks, parents first
    pub async fn sync(&self, summary: KnownSummary) -> HashweaveResult<Vec<Vec<u8>>> {
        self.request(|reply| Command::Sync { summary, reply }).await
    }

    pub async fn known_summary(&self) -> HashweaveResult<KnownSummary> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn stats(&self) -> HashweaveResult<ConsensusStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Stop the consensus task after flushing the store
    pub async fn shutdown(&self) -> HashweaveResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await?
    }

    /// Finalized order, readable without going through the consensus task
    pub fn log(&self) -> &ConsensusLog {
        &self.log
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn is_participant(&self) -> bool {
        self.is_participant
    }
}

/// Replay the stored event log and check it reproduces the stored order.
///
/// Returns the number of records already in the store.
async fn restore(hashgraph: &mut Hashgraph, store: &dyn ConsensusStore) -> HashweaveResult<u64> {
    let events = store.events().await?;
    for (position, raw) in events.iter().enumerate() {
        if let Submission::Deferred { hash, .. } = hashgraph.submit(raw)? {
            return Err(HashweaveError::StorageError(format!(
                "stored event {} at position {} is missing a parent",
                hash, position
            )));
        }
    }

    let stored = store.record_count().await?;
    let records = store.records_from(0, stored as usize).await?;
    let log = hashgraph.log();
    for record in &records {
        match log.get(record.index) {
            Some(replayed) if *replayed == *record => {}
            _ => return Err(HashweaveError::ConsensusDiverged { index: record.index }),
        }
    }
    if (records.len() as u64) < stored {
        return Err(HashweaveError::StorageError(format!(
            "expected {} stored records, found {}",
            stored,
            records.len()
        )));
    }

    if !events.is_empty() {
        info!(
            "Restored {} events, {} finalized ({} already stored)",
            events.len(),
            log.len(),
            stored
        );
    }
    Ok(stored)
}

struct Worker {
    hashgraph: Hashgraph,
    store: SharedConsensusStore,
    keypair: KeyPair,
    /// Accepted raw events not yet written, in insertion order
    unpersisted: VecDeque<Vec<u8>>,
    /// Records already written to the store
    persisted: u64,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut shutdown = None;
        while let Some(command) = commands.recv().await {
            match command {
                Command::Submit { raw, reply } => {
                    let _ = reply.send(self.submit(raw).await);
                }
                Command::CreateEvent {
                    peer,
                    transactions,
                    reply,
                } => {
                    let _ = reply.send(self.create_event(peer, transactions).await);
                }
                Command::Sync { summary, reply } => {
                    let _ = reply.send(self.hashgraph.events_unknown_to(&summary));
                }
                Command::Summary { reply } => {
                    let _ = reply.send(self.hashgraph.known_summary());
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.hashgraph.stats());
                }
                Command::Shutdown { reply } => {
                    shutdown = Some(reply);
                    break;
                }
            }
        }

        if let Err(e) = self.persist_pending().await {
            error!("{} accepted events left unstored: {}", self.unpersisted.len(), e);
        }
        let flushed = self.store.flush().await;
        if let Err(e) = &flushed {
            error!("Failed to flush store: {}", e);
        }
        if let Some(reply) = shutdown {
            let _ = reply.send(flushed);
        }
        info!("Consensus runtime stopped");
    }

    /// Insert a raw event. Nothing is inserted while earlier accepted events
    /// cannot be stored, so the stored log never has gaps.
    async fn submit(&mut self, raw: Vec<u8>) -> HashweaveResult<Submission> {
        self.persist_pending().await?;

        let submission = match self.hashgraph.submit(&raw) {
            Ok(submission) => submission,
            Err(e) => {
                if e.is_misbehaviour() {
                    warn!("Rejected event: {}", e);
                } else {
                    debug!("Rejected event: {}", e);
                }
                return Err(e.into());
            }
        };

        if let Submission::Accepted { released, .. } = &submission {
            self.unpersisted.push_back(raw);
            let released: Vec<Vec<u8>> = released
                .iter()
                .filter_map(|hash| self.hashgraph.event(hash))
                .map(|node| node.event().to_bytes())
                .collect();
            self.unpersisted.extend(released);
            self.persist_pending().await?;
        }
        Ok(submission)
    }

    /// Store queued events, then the records finalized so far.
    ///
    /// Records wait until every event before them is stored; replay could
    /// not reproduce them otherwise.
    async fn persist_pending(&mut self) -> HashweaveResult<()> {
        while let Some(raw) = self.unpersisted.front() {
            self.store.append_event(raw).await?;
            self.unpersisted.pop_front();
        }
        self.persist_records().await
    }

    async fn create_event(
        &mut self,
        peer: Option<PublicKey>,
        transactions: Vec<Vec<u8>>,
    ) -> HashweaveResult<Submission> {
        let creator = self.keypair.public_key();
        if !self.hashgraph.participants().contains(&creator) {
            return Err(HashweaveError::UnknownParticipant(creator.to_hex()));
        }

        let body = match self.hashgraph.head(&creator) {
            None => EventBody::initial(creator, Timestamp::now(), transactions),
            Some(head) => {
                let peer = peer.ok_or_else(|| {
                    HashweaveError::Internal("extending the chain needs a peer event".into())
                })?;
                let other = self
                    .hashgraph
                    .head(&peer)
                    .ok_or_else(|| HashweaveError::UnknownParticipant(peer.to_hex()))?;
                EventBody::new(
                    creator,
                    head.hash(),
                    other.hash(),
                    Timestamp::now().max(head.timestamp()),
                    transactions,
                )
            }
        };

        let event = Event::create(body, &self.keypair)?;
        debug!("Created event {}", event.hash());
        self.submit(event.to_bytes()).await
    }

    async fn persist_records(&mut self) -> HashweaveResult<()> {
        let fresh: Vec<ConsensusRecord> = self
            .hashgraph
            .log()
            .range(self.persisted, usize::MAX)
            .iter()
            .map(|record| ConsensusRecord::clone(record))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.store.append_records(&fresh).await?;
        self.persisted += fresh.len() as u64;
        debug!("Stored {} finalized records", fresh.len());
        Ok(())
    }
}
