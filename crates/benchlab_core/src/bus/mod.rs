//! In-process sync bus: peer registry, fan-out and intent tracking.
//!
//! # Responsibility
//! - Hand out peers with a private inbox and broadcast frames between them.
//! - Track sent intents and fold incoming acks into an outcome per intent.
//!
//! # Invariants
//! - Bus failures never reach callers as errors: undeliverable frames are
//!   logged and dropped, and a dead peer is pruned on first failed send.
//! - A sender never receives its own frames.
//! - Frames from one sender arrive at each peer in send order.
//!
//! # See also
//! - docs/architecture/sync-bus.md

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub mod protocol;

use crate::store::object::ObjectDelta;
use protocol::{
    decode_message, encode_message, BusMessage, CommitNotice, IntentEnvelope, IntentId,
    IntentPayload, PeerId,
};

/// Resolution of one sent intent, aggregated over all receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    /// Not every receiver has answered yet.
    Pending,
    /// At least one receiver handled the request.
    Accepted,
    /// Every receiver answered and none handled it, or nobody was listening.
    Ignored,
}

/// Shared hub connecting every peer of one process family.
///
/// Clones share the same registry, so a host and its mirrors each keep a
/// handle while exchanging frames through the same state.
#[derive(Clone, Default)]
pub struct SyncBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    peers: HashMap<PeerId, Sender<Vec<u8>>>,
}

impl SyncBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new peer and returns its handle.
    pub fn join(&self) -> BusPeer {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel();
        let peers = {
            let mut state = self.lock_state();
            state.peers.insert(id, tx);
            state.peers.len()
        };
        debug!("event=bus_join module=bus peer={id} peers={peers}");
        BusPeer {
            id,
            rx,
            bus: self.clone(),
            pending: HashMap::new(),
        }
    }

    /// Number of currently attached peers.
    pub fn peer_count(&self) -> usize {
        self.lock_state().peers.len()
    }

    /// Delivers a frame to every peer except the sender.
    ///
    /// Returns how many inboxes accepted the frame. Peers whose inbox is
    /// gone are pruned here.
    fn broadcast_from(&self, sender: PeerId, bytes: &[u8]) -> usize {
        let mut state = self.lock_state();
        let mut delivered = 0usize;
        let mut dead: Vec<PeerId> = Vec::new();
        for (peer, inbox) in &state.peers {
            if *peer == sender {
                continue;
            }
            if inbox.send(bytes.to_vec()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*peer);
            }
        }
        for peer in dead {
            state.peers.remove(&peer);
            warn!("event=bus_send module=bus status=drop peer={peer}");
        }
        delivered
    }

    fn leave(&self, id: PeerId) {
        let mut state = self.lock_state();
        if state.peers.remove(&id).is_some() {
            debug!(
                "event=bus_leave module=bus peer={id} peers={}",
                state.peers.len()
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingIntent {
    expected: usize,
    received: usize,
    accepted: bool,
}

/// One attached peer: an identity, an inbox and an intent ledger.
pub struct BusPeer {
    id: PeerId,
    rx: Receiver<Vec<u8>>,
    bus: SyncBus,
    pending: HashMap<IntentId, PendingIntent>,
}

impl BusPeer {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Broadcasts one committed transaction for one store.
    ///
    /// Returns the number of peers the notice reached.
    pub fn send_commit(&self, store: &str, label: &str, deltas: Vec<ObjectDelta>) -> usize {
        let message = BusMessage::Commit(CommitNotice {
            sender: self.id,
            store: store.to_string(),
            label: label.to_string(),
            deltas,
        });
        self.send_frame(&message)
    }

    /// Broadcasts one intent and starts tracking its acks.
    pub fn send_intent(&mut self, payload: IntentPayload) -> IntentId {
        let intent_id = Uuid::new_v4();
        let message = BusMessage::Intent(IntentEnvelope {
            sender: self.id,
            intent_id,
            payload,
        });
        let expected = self.send_frame(&message);
        self.pending.insert(
            intent_id,
            PendingIntent {
                expected,
                received: 0,
                accepted: false,
            },
        );
        intent_id
    }

    /// Answers a received intent.
    pub fn send_ack(&self, of: IntentId, accepted: bool) {
        let message = BusMessage::Intent(IntentEnvelope {
            sender: self.id,
            intent_id: Uuid::new_v4(),
            payload: IntentPayload::Ack { of, accepted },
        });
        self.send_frame(&message);
    }

    /// Takes the next frame from the inbox, if any.
    ///
    /// Acks addressed to this peer's intents are folded into the ledger and
    /// never surfaced; undecodable frames are logged and skipped.
    pub fn poll(&mut self) -> Option<BusMessage> {
        loop {
            let bytes = match self.rx.try_recv() {
                Ok(bytes) => bytes,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            };
            match decode_message(&bytes) {
                Ok(BusMessage::Intent(envelope)) => {
                    if let IntentPayload::Ack { of, accepted } = envelope.payload {
                        self.record_ack(of, accepted);
                        continue;
                    }
                    return Some(BusMessage::Intent(envelope));
                }
                Ok(message) => return Some(message),
                Err(err) => {
                    warn!("event=bus_decode module=bus status=error peer={} error={err}", self.id);
                }
            }
        }
    }

    /// Current aggregate answer for one of this peer's intents.
    pub fn intent_outcome(&self, intent: IntentId) -> IntentOutcome {
        let Some(pending) = self.pending.get(&intent) else {
            return IntentOutcome::Ignored;
        };
        if pending.accepted {
            return IntentOutcome::Accepted;
        }
        if pending.received >= pending.expected {
            return IntentOutcome::Ignored;
        }
        IntentOutcome::Pending
    }

    fn record_ack(&mut self, of: IntentId, accepted: bool) {
        if let Some(pending) = self.pending.get_mut(&of) {
            pending.received += 1;
            if accepted {
                pending.accepted = true;
            }
        }
    }

    fn send_frame(&self, message: &BusMessage) -> usize {
        let bytes = match encode_message(message) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("event=bus_encode module=bus status=error peer={} error={err}", self.id);
                return 0;
            }
        };
        self.bus.broadcast_from(self.id, &bytes)
    }
}

impl Drop for BusPeer {
    fn drop(&mut self) {
        self.bus.leave(self.id);
    }
}
