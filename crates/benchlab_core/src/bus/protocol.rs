//! Wire format for messages exchanged over the sync bus.
//!
//! # Responsibility
//! - Define the commit and intent payloads peers exchange.
//! - Encode and decode messages as self-describing JSON frames.
//!
//! # Invariants
//! - Every frame carries a `kind` tag; unknown frames fail decoding and are
//!   dropped by the receiver, never bubbled to callers.
//! - Commit notices describe durable facts. Intents are requests and carry
//!   an identifier so acks can be matched to them.
//!
//! # See also
//! - docs/architecture/sync-bus.md

use crate::store::object::{ObjectDelta, ObjectId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one attached peer, unique per bus join.
pub type PeerId = Uuid;

/// Identity of one sent intent, used to correlate acks.
pub type IntentId = Uuid;

/// One frame on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    /// A transaction was durably committed on the host.
    Commit(CommitNotice),
    /// A peer asks another peer to do something.
    Intent(IntentEnvelope),
}

/// Broadcast describing one committed transaction, one store at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitNotice {
    pub sender: PeerId,
    pub store: String,
    pub label: String,
    pub deltas: Vec<ObjectDelta>,
}

/// A request from one peer, answered by at most one ack per receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentEnvelope {
    pub sender: PeerId,
    pub intent_id: IntentId,
    pub payload: IntentPayload,
}

/// The request kinds peers understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum IntentPayload {
    /// Bring an editor for the object into view.
    FocusEditor { store: String, id: ObjectId },
    /// Ask the host to soft-delete the listed objects.
    DeleteObjects { store: String, ids: Vec<ObjectId> },
    /// Ask the host to rebroadcast the full contents of a store.
    RequestRefresh { store: String },
    /// Answer to a prior intent: handled (`accepted`) or declined.
    Ack { of: IntentId, accepted: bool },
}

/// Encodes one message as a JSON frame.
pub fn encode_message(message: &BusMessage) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(message)
}

/// Decodes one JSON frame.
pub fn decode_message(bytes: &[u8]) -> serde_json::Result<BusMessage> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::{decode_message, encode_message, BusMessage, CommitNotice, IntentEnvelope, IntentPayload};
    use crate::store::object::{DeltaKind, ObjectDelta};
    use crate::store::property::{prop_map, PropertyValue};
    use uuid::Uuid;

    #[test]
    fn commit_frames_carry_a_kind_tag() {
        let message = BusMessage::Commit(CommitNotice {
            sender: Uuid::new_v4(),
            store: "bench/gauges".to_string(),
            label: "add gauge".to_string(),
            deltas: vec![ObjectDelta {
                store: "bench/gauges".to_string(),
                id: 1,
                kind: DeltaKind::Created,
                values: prop_map([("label", PropertyValue::from("volts"))]),
            }],
        });

        let bytes = encode_message(&message).unwrap();
        let frame: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(frame["kind"], "commit");
        assert_eq!(frame["deltas"][0]["kind"], "created");

        match decode_message(&bytes).unwrap() {
            BusMessage::Commit(notice) => {
                assert_eq!(notice.label, "add gauge");
                assert_eq!(notice.deltas.len(), 1);
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn intent_frames_nest_a_tagged_payload() {
        let of = Uuid::new_v4();
        let message = BusMessage::Intent(IntentEnvelope {
            sender: Uuid::new_v4(),
            intent_id: Uuid::new_v4(),
            payload: IntentPayload::Ack { of, accepted: true },
        });

        let bytes = encode_message(&message).unwrap();
        let frame: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(frame["kind"], "intent");
        assert_eq!(frame["payload"]["intent"], "ack");

        match decode_message(&bytes).unwrap() {
            BusMessage::Intent(envelope) => match envelope.payload {
                IntentPayload::Ack { of: matched, accepted } => {
                    assert_eq!(matched, of);
                    assert!(accepted);
                }
                other => panic!("expected ack, got {other:?}"),
            },
            other => panic!("expected intent, got {other:?}"),
        }
    }

    #[test]
    fn unknown_frames_fail_to_decode() {
        assert!(decode_message(br#"{"kind":"gossip"}"#).is_err());
        assert!(decode_message(b"not json at all").is_err());
    }
}
