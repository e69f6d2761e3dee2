//! The store mirror: a read-only peer fed entirely by the bus.
//!
//! # Responsibility
//! - Keep typed collections current from commit notices, without ever
//!   touching the database file.
//! - Send mutation wishes (delete, focus, refresh) to the host as intents.
//!
//! # Invariants
//! - A mirror never opens the store file; its registrations only validate
//!   definitions so deltas can be materialized.
//! - A freshly watched collection starts empty and fills when the host
//!   answers the refresh intent sent on watch.
//! - Incoming intents a mirror cannot serve are answered with a declining
//!   ack, never dropped silently.
//!
//! # See also
//! - docs/architecture/sync-bus.md

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Weak;

use crate::bus::protocol::{BusMessage, IntentEnvelope, IntentId, IntentPayload, PeerId};
use crate::bus::{BusPeer, IntentOutcome};
use crate::collection::{self, Collection, DeltaSink};
use crate::store::object::{ObjectId, RowFilter, StoreObject};
use crate::store::{SchemaError, SchemaResult, StoreDefinition, StoreError, StoreResult};

type FocusHandler = Box<dyn FnMut(&str, ObjectId) -> bool>;

/// Read-side peer of one store family.
pub struct StoreMirror {
    definitions: HashMap<String, StoreDefinition>,
    sinks: Vec<Weak<dyn DeltaSink>>,
    peer: BusPeer,
    focus_handler: Option<FocusHandler>,
}

impl StoreMirror {
    /// Wraps a joined bus peer into a mirror.
    pub fn new(peer: BusPeer) -> Self {
        Self {
            definitions: HashMap::new(),
            sinks: Vec::new(),
            peer,
            focus_handler: None,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.id()
    }

    /// Declares a store this mirror wants to materialize.
    ///
    /// Only validates the definition; migrations are the host's business.
    pub fn register_store(&mut self, definition: StoreDefinition) -> SchemaResult<()> {
        definition
            .validate()
            .map_err(|reason| SchemaError::InvalidDefinition {
                store: definition.store_name.clone(),
                reason,
            })?;
        if self.definitions.contains_key(&definition.store_name) {
            return Err(SchemaError::InvalidDefinition {
                store: definition.store_name.clone(),
                reason: "store is already registered".to_string(),
            });
        }
        debug!(
            "event=store_register module=mirror store={}",
            definition.store_name
        );
        self.definitions
            .insert(definition.store_name.clone(), definition);
        Ok(())
    }

    /// Starts an initially empty live collection and asks the host to
    /// rebroadcast the store so it fills.
    pub fn watch<T: StoreObject + 'static>(
        &mut self,
        filter: RowFilter,
    ) -> StoreResult<Collection<T>> {
        let definition = self
            .definitions
            .get(T::store_name())
            .ok_or_else(|| StoreError::UnknownStore(T::store_name().to_string()))?
            .clone();
        let collection = Collection::from_rows(definition, filter, Vec::new())?;
        self.sinks.push(collection.downgrade_sink());
        let intent = self.peer.send_intent(IntentPayload::RequestRefresh {
            store: T::store_name().to_string(),
        });
        debug!(
            "event=watch module=mirror store={} filter={filter:?} refresh_intent={intent}",
            T::store_name()
        );
        Ok(collection)
    }

    /// Detaches a collection and prunes it from the sink list.
    pub fn unwatch<T: StoreObject + 'static>(&mut self, collection: &Collection<T>) {
        collection.detach();
        self.sinks.retain(|weak| {
            weak.upgrade()
                .map_or(false, |sink| !sink.is_detached())
        });
    }

    /// Asks the host to soft-delete objects. Track the answer with
    /// [`StoreMirror::intent_outcome`].
    pub fn request_delete(&mut self, store: &str, ids: Vec<ObjectId>) -> IntentId {
        self.peer.send_intent(IntentPayload::DeleteObjects {
            store: store.to_string(),
            ids,
        })
    }

    /// Asks other peers to focus an editor for the object.
    pub fn request_focus(&mut self, store: &str, id: ObjectId) -> IntentId {
        self.peer.send_intent(IntentPayload::FocusEditor {
            store: store.to_string(),
            id,
        })
    }

    /// Asks the host to rebroadcast a store's full contents.
    pub fn request_refresh(&mut self, store: &str) -> IntentId {
        self.peer.send_intent(IntentPayload::RequestRefresh {
            store: store.to_string(),
        })
    }

    /// Aggregate answer for an intent this mirror sent earlier.
    pub fn intent_outcome(&self, intent: IntentId) -> IntentOutcome {
        self.peer.intent_outcome(intent)
    }

    /// Installs the handler invoked when a peer asks to focus an editor.
    pub fn on_focus_editor(&mut self, handler: impl FnMut(&str, ObjectId) -> bool + 'static) {
        self.focus_handler = Some(Box::new(handler));
    }

    /// Drains the bus inbox, applying commits and answering intents.
    pub fn process_messages(&mut self) -> usize {
        let mut handled = 0usize;
        while let Some(message) = self.peer.poll() {
            handled += 1;
            match message {
                BusMessage::Commit(notice) => {
                    debug!(
                        "event=bus_commit_apply module=mirror store={} label={} deltas={}",
                        notice.store,
                        notice.label,
                        notice.deltas.len()
                    );
                    collection::notify_sinks(&mut self.sinks, &notice.deltas);
                }
                BusMessage::Intent(envelope) => self.handle_intent(envelope),
            }
        }
        handled
    }

    fn handle_intent(&mut self, envelope: IntentEnvelope) {
        match envelope.payload {
            IntentPayload::FocusEditor { store, id } => {
                let accepted = match self.focus_handler.as_mut() {
                    Some(handler) => handler(&store, id),
                    None => false,
                };
                self.peer.send_ack(envelope.intent_id, accepted);
            }
            IntentPayload::DeleteObjects { store, .. } | IntentPayload::RequestRefresh { store } => {
                // Only the host can serve these.
                warn!(
                    "event=bus_intent module=mirror store={store} status=decline reason=read_only"
                );
                self.peer.send_ack(envelope.intent_id, false);
            }
            IntentPayload::Ack { .. } => {
                // Acks are folded into the intent ledger during poll.
            }
        }
    }
}
