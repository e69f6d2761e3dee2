//! The store host: exclusive owner of the database file.
//!
//! # Responsibility
//! - Register stores and run their migrations before any row access.
//! - Buffer labeled transactions, apply them atomically and keep the
//!   process-local undo/redo stacks.
//! - Feed watched collections and broadcast commit notices over the bus.
//! - Answer intents from mirror peers.
//!
//! # Invariants
//! - At most one transaction is open at a time; mutations outside one fail.
//! - Identifiers are assigned at `create` and never reused, even when the
//!   transaction rolls back or an undo removes the row.
//! - Every commit clears the redo stack; only undoable commits join the
//!   undo stack.
//! - Collections and bus peers observe exactly the deltas of applied
//!   changes, in application order.
//!
//! # See also
//! - docs/architecture/transactions.md
//! - docs/architecture/sync-bus.md

use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Weak;
use std::time::Instant;

pub(crate) mod mapper;
pub(crate) mod txn;

pub use txn::TransactionOptions;

use crate::bus::protocol::{BusMessage, IntentEnvelope, IntentId, IntentPayload, PeerId};
use crate::bus::{BusPeer, IntentOutcome};
use crate::collection::{self, Collection, DeltaSink};
use crate::db::{self, DbError};
use crate::store::object::{DeltaKind, ObjectDelta, ObjectId, RowFilter, StoreObject};
use crate::store::property::{prop_bool_or, prop_i64, with_transient_defaults, PropertyMap, PropertyValue};
use crate::store::{SchemaError, SchemaResult, StoreDefinition, StoreError, StoreResult};
use txn::{ActiveTransaction, CommittedTransaction, RowOp};

pub(crate) struct RegisteredStore {
    pub(crate) definition: StoreDefinition,
    pub(crate) next_id: ObjectId,
}

/// Handler invoked when another peer asks this process to focus an editor.
type FocusHandler = Box<dyn FnMut(&str, ObjectId) -> bool>;

/// Exclusive owner of one store file and its undo history.
pub struct StoreHost {
    conn: Connection,
    stores: HashMap<String, RegisteredStore>,
    active: Option<ActiveTransaction>,
    undo_stack: Vec<CommittedTransaction>,
    redo_stack: Vec<CommittedTransaction>,
    sinks: Vec<Weak<dyn DeltaSink>>,
    peer: Option<BusPeer>,
    focus_handler: Option<FocusHandler>,
}

impl std::fmt::Debug for StoreHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHost").finish_non_exhaustive()
    }
}

impl StoreHost {
    /// Opens (or creates) a store file and claims exclusive ownership.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Ok(Self::from_connection(db::open_db(path)?))
    }

    /// Opens a private in-memory store, mainly for tests and tooling.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::from_connection(db::open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            stores: HashMap::new(),
            active: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            sinks: Vec::new(),
            peer: None,
            focus_handler: None,
        }
    }

    /// Registers a store and migrates it to the newest known version.
    ///
    /// Must complete before any row access for that store; a failed
    /// registration leaves the store unusable on this host.
    pub fn register_store(&mut self, definition: StoreDefinition) -> SchemaResult<()> {
        let started_at = Instant::now();
        definition
            .validate()
            .map_err(|reason| SchemaError::InvalidDefinition {
                store: definition.store_name.clone(),
                reason,
            })?;
        if self.stores.contains_key(&definition.store_name) {
            return Err(SchemaError::InvalidDefinition {
                store: definition.store_name.clone(),
                reason: "store is already registered".to_string(),
            });
        }

        crate::store::migrate::run(&mut self.conn, &definition)?;
        let next_id = mapper::seed_next_id(&self.conn, &definition)?;

        info!(
            "event=store_register module=host status=ok store={} version={} next_id={next_id} duration_ms={}",
            definition.store_name,
            definition.latest_version(),
            started_at.elapsed().as_millis()
        );
        self.stores.insert(
            definition.store_name.clone(),
            RegisteredStore {
                definition,
                next_id,
            },
        );
        Ok(())
    }

    /// Definitions of every registered store, in no particular order.
    pub fn store_definitions(&self) -> impl Iterator<Item = &StoreDefinition> {
        self.stores.values().map(|registered| &registered.definition)
    }

    /// Opens a labeled, undoable transaction.
    pub fn begin(&mut self, label: &str) -> StoreResult<()> {
        self.begin_with(label, TransactionOptions::default())
    }

    /// Opens a labeled transaction with explicit options.
    pub fn begin_with(&mut self, label: &str, options: TransactionOptions) -> StoreResult<()> {
        if let Some(active) = &self.active {
            return Err(StoreError::Concurrency {
                open_label: active.label.clone(),
            });
        }
        if label.trim().is_empty() {
            return Err(StoreError::Validation(
                "transaction label cannot be empty".to_string(),
            ));
        }
        debug!("event=txn_begin module=host label={label} undoable={}", options.undoable);
        self.active = Some(ActiveTransaction::new(label, options));
        Ok(())
    }

    /// Buffers the creation of one object and returns its identifier.
    ///
    /// The identifier is consumed immediately: it stays burned even if the
    /// transaction later rolls back.
    pub fn create(&mut self, store: &str, props: &PropertyMap) -> StoreResult<ObjectId> {
        if self.active.is_none() {
            return Err(StoreError::NoActiveTransaction);
        }
        let (op, id) = {
            let registered = self
                .stores
                .get_mut(store)
                .ok_or_else(|| StoreError::UnknownStore(store.to_string()))?;
            let mut values = mapper::validate_create(&registered.definition, props)?;
            let id = registered.next_id;
            registered.next_id += 1;
            values.insert(
                registered.definition.id_column().to_string(),
                PropertyValue::Integer(id),
            );
            (
                RowOp::Insert {
                    store: store.to_string(),
                    id,
                    values,
                },
                id,
            )
        };
        self.buffer_op(op)?;
        Ok(id)
    }

    /// Buffers a column-level update of one object.
    pub fn update(&mut self, store: &str, id: ObjectId, changes: &PropertyMap) -> StoreResult<()> {
        if self.active.is_none() {
            return Err(StoreError::NoActiveTransaction);
        }
        let registered = self
            .stores
            .get(store)
            .ok_or_else(|| StoreError::UnknownStore(store.to_string()))?;
        let changes = mapper::validate_patch(&registered.definition, changes)?;
        self.buffer_op(RowOp::Patch {
            store: store.to_string(),
            id,
            changes,
        })
    }

    /// Buffers a soft delete: the row stays, its `deleted` flag is raised.
    pub fn delete(&mut self, store: &str, id: ObjectId) -> StoreResult<()> {
        self.flag_deleted(store, id, true)
    }

    /// Buffers the recovery of a soft-deleted row.
    pub fn undelete(&mut self, store: &str, id: ObjectId) -> StoreResult<()> {
        self.flag_deleted(store, id, false)
    }

    fn flag_deleted(&mut self, store: &str, id: ObjectId, deleted: bool) -> StoreResult<()> {
        if self.active.is_none() {
            return Err(StoreError::NoActiveTransaction);
        }
        let registered = self
            .stores
            .get(store)
            .ok_or_else(|| StoreError::UnknownStore(store.to_string()))?;
        let mut changes = PropertyMap::new();
        changes.insert(
            registered.definition.deleted_column().to_string(),
            PropertyValue::Bool(deleted),
        );
        self.buffer_op(RowOp::Patch {
            store: store.to_string(),
            id,
            changes,
        })
    }

    fn buffer_op(&mut self, op: RowOp) -> StoreResult<()> {
        match self.active.as_mut() {
            Some(active) => {
                active.ops.push(op);
                Ok(())
            }
            None => Err(StoreError::NoActiveTransaction),
        }
    }

    /// Applies the open transaction atomically and publishes its deltas.
    ///
    /// An empty transaction commits as a no-op: nothing is written, no
    /// deltas are published and the undo history is untouched. On failure
    /// nothing is persisted and the transaction stays open, so the caller
    /// decides between retry and rollback.
    pub fn commit(&mut self) -> StoreResult<Vec<ObjectDelta>> {
        let active = self.active.take().ok_or(StoreError::NoActiveTransaction)?;
        if active.ops.is_empty() {
            debug!("event=txn_commit module=host label={} ops=0 status=noop", active.label);
            return Ok(Vec::new());
        }

        let started_at = Instant::now();
        let (deltas, inverses) =
            match mapper::apply_change_set(&mut self.conn, &self.stores, &active.ops) {
                Ok(applied) => applied,
                Err(err) => {
                    error!(
                        "event=txn_commit module=host status=error label={} error={err}",
                        active.label
                    );
                    self.active = Some(active);
                    return Err(err);
                }
            };

        let record = CommittedTransaction::new(active.label, active.options, active.ops, inverses);
        let label = record.label.clone();
        info!(
            "event=txn_commit module=host status=ok label={label} ops={} undoable={} duration_ms={}",
            record.forward.len(),
            record.options.undoable,
            started_at.elapsed().as_millis()
        );

        self.redo_stack.clear();
        if record.options.undoable {
            self.undo_stack.push(record);
        }
        self.publish_deltas(&label, &deltas);
        Ok(deltas)
    }

    /// Discards the open transaction without touching the database.
    ///
    /// Identifiers handed out by `create` stay consumed.
    pub fn rollback(&mut self) -> StoreResult<()> {
        let active = self.active.take().ok_or(StoreError::NoActiveTransaction)?;
        debug!(
            "event=txn_rollback module=host label={} ops={}",
            active.label,
            active.ops.len()
        );
        Ok(())
    }

    /// Reverts the newest undoable commit. Returns `false` on an empty stack.
    pub fn undo(&mut self) -> StoreResult<bool> {
        if let Some(active) = &self.active {
            return Err(StoreError::Concurrency {
                open_label: active.label.clone(),
            });
        }
        let Some(record) = self.undo_stack.pop() else {
            debug!("event=txn_undo module=host status=noop");
            return Ok(false);
        };
        match mapper::apply_change_set(&mut self.conn, &self.stores, &record.inverse) {
            Ok((deltas, _)) => {
                info!(
                    "event=txn_undo module=host status=ok label={} committed_at_ms={}",
                    record.label, record.committed_at_ms
                );
                let label = record.label.clone();
                self.redo_stack.push(record);
                self.publish_deltas(&label, &deltas);
                Ok(true)
            }
            Err(err) => {
                error!(
                    "event=txn_undo module=host status=error label={} error={err}",
                    record.label
                );
                self.undo_stack.push(record);
                Err(err)
            }
        }
    }

    /// Reapplies the newest undone commit. Returns `false` on an empty stack.
    pub fn redo(&mut self) -> StoreResult<bool> {
        if let Some(active) = &self.active {
            return Err(StoreError::Concurrency {
                open_label: active.label.clone(),
            });
        }
        let Some(record) = self.redo_stack.pop() else {
            debug!("event=txn_redo module=host status=noop");
            return Ok(false);
        };
        match mapper::apply_change_set(&mut self.conn, &self.stores, &record.forward) {
            Ok((deltas, _)) => {
                info!(
                    "event=txn_redo module=host status=ok label={} committed_at_ms={}",
                    record.label, record.committed_at_ms
                );
                let label = record.label.clone();
                self.undo_stack.push(record);
                self.publish_deltas(&label, &deltas);
                Ok(true)
            }
            Err(err) => {
                error!(
                    "event=txn_redo module=host status=error label={} error={err}",
                    record.label
                );
                self.redo_stack.push(record);
                Err(err)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Label of the commit `undo` would revert next.
    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.last().map(|record| record.label.as_str())
    }

    /// Label of the commit `redo` would reapply next.
    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.last().map(|record| record.label.as_str())
    }

    /// Label of the currently open transaction, if any.
    pub fn transaction_label(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.label.as_str())
    }

    /// Runs `body` inside a fresh undoable transaction.
    pub fn transact<R>(
        &mut self,
        label: &str,
        body: impl FnOnce(&mut Self) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.transact_with(label, TransactionOptions::default(), body)
    }

    /// Runs `body` inside a fresh transaction with explicit options.
    ///
    /// Commits on success; rolls back when either the body or the commit
    /// fails, so no transaction is left open behind the caller's back.
    pub fn transact_with<R>(
        &mut self,
        label: &str,
        options: TransactionOptions,
        body: impl FnOnce(&mut Self) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.begin_with(label, options)?;
        let outcome = body(self).and_then(|value| self.commit().map(|_| value));
        if outcome.is_err() {
            if let Err(rollback_err) = self.rollback() {
                warn!("event=txn_rollback module=host status=error error={rollback_err}");
            }
        }
        outcome
    }

    /// Lint-style check that no transaction is left open.
    ///
    /// Call at UI idle points; an open transaction there is a programming
    /// error worth failing loudly over.
    pub fn assert_no_open_transaction(&self) -> StoreResult<()> {
        if let Some(active) = &self.active {
            error!("event=txn_leak module=host label={}", active.label);
            return Err(StoreError::Concurrency {
                open_label: active.label.clone(),
            });
        }
        Ok(())
    }

    /// Reads one object, skipping soft-deleted rows unless asked not to.
    pub fn get<T: StoreObject>(&self, id: ObjectId, include_deleted: bool) -> StoreResult<T> {
        let props = self.get_props(T::store_name(), id, include_deleted)?;
        T::from_props(&props)
    }

    /// Reads one row as a property map, transient defaults included.
    pub fn get_props(
        &self,
        store: &str,
        id: ObjectId,
        include_deleted: bool,
    ) -> StoreResult<PropertyMap> {
        let registered = self
            .stores
            .get(store)
            .ok_or_else(|| StoreError::UnknownStore(store.to_string()))?;
        let row = mapper::read_row(&self.conn, &registered.definition, id)?.ok_or_else(|| {
            StoreError::NotFound {
                store: store.to_string(),
                id,
            }
        })?;
        let deleted = prop_bool_or(&row, registered.definition.deleted_column(), false)?;
        if deleted && !include_deleted {
            return Err(StoreError::NotFound {
                store: store.to_string(),
                id,
            });
        }
        Ok(with_transient_defaults(&registered.definition, row))
    }

    /// Reads every object passing the filter, ordered by identifier.
    pub fn list<T: StoreObject>(&self, filter: RowFilter) -> StoreResult<Vec<T>> {
        let registered = self
            .stores
            .get(T::store_name())
            .ok_or_else(|| StoreError::UnknownStore(T::store_name().to_string()))?;
        let rows = mapper::select_rows(&self.conn, &registered.definition, filter)?;
        rows.into_iter()
            .map(|row| T::from_props(&with_transient_defaults(&registered.definition, row)))
            .collect()
    }

    /// Reads every row passing the filter as property maps.
    pub fn list_props(&self, store: &str, filter: RowFilter) -> StoreResult<Vec<PropertyMap>> {
        let registered = self
            .stores
            .get(store)
            .ok_or_else(|| StoreError::UnknownStore(store.to_string()))?;
        let rows = mapper::select_rows(&self.conn, &registered.definition, filter)?;
        Ok(rows
            .into_iter()
            .map(|row| with_transient_defaults(&registered.definition, row))
            .collect())
    }

    /// Starts a live collection over one store.
    ///
    /// The host keeps a weak handle; drop or `unwatch` the collection to
    /// stop it.
    pub fn watch<T: StoreObject + 'static>(
        &mut self,
        filter: RowFilter,
    ) -> StoreResult<Collection<T>> {
        let registered = self
            .stores
            .get(T::store_name())
            .ok_or_else(|| StoreError::UnknownStore(T::store_name().to_string()))?;
        let rows = mapper::select_rows(&self.conn, &registered.definition, filter)?;
        let collection = Collection::from_rows(registered.definition.clone(), filter, rows)?;
        self.sinks.push(collection.downgrade_sink());
        debug!(
            "event=watch module=host store={} filter={filter:?} rows={}",
            T::store_name(),
            collection.len()
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

    /// Connects this host to a sync bus peer handle.
    pub fn attach_bus(&mut self, peer: BusPeer) {
        info!("event=bus_attach module=host peer={}", peer.id());
        self.peer = Some(peer);
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer.as_ref().map(BusPeer::id)
    }

    /// Asks other peers to focus an editor for the object.
    ///
    /// Returns `None` when no bus is attached. Poll `process_messages` on
    /// both sides, then read the outcome with [`StoreHost::intent_outcome`].
    pub fn request_focus(&mut self, store: &str, id: ObjectId) -> Option<IntentId> {
        let peer = self.peer.as_mut()?;
        Some(peer.send_intent(IntentPayload::FocusEditor {
            store: store.to_string(),
            id,
        }))
    }

    /// Aggregate answer for an intent this host sent earlier.
    pub fn intent_outcome(&self, intent: IntentId) -> IntentOutcome {
        self.peer
            .as_ref()
            .map_or(IntentOutcome::Ignored, |peer| peer.intent_outcome(intent))
    }

    /// Installs the handler invoked when a peer asks to focus an editor.
    ///
    /// The handler returns whether it actually brought an editor into view;
    /// that answer becomes the ack.
    pub fn on_focus_editor(&mut self, handler: impl FnMut(&str, ObjectId) -> bool + 'static) {
        self.focus_handler = Some(Box::new(handler));
    }

    /// Drains the bus inbox, handling every pending frame.
    ///
    /// Never fails: a frame that cannot be handled is logged, answered
    /// with a declining ack where one is expected, and dropped.
    pub fn process_messages(&mut self) -> usize {
        let mut handled = 0usize;
        loop {
            let Some(peer) = self.peer.as_mut() else {
                return handled;
            };
            let Some(message) = peer.poll() else {
                return handled;
            };
            handled += 1;
            match message {
                BusMessage::Commit(notice) => {
                    // The host is the only writer; foreign commit notices
                    // are informational.
                    debug!(
                        "event=bus_commit_notice module=host store={} label={}",
                        notice.store, notice.label
                    );
                }
                BusMessage::Intent(envelope) => self.handle_intent(envelope),
            }
        }
    }

    fn handle_intent(&mut self, envelope: IntentEnvelope) {
        match envelope.payload {
            IntentPayload::FocusEditor { store, id } => {
                let accepted = match self.focus_handler.as_mut() {
                    Some(handler) => handler(&store, id),
                    None => false,
                };
                self.send_ack(envelope.intent_id, accepted);
            }
            IntentPayload::DeleteObjects { store, ids } => {
                let result = self.transact("Delete objects", |host| {
                    for id in &ids {
                        host.delete(&store, *id)?;
                    }
                    Ok(())
                });
                let accepted = match result {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            "event=bus_intent module=host intent=delete_objects store={store} status=error error={err}"
                        );
                        false
                    }
                };
                self.send_ack(envelope.intent_id, accepted);
            }
            IntentPayload::RequestRefresh { store } => {
                let accepted = self.broadcast_refresh(&store);
                self.send_ack(envelope.intent_id, accepted);
            }
            IntentPayload::Ack { .. } => {
                // Acks are folded into the intent ledger during poll.
            }
        }
    }

    fn send_ack(&self, of: IntentId, accepted: bool) {
        if let Some(peer) = self.peer.as_ref() {
            peer.send_ack(of, accepted);
        }
    }

    /// Rebroadcasts the full contents of one store as created deltas.
    ///
    /// Receivers upsert, so a refresh is idempotent for them.
    fn broadcast_refresh(&mut self, store: &str) -> bool {
        let Some(registered) = self.stores.get(store) else {
            warn!("event=bus_refresh module=host status=unknown_store store={store}");
            return false;
        };
        let rows = match mapper::select_rows(&self.conn, &registered.definition, RowFilter::All) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("event=bus_refresh module=host status=error store={store} error={err}");
                return false;
            }
        };
        let id_column = registered.definition.id_column().to_string();
        let mut deltas = Vec::with_capacity(rows.len());
        for values in rows {
            match prop_i64(&values, &id_column) {
                Ok(id) => deltas.push(ObjectDelta {
                    store: store.to_string(),
                    id,
                    kind: DeltaKind::Created,
                    values,
                }),
                Err(err) => {
                    warn!("event=bus_refresh module=host status=skip store={store} error={err}");
                }
            }
        }
        let Some(peer) = self.peer.as_ref() else {
            return false;
        };
        let sent = peer.send_commit(store, "refresh", deltas);
        debug!("event=bus_refresh module=host status=ok store={store} peers={sent}");
        true
    }

    /// Delivers freshly applied deltas to collections and the bus.
    fn publish_deltas(&mut self, label: &str, deltas: &[ObjectDelta]) {
        if deltas.is_empty() {
            return;
        }
        collection::notify_sinks(&mut self.sinks, deltas);
        if let Some(peer) = self.peer.as_ref() {
            for (store, group) in group_deltas_by_store(deltas) {
                peer.send_commit(&store, label, group);
            }
        }
    }
}

/// Splits a mixed delta list into per-store notices, first-seen order.
fn group_deltas_by_store(deltas: &[ObjectDelta]) -> Vec<(String, Vec<ObjectDelta>)> {
    let mut groups: Vec<(String, Vec<ObjectDelta>)> = Vec::new();
    for delta in deltas {
        match groups.iter_mut().find(|(store, _)| *store == delta.store) {
            Some((_, group)) => group.push(delta.clone()),
            None => groups.push((delta.store.clone(), vec![delta.clone()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::group_deltas_by_store;
    use crate::store::object::{DeltaKind, ObjectDelta};
    use crate::store::property::PropertyMap;

    fn delta(store: &str, id: i64) -> ObjectDelta {
        ObjectDelta {
            store: store.to_string(),
            id,
            kind: DeltaKind::Created,
            values: PropertyMap::new(),
        }
    }

    #[test]
    fn grouping_preserves_first_seen_store_order() {
        let deltas = vec![delta("b", 1), delta("a", 2), delta("b", 3)];
        let groups = group_deltas_by_store(&deltas);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a");
    }
}
