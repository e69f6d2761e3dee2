//! Live typed collections kept in sync by commit deltas.
//!
//! # Responsibility
//! - Materialize typed objects from store rows and keep them current as
//!   deltas arrive from local commits or bus notices.
//! - Queue membership events for UI layers to drain.
//!
//! # Invariants
//! - The initial load produces no events; events describe changes observed
//!   after the watch began.
//! - Membership always reflects the collection's row filter: an update that
//!   moves a row out of the filter removes it, one that moves it in adds it.
//! - A delta that cannot be materialized is logged and skipped; it never
//!   poisons the collection.
//!
//! # See also
//! - docs/architecture/data-model.md

use log::warn;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::store::object::{DeltaKind, ObjectDelta, ObjectId, RowFilter, StoreObject};
use crate::store::property::{prop_bool_or, with_transient_defaults, PropertyMap};
use crate::store::{StoreDefinition, StoreResult};

/// Membership change kinds surfaced to collection consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionEventKind {
    /// The object entered the collection.
    Added,
    /// The object changed while staying in the collection.
    Changed,
    /// The object left the collection.
    Removed,
}

/// One membership change, in observation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionEvent {
    pub kind: CollectionEventKind,
    pub id: ObjectId,
}

/// Receiver half of a collection, held weakly by the host or mirror.
pub(crate) trait DeltaSink {
    fn store_name(&self) -> &str;
    fn is_detached(&self) -> bool;
    fn apply_delta(&self, delta: &ObjectDelta);
}

struct CollectionState<T> {
    objects: BTreeMap<ObjectId, T>,
    events: VecDeque<CollectionEvent>,
    detached: bool,
}

struct CollectionShared<T> {
    definition: StoreDefinition,
    filter: RowFilter,
    state: Mutex<CollectionState<T>>,
}

impl<T: StoreObject> CollectionShared<T> {
    fn lock_state(&self) -> MutexGuard<'_, CollectionState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn row_passes(&self, values: &PropertyMap) -> bool {
        match prop_bool_or(values, self.definition.deleted_column(), false) {
            Ok(deleted) => self.filter.allows(deleted),
            Err(err) => {
                warn!(
                    "event=collection_filter module=collection store={} status=skip error={err}",
                    self.definition.store_name
                );
                false
            }
        }
    }

    fn materialize(&self, values: &PropertyMap) -> StoreResult<T> {
        let full = with_transient_defaults(&self.definition, values.clone());
        T::from_props(&full)
    }
}

impl<T: StoreObject + 'static> DeltaSink for CollectionShared<T> {
    fn store_name(&self) -> &str {
        &self.definition.store_name
    }

    fn is_detached(&self) -> bool {
        self.lock_state().detached
    }

    fn apply_delta(&self, delta: &ObjectDelta) {
        let mut state = self.lock_state();
        if state.detached {
            return;
        }
        match delta.kind {
            DeltaKind::Created | DeltaKind::Updated => {
                let passes = self.row_passes(&delta.values);
                let present = state.objects.contains_key(&delta.id);
                match (present, passes) {
                    (true, true) => {
                        let Some(object) = state.objects.get_mut(&delta.id) else {
                            return;
                        };
                        if let Err(err) = object.apply(&delta.values) {
                            warn!(
                                "event=collection_apply module=collection store={} id={} status=skip error={err}",
                                delta.store, delta.id
                            );
                            return;
                        }
                        state.events.push_back(CollectionEvent {
                            kind: CollectionEventKind::Changed,
                            id: delta.id,
                        });
                    }
                    (true, false) => {
                        state.objects.remove(&delta.id);
                        state.events.push_back(CollectionEvent {
                            kind: CollectionEventKind::Removed,
                            id: delta.id,
                        });
                    }
                    (false, true) => match self.materialize(&delta.values) {
                        Ok(object) => {
                            state.objects.insert(delta.id, object);
                            state.events.push_back(CollectionEvent {
                                kind: CollectionEventKind::Added,
                                id: delta.id,
                            });
                        }
                        Err(err) => {
                            warn!(
                                "event=collection_apply module=collection store={} id={} status=skip error={err}",
                                delta.store, delta.id
                            );
                        }
                    },
                    (false, false) => {}
                }
            }
            DeltaKind::Deleted => {
                if state.objects.remove(&delta.id).is_some() {
                    state.events.push_back(CollectionEvent {
                        kind: CollectionEventKind::Removed,
                        id: delta.id,
                    });
                }
            }
        }
    }
}

/// A typed, filtered view over one store, updated by deltas.
pub struct Collection<T: StoreObject> {
    shared: Arc<CollectionShared<T>>,
}

impl<T: StoreObject> Collection<T> {
    /// Builds a collection from already-filtered rows.
    ///
    /// Rows that fail to materialize fail the whole load: the read path
    /// refuses to hide invalid persisted state.
    pub(crate) fn from_rows(
        definition: StoreDefinition,
        filter: RowFilter,
        rows: Vec<PropertyMap>,
    ) -> StoreResult<Self> {
        let mut objects = BTreeMap::new();
        for row in rows {
            let full = with_transient_defaults(&definition, row);
            let object = T::from_props(&full)?;
            objects.insert(object.id(), object);
        }
        Ok(Self {
            shared: Arc::new(CollectionShared {
                definition,
                filter,
                state: Mutex::new(CollectionState {
                    objects,
                    events: VecDeque::new(),
                    detached: false,
                }),
            }),
        })
    }

    pub fn store_name(&self) -> &str {
        &self.shared.definition.store_name
    }

    pub fn filter(&self) -> RowFilter {
        self.shared.filter
    }

    pub fn len(&self) -> usize {
        self.shared.lock_state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.shared.lock_state().objects.contains_key(&id)
    }

    /// Identifiers of current members, ascending.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.shared.lock_state().objects.keys().copied().collect()
    }

    /// Drains queued membership events in observation order.
    pub fn take_events(&self) -> Vec<CollectionEvent> {
        self.shared.lock_state().events.drain(..).collect()
    }

    /// Stops applying deltas and releases every contained object.
    ///
    /// The host or mirror prunes detached sinks on its next publish.
    pub fn detach(&self) {
        let mut state = self.shared.lock_state();
        state.detached = true;
        state.objects.clear();
        state.events.clear();
    }

    pub(crate) fn downgrade_sink(&self) -> Weak<dyn DeltaSink>
    where
        T: 'static,
    {
        let shared: Arc<dyn DeltaSink> = self.shared.clone();
        Arc::downgrade(&shared)
    }
}

impl<T: StoreObject + Clone> Collection<T> {
    pub fn get(&self, id: ObjectId) -> Option<T> {
        self.shared.lock_state().objects.get(&id).cloned()
    }

    /// Current members, ordered by identifier.
    pub fn snapshot(&self) -> Vec<T> {
        self.shared.lock_state().objects.values().cloned().collect()
    }
}

/// Routes deltas to live sinks and prunes dropped or detached ones.
pub(crate) fn notify_sinks(sinks: &mut Vec<Weak<dyn DeltaSink>>, deltas: &[ObjectDelta]) {
    sinks.retain(|weak| {
        let Some(sink) = weak.upgrade() else {
            return false;
        };
        if sink.is_detached() {
            return false;
        }
        for delta in deltas {
            if delta.store == sink.store_name() {
                sink.apply_delta(delta);
            }
        }
        true
    });
}
