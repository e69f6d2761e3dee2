//! Persistence and sync core for BenchLab.
//! This crate is the single source of truth for store invariants.

pub mod bus;
pub mod collection;
pub mod db;
pub mod host;
pub mod logging;
pub mod mirror;
pub mod model;
pub mod store;

pub use bus::protocol::{
    BusMessage, CommitNotice, IntentEnvelope, IntentId, IntentPayload, PeerId,
};
pub use bus::{BusPeer, IntentOutcome, SyncBus};
pub use collection::{Collection, CollectionEvent, CollectionEventKind};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use host::{StoreHost, TransactionOptions};
pub use logging::{default_log_level, init_logging, logging_status};
pub use mirror::StoreMirror;
pub use model::activity::{activity_log_store, log_activity, ActivityLogEntry, ACTIVITY_LOG_STORE};
pub use model::builtin_stores;
pub use model::instrument::{instrument_records_store, InstrumentRecord, INSTRUMENT_RECORDS_STORE};
pub use model::workbench::{workbench_items_store, Rect, WorkbenchItem, WORKBENCH_ITEMS_STORE};
pub use store::object::{DeltaKind, ObjectDelta, ObjectId, RowFilter, StoreObject};
pub use store::property::{
    prop_bool, prop_bool_or, prop_i64, prop_json, prop_map, prop_opt_i64, prop_text,
    PropertyDescriptor, PropertyKind, PropertyMap, PropertyValue,
};
pub use store::{
    MigrationStep, SchemaError, SchemaResult, StoreDefinition, StoreError, StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
