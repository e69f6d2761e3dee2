//! Built-in stores of the bench workspace.
//!
//! # Responsibility
//! - Define the typed objects and store definitions shipped with the core.
//!
//! # Invariants
//! - Every built-in object is identified by a stable `ObjectId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.
//!
//! # See also
//! - docs/architecture/data-model.md

pub mod activity;
pub mod instrument;
pub mod workbench;

use crate::store::StoreDefinition;

/// Definitions of every built-in store, foreign-key targets first.
pub fn builtin_stores() -> Vec<StoreDefinition> {
    vec![
        instrument::instrument_records_store(),
        workbench::workbench_items_store(),
        activity::activity_log_store(),
    ]
}
