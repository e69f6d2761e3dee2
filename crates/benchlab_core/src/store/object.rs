//! Object identity, row filters and commit deltas.
//!
//! # Responsibility
//! - Define the stable object identifier and soft-delete row filters.
//! - Define the per-object delta emitted by commit/undo/redo.
//! - Define the contract domain objects implement to materialize from rows.
//!
//! # Invariants
//! - Identifiers are assigned at creation and never reused, even after the
//!   row is physically removed by an undo.
//! - A delta's `values` always carry the full persisted column set, so
//!   re-applying a delta in isolation is idempotent.
//!
//! # See also
//! - docs/architecture/data-model.md

use super::property::PropertyMap;
use super::StoreResult;
use serde::{Deserialize, Serialize};

/// Stable identifier for every persisted object.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type ObjectId = i64;

/// Soft-delete visibility filter for collections and list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFilter {
    /// Rows whose `deleted` flag is clear.
    #[default]
    Active,
    /// Soft-deleted rows only, for recovery views.
    Deleted,
    /// Every row regardless of the `deleted` flag.
    All,
}

impl RowFilter {
    /// Returns whether a row with the given `deleted` flag passes the filter.
    pub fn allows(self, deleted: bool) -> bool {
        match self {
            Self::Active => !deleted,
            Self::Deleted => deleted,
            Self::All => true,
        }
    }
}

/// Row lifecycle stage described by one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// A row was inserted.
    Created,
    /// One or more columns changed, including the `deleted` flag.
    Updated,
    /// The row was physically removed (only an undone create does this).
    Deleted,
}

/// One per-object change emitted by commit, undo and redo.
///
/// `values` hold the full post-operation row; for `Deleted` they hold the
/// last persisted row so receivers can log or display what disappeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDelta {
    pub store: String,
    pub id: ObjectId,
    pub kind: DeltaKind,
    pub values: PropertyMap,
}

/// Contract for typed domain objects materialized from store rows.
///
/// Implementations stay plain data: foreign keys remain identifiers and are
/// resolved through an explicit mapper lookup, never an ownership edge.
pub trait StoreObject: Sized {
    /// Name of the store this object type belongs to.
    fn store_name() -> &'static str;

    /// Builds an object from a full property map (persisted columns plus
    /// transient defaults).
    fn from_props(props: &PropertyMap) -> StoreResult<Self>;

    /// Returns the object's stable identifier.
    fn id(&self) -> ObjectId;

    /// Applies changed columns in place, leaving transient fields untouched
    /// unless explicitly present in `changes`.
    fn apply(&mut self, changes: &PropertyMap) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::RowFilter;

    #[test]
    fn filters_partition_rows_by_deleted_flag() {
        assert!(RowFilter::Active.allows(false));
        assert!(!RowFilter::Active.allows(true));
        assert!(RowFilter::Deleted.allows(true));
        assert!(!RowFilter::Deleted.allows(false));
        assert!(RowFilter::All.allows(false));
        assert!(RowFilter::All.allows(true));
    }
}
