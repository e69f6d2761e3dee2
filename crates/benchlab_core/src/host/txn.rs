//! Transaction records: buffered operations, options and committed units.
//!
//! # Responsibility
//! - Define the buffered row operations a transaction accumulates.
//! - Define the committed record that moves between undo and redo stacks.
//!
//! # Invariants
//! - A committed record is never mutated after commit; undo/redo move it
//!   between stacks intact.
//! - The inverse list is stored pre-reversed: applying it front to back
//!   undoes the forward list.
//!
//! # See also
//! - docs/architecture/transactions.md

use crate::store::object::ObjectId;
use crate::store::property::PropertyMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Commit-time options for one transaction.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    /// Whether the committed record joins the undo stack.
    ///
    /// Automatic bookkeeping writes (activity-log appends) opt out, so a
    /// user's Ctrl+Z never reverts something they did not do.
    pub undoable: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self { undoable: true }
    }
}

/// One buffered row mutation, concrete enough to replay.
#[derive(Debug, Clone)]
pub(crate) enum RowOp {
    /// Insert a full row under a pre-assigned identifier.
    Insert {
        store: String,
        id: ObjectId,
        values: PropertyMap,
    },
    /// Update the listed columns only.
    Patch {
        store: String,
        id: ObjectId,
        changes: PropertyMap,
    },
    /// Physically remove the row. Only ever the inverse of an insert.
    Remove { store: String, id: ObjectId },
}

impl RowOp {
    pub(crate) fn store(&self) -> &str {
        match self {
            Self::Insert { store, .. } | Self::Patch { store, .. } | Self::Remove { store, .. } => {
                store
            }
        }
    }
}

/// A transaction that is open and accumulating operations.
#[derive(Debug)]
pub(crate) struct ActiveTransaction {
    pub(crate) label: String,
    pub(crate) options: TransactionOptions,
    pub(crate) ops: Vec<RowOp>,
}

impl ActiveTransaction {
    pub(crate) fn new(label: &str, options: TransactionOptions) -> Self {
        Self {
            label: label.to_string(),
            options,
            ops: Vec::new(),
        }
    }
}

/// A durably applied transaction, ready to be undone or redone.
#[derive(Debug)]
pub(crate) struct CommittedTransaction {
    pub(crate) label: String,
    pub(crate) options: TransactionOptions,
    /// Operations as applied, in commit order.
    pub(crate) forward: Vec<RowOp>,
    /// Inverse operations, already reversed for front-to-back application.
    pub(crate) inverse: Vec<RowOp>,
    pub(crate) committed_at_ms: i64,
}

impl CommittedTransaction {
    pub(crate) fn new(
        label: String,
        options: TransactionOptions,
        forward: Vec<RowOp>,
        mut inverse: Vec<RowOp>,
    ) -> Self {
        inverse.reverse();
        Self {
            label,
            options,
            forward,
            inverse,
            committed_at_ms: epoch_ms(),
        }
    }
}

/// Milliseconds since the Unix epoch, clamped to 0 for a pre-epoch clock.
pub(crate) fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::{epoch_ms, CommittedTransaction, RowOp, TransactionOptions};
    use crate::store::property::PropertyMap;

    #[test]
    fn committed_record_reverses_inverse_order() {
        let forward = vec![
            RowOp::Insert {
                store: "a".to_string(),
                id: 1,
                values: PropertyMap::new(),
            },
            RowOp::Insert {
                store: "a".to_string(),
                id: 2,
                values: PropertyMap::new(),
            },
        ];
        let inverse = vec![
            RowOp::Remove {
                store: "a".to_string(),
                id: 1,
            },
            RowOp::Remove {
                store: "a".to_string(),
                id: 2,
            },
        ];

        let record = CommittedTransaction::new(
            "add".to_string(),
            TransactionOptions::default(),
            forward,
            inverse,
        );

        match &record.inverse[0] {
            RowOp::Remove { id, .. } => assert_eq!(*id, 2),
            other => panic!("expected remove, got {other:?}"),
        }
        assert!(record.committed_at_ms > 0);
    }

    #[test]
    fn epoch_ms_is_monotonic_enough_for_labels() {
        let first = epoch_ms();
        let second = epoch_ms();
        assert!(second >= first);
    }
}
