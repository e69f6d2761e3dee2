//! Row mapping between property maps and store tables.
//!
//! # Responsibility
//! - Validate caller-supplied property maps against a store definition.
//! - Generate and execute the SQL behind insert, patch, remove and reads.
//! - Apply a buffered change set atomically and derive per-op inverses.
//!
//! # Invariants
//! - Generated SQL always double-quotes identifiers; store and column
//!   names may contain `/` or be keywords like `type`.
//! - The maps returned by reads carry every persisted column, so a captured
//!   inverse can reinsert a removed row verbatim.
//!
//! # See also
//! - docs/architecture/transactions.md

use super::txn::RowOp;
use super::RegisteredStore;
use crate::store::object::{DeltaKind, ObjectDelta, ObjectId, RowFilter};
use crate::store::property::{
    from_sql_value, kind_label, to_sql_value, value_matches_kind, PropertyDescriptor, PropertyKind,
    PropertyMap, PropertyValue,
};
use crate::store::{quote_ident, StoreDefinition, StoreError, StoreResult};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

/// Checks a caller-supplied row for `create` and completes it.
///
/// The returned map holds every persisted column except the identifier,
/// which the host assigns afterwards.
pub(crate) fn validate_create(
    definition: &StoreDefinition,
    props: &PropertyMap,
) -> StoreResult<PropertyMap> {
    let mut validated = PropertyMap::new();
    for (name, value) in props {
        let descriptor = checked_descriptor(definition, name)?;
        ensure_kind(descriptor, value)?;
        validated.insert(name.clone(), value.clone());
    }

    let id_column = definition.id_column();
    let deleted_column = definition.deleted_column();
    for descriptor in definition.persisted_properties() {
        if descriptor.name == id_column || descriptor.name == deleted_column {
            continue;
        }
        if !validated.contains_key(&descriptor.name) {
            return Err(StoreError::Validation(format!(
                "property `{}` is required",
                descriptor.name
            )));
        }
    }

    validated.insert(deleted_column.to_string(), PropertyValue::Bool(false));
    Ok(validated)
}

/// Checks a caller-supplied column subset for `update`.
pub(crate) fn validate_patch(
    definition: &StoreDefinition,
    changes: &PropertyMap,
) -> StoreResult<PropertyMap> {
    if changes.is_empty() {
        return Err(StoreError::Validation("update carries no changes".to_string()));
    }
    let mut validated = PropertyMap::new();
    for (name, value) in changes {
        let descriptor = checked_descriptor(definition, name)?;
        ensure_kind(descriptor, value)?;
        validated.insert(name.clone(), value.clone());
    }
    Ok(validated)
}

/// Inserts a full row, identifier included.
pub(crate) fn insert_row(
    conn: &Connection,
    definition: &StoreDefinition,
    values: &PropertyMap,
) -> StoreResult<()> {
    let columns: Vec<&PropertyDescriptor> = definition.persisted_properties().collect();
    let mut cells: Vec<SqlValue> = Vec::with_capacity(columns.len());
    for descriptor in &columns {
        let value = values.get(&descriptor.name).ok_or_else(|| {
            missing_column(&definition.store_name, &descriptor.name)
        })?;
        cells.push(to_sql_value(&descriptor.kind, value)?);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&definition.store_name),
        column_list(&columns),
        placeholders(columns.len())
    );
    conn.execute(&sql, params_from_iter(cells))?;
    Ok(())
}

/// Reads one row by identifier, soft-deleted rows included.
pub(crate) fn read_row(
    conn: &Connection,
    definition: &StoreDefinition,
    id: ObjectId,
) -> StoreResult<Option<PropertyMap>> {
    let columns: Vec<&PropertyDescriptor> = definition.persisted_properties().collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        column_list(&columns),
        quote_ident(&definition.store_name),
        quote_ident(definition.id_column())
    );

    let mut stmt = conn.prepare(&sql)?;
    let cells: Option<Vec<SqlValue>> = stmt
        .query_row(params![id], |row| read_cells(row, columns.len()))
        .optional()?;
    match cells {
        Some(cells) => Ok(Some(decode_cells(&columns, cells)?)),
        None => Ok(None),
    }
}

/// Updates the listed columns of one row.
pub(crate) fn update_row(
    conn: &Connection,
    definition: &StoreDefinition,
    id: ObjectId,
    changes: &PropertyMap,
) -> StoreResult<()> {
    let mut assignments: Vec<String> = Vec::with_capacity(changes.len());
    let mut cells: Vec<SqlValue> = Vec::with_capacity(changes.len() + 1);
    for (name, value) in changes {
        let descriptor = definition
            .property(name)
            .ok_or_else(|| missing_column(&definition.store_name, name))?;
        assignments.push(format!("{} = ?", quote_ident(name)));
        cells.push(to_sql_value(&descriptor.kind, value)?);
    }
    cells.push(SqlValue::Integer(id));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(&definition.store_name),
        assignments.join(", "),
        quote_ident(definition.id_column())
    );
    let changed = conn.execute(&sql, params_from_iter(cells))?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            store: definition.store_name.clone(),
            id,
        });
    }
    Ok(())
}

/// Physically removes one row. Only the inverse of a create does this.
pub(crate) fn delete_row(
    conn: &Connection,
    definition: &StoreDefinition,
    id: ObjectId,
) -> StoreResult<()> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(&definition.store_name),
        quote_ident(definition.id_column())
    );
    let changed = conn.execute(&sql, params![id])?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            store: definition.store_name.clone(),
            id,
        });
    }
    Ok(())
}

/// Reads every row passing the filter, ordered by identifier.
pub(crate) fn select_rows(
    conn: &Connection,
    definition: &StoreDefinition,
    filter: RowFilter,
) -> StoreResult<Vec<PropertyMap>> {
    let columns: Vec<&PropertyDescriptor> = definition.persisted_properties().collect();
    let condition = match filter {
        RowFilter::Active => format!(" WHERE {} = 0", quote_ident(definition.deleted_column())),
        RowFilter::Deleted => format!(" WHERE {} = 1", quote_ident(definition.deleted_column())),
        RowFilter::All => String::new(),
    };
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} ASC",
        column_list(&columns),
        quote_ident(&definition.store_name),
        condition,
        quote_ident(definition.id_column())
    );

    let mut stmt = conn.prepare(&sql)?;
    let raw_rows = stmt.query_map([], |row| read_cells(row, columns.len()))?;
    let mut rows = Vec::new();
    for raw in raw_rows {
        rows.push(decode_cells(&columns, raw?)?);
    }
    Ok(rows)
}

/// Computes the first identifier a fresh host may assign for this store.
///
/// Takes the high-water mark of both the live rows and the autoincrement
/// sequence, so identifiers stay unique across undo-removed creates and
/// restarts.
pub(crate) fn seed_next_id(
    conn: &Connection,
    definition: &StoreDefinition,
) -> rusqlite::Result<ObjectId> {
    let sql = format!(
        "SELECT MAX({}) FROM {}",
        quote_ident(definition.id_column()),
        quote_ident(&definition.store_name)
    );
    let max_id: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;

    let mut sequence: Option<i64> = None;
    if sequence_table_exists(conn)? {
        sequence = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                params![definition.store_name],
                |row| row.get(0),
            )
            .optional()?;
    }

    let high = max_id.unwrap_or(0).max(sequence.unwrap_or(0));
    Ok(high + 1)
}

/// Applies one buffered operation and returns its delta and inverse.
pub(crate) fn apply_op(
    conn: &Connection,
    definition: &StoreDefinition,
    op: &RowOp,
) -> StoreResult<(ObjectDelta, RowOp)> {
    match op {
        RowOp::Insert { store, id, values } => {
            insert_row(conn, definition, values)?;
            let delta = ObjectDelta {
                store: store.clone(),
                id: *id,
                kind: DeltaKind::Created,
                values: values.clone(),
            };
            let inverse = RowOp::Remove {
                store: store.clone(),
                id: *id,
            };
            Ok((delta, inverse))
        }
        RowOp::Patch { store, id, changes } => {
            let prior = read_row(conn, definition, *id)?.ok_or_else(|| StoreError::NotFound {
                store: store.clone(),
                id: *id,
            })?;
            let mut reverted = PropertyMap::new();
            for name in changes.keys() {
                let value = prior
                    .get(name)
                    .ok_or_else(|| missing_column(store, name))?;
                reverted.insert(name.clone(), value.clone());
            }
            update_row(conn, definition, *id, changes)?;

            let mut post = prior;
            for (name, value) in changes {
                post.insert(name.clone(), value.clone());
            }
            let delta = ObjectDelta {
                store: store.clone(),
                id: *id,
                kind: DeltaKind::Updated,
                values: post,
            };
            let inverse = RowOp::Patch {
                store: store.clone(),
                id: *id,
                changes: reverted,
            };
            Ok((delta, inverse))
        }
        RowOp::Remove { store, id } => {
            let prior = read_row(conn, definition, *id)?.ok_or_else(|| StoreError::NotFound {
                store: store.clone(),
                id: *id,
            })?;
            delete_row(conn, definition, *id)?;
            let delta = ObjectDelta {
                store: store.clone(),
                id: *id,
                kind: DeltaKind::Deleted,
                values: prior.clone(),
            };
            let inverse = RowOp::Insert {
                store: store.clone(),
                id: *id,
                values: prior,
            };
            Ok((delta, inverse))
        }
    }
}

/// Applies a whole change set in one SQLite transaction.
///
/// Returns the deltas in operation order and the inverses in the same
/// order; callers reverse the inverses when they build an undo record.
/// Nothing is persisted if any operation fails.
pub(crate) fn apply_change_set(
    conn: &mut Connection,
    stores: &HashMap<String, RegisteredStore>,
    ops: &[RowOp],
) -> StoreResult<(Vec<ObjectDelta>, Vec<RowOp>)> {
    let tx = conn.transaction().map_err(StoreError::from)?;
    let mut deltas = Vec::with_capacity(ops.len());
    let mut inverses = Vec::with_capacity(ops.len());
    for op in ops {
        let registered = stores
            .get(op.store())
            .ok_or_else(|| StoreError::UnknownStore(op.store().to_string()))?;
        let (delta, inverse) = apply_op(&tx, &registered.definition, op)?;
        deltas.push(delta);
        inverses.push(inverse);
    }
    tx.commit().map_err(StoreError::from)?;
    Ok((deltas, inverses))
}

fn checked_descriptor<'a>(
    definition: &'a StoreDefinition,
    name: &str,
) -> StoreResult<&'a PropertyDescriptor> {
    let descriptor = definition.property(name).ok_or_else(|| {
        StoreError::Validation(format!(
            "store `{}` has no property `{name}`",
            definition.store_name
        ))
    })?;
    if name == definition.id_column() {
        return Err(StoreError::Validation(format!(
            "property `{name}` is assigned by the store and cannot be supplied"
        )));
    }
    if name == definition.deleted_column() {
        return Err(StoreError::Validation(format!(
            "property `{name}` is managed by delete and undelete"
        )));
    }
    if matches!(descriptor.kind, PropertyKind::Transient { .. }) {
        return Err(StoreError::Validation(format!(
            "property `{name}` is transient and cannot be written"
        )));
    }
    Ok(descriptor)
}

fn ensure_kind(descriptor: &PropertyDescriptor, value: &PropertyValue) -> StoreResult<()> {
    if value_matches_kind(&descriptor.kind, value) {
        return Ok(());
    }
    Err(StoreError::Validation(format!(
        "property `{}` expects {}, got {}",
        descriptor.name,
        kind_label(&descriptor.kind),
        value.form()
    )))
}

fn read_cells(row: &rusqlite::Row<'_>, count: usize) -> rusqlite::Result<Vec<SqlValue>> {
    let mut cells = Vec::with_capacity(count);
    for index in 0..count {
        cells.push(row.get::<_, SqlValue>(index)?);
    }
    Ok(cells)
}

fn decode_cells(
    columns: &[&PropertyDescriptor],
    cells: Vec<SqlValue>,
) -> StoreResult<PropertyMap> {
    let mut props = PropertyMap::new();
    for (descriptor, cell) in columns.iter().zip(cells.iter()) {
        let value = from_sql_value(&descriptor.kind, &descriptor.name, ValueRef::from(cell))?;
        props.insert(descriptor.name.clone(), value);
    }
    Ok(props)
}

fn column_list(columns: &[&PropertyDescriptor]) -> String {
    columns
        .iter()
        .map(|descriptor| quote_ident(&descriptor.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn sequence_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence')",
        [],
        |row| row.get(0),
    )
}

fn missing_column(store: &str, column: &str) -> StoreError {
    StoreError::InvalidData(format!("row in store `{store}` is missing column `{column}`"))
}
