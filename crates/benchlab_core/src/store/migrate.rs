//! Per-store schema migration engine.
//!
//! # Responsibility
//! - Detect a store's persisted schema version across historical table names.
//! - Apply pending migration steps in strictly increasing order.
//!
//! # Invariants
//! - Each step and its version-table update are one atomic unit; failure
//!   leaves the store at its prior version.
//! - Steps already applied are never re-applied (version gate, not schema
//!   inspection).
//! - After a successful run the current version table holds exactly one row
//!   equal to the number of steps applied.
//!
//! # See also
//! - docs/architecture/data-model.md

use super::{quote_ident, SchemaError, SchemaResult, StoreDefinition};
use crate::db::DbError;
use log::{debug, error, info};
use rusqlite::Connection;
use std::time::Instant;

/// Applies every pending migration step for one store.
pub(crate) fn run(conn: &mut Connection, definition: &StoreDefinition) -> SchemaResult<()> {
    let store = definition.store_name.as_str();
    let started_at = Instant::now();

    let persisted = read_persisted_version(conn, definition)?;
    let latest = definition.latest_version();

    if persisted > latest {
        error!(
            "event=store_migrate module=store status=error store={store} error_code=version_ahead db_version={persisted} latest_supported={latest}"
        );
        return Err(SchemaError::VersionAhead {
            store: store.to_string(),
            db_version: persisted,
            latest_supported: latest,
        });
    }

    if persisted == latest {
        debug!("event=store_migrate module=store status=noop store={store} version={persisted}");
        return Ok(());
    }

    info!(
        "event=store_migrate module=store status=start store={store} from={persisted} to={latest}"
    );

    for step in &definition.migrations {
        if step.version <= persisted {
            continue;
        }
        apply_step(conn, definition, step.version, step.sql)?;
    }

    info!(
        "event=store_migrate module=store status=ok store={store} version={latest} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(())
}

/// Reads the persisted version, scanning historical version-table names.
///
/// Returns 0 when no version table exists yet (fresh store).
pub(crate) fn read_persisted_version(
    conn: &Connection,
    definition: &StoreDefinition,
) -> SchemaResult<u32> {
    let store = definition.store_name.as_str();

    // Newest name first: a rename step moves the table, it never copies it.
    for table in definition.version_tables.iter().rev() {
        if !table_exists(conn, table)? {
            continue;
        }

        let sql = format!("SELECT version FROM {};", quote_ident(table));
        let mut stmt = conn.prepare(&sql).map_err(DbError::Sqlite)?;
        let mut rows = stmt.query([]).map_err(DbError::Sqlite)?;

        let first = match rows.next().map_err(DbError::Sqlite)? {
            Some(row) => row.get::<_, i64>(0).map_err(DbError::Sqlite)?,
            None => {
                return Err(SchemaError::VersionTableCorrupt {
                    store: store.to_string(),
                    reason: format!("`{table}` holds no rows"),
                });
            }
        };
        if rows.next().map_err(DbError::Sqlite)?.is_some() {
            return Err(SchemaError::VersionTableCorrupt {
                store: store.to_string(),
                reason: format!("`{table}` holds more than one row"),
            });
        }
        let version = u32::try_from(first).map_err(|_| SchemaError::VersionTableCorrupt {
            store: store.to_string(),
            reason: format!("`{table}` holds invalid version {first}"),
        })?;
        return Ok(version);
    }

    Ok(0)
}

fn apply_step(
    conn: &mut Connection,
    definition: &StoreDefinition,
    version: u32,
    sql: &str,
) -> SchemaResult<()> {
    let store = definition.store_name.as_str();
    let tx = conn.transaction().map_err(DbError::Sqlite)?;

    if let Err(err) = tx.execute_batch(sql) {
        error!(
            "event=store_migrate_step module=store status=error store={store} version={version} error={err}"
        );
        return Err(SchemaError::StepFailed {
            store: store.to_string(),
            version,
            source: DbError::Sqlite(err),
        });
    }

    // The step's SQL owns its version bump; refuse to commit one that lied.
    let recorded = read_persisted_version(&tx, definition)?;
    if recorded != version {
        error!(
            "event=store_migrate_step module=store status=error store={store} version={version} recorded={recorded}"
        );
        return Err(SchemaError::StepNotVerified {
            store: store.to_string(),
            version,
            recorded,
        });
    }

    tx.commit().map_err(DbError::Sqlite)?;
    debug!("event=store_migrate_step module=store status=ok store={store} version={version}");
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> SchemaResult<bool> {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .map_err(DbError::Sqlite)?;
    Ok(exists == 1)
}
