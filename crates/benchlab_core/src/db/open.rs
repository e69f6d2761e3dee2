//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open the file or in-memory SQLite connection a host process owns.
//! - Configure connection pragmas required by core behavior.
//! - Claim the exclusive file lock eagerly so a losing process fails fast.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and WAL journaling.
//! - Returned connections hold the exclusive lock on the store file.
//!
//! # See also
//! - docs/architecture/logging.md

use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens the backing store file and claims exclusive ownership of it.
///
/// # Side effects
/// - Performs connection bootstrap and the eager lock claim.
/// - Emits `db_open` logging events with duration and status.
///
/// # Errors
/// - `DbError::StoreLocked` when another process already owns the file.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let conn = match Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=file duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode=file duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=file duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens an in-memory store, mainly for tests and smoke probes.
///
/// # Side effects
/// - Performs connection bootstrap.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let conn = match Connection::open_in_memory() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=memory duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode=memory duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=memory duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Pragmas run with the default zero busy timeout: when another process
/// owns the file, the very first statement fails immediately instead of
/// waiting, and maps to `StoreLocked`.
fn bootstrap_connection(conn: &Connection) -> DbResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(lock_aware)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(lock_aware)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(lock_aware)?;
    conn.pragma_update(None, "locking_mode", "EXCLUSIVE")
        .map_err(lock_aware)?;
    claim_exclusive_lock(conn)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Forces the exclusive lock immediately instead of at first write.
///
/// `locking_mode=EXCLUSIVE` acquires lazily; a short write transaction makes
/// the second process fail at open time rather than mid-commit.
fn claim_exclusive_lock(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")
        .map_err(lock_aware)
}

fn lock_aware(err: rusqlite::Error) -> DbError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            DbError::StoreLocked
        }
        _ => DbError::Sqlite(err),
    }
}
