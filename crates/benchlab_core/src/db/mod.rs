//! SQLite connection bootstrap for the backing store file.
//!
//! # Responsibility
//! - Open and configure the single SQLite connection a host process owns.
//! - Claim exclusive ownership of the store file for the first process.
//!
//! # Invariants
//! - The store file is owned by exactly one process; siblings observe it
//!   through the sync bus, never through a second connection.
//! - Schema migrations are per store and run at store registration, not at
//!   connection open.
//!
//! # See also
//! - docs/architecture/data-model.md

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Another process already holds the store file.
    StoreLocked,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::StoreLocked => {
                write!(f, "store file is already owned by another process")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::StoreLocked => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
