//! Store definitions, migration steps and the store error taxonomy.
//!
//! # Responsibility
//! - Define the declarative shape of a schema-versioned store.
//! - Own the error types shared by migration, mapping and collections.
//!
//! # Invariants
//! - A valid definition has contiguous migration versions starting at 1,
//!   exactly one `Id` descriptor and a `Boolean` descriptor named `deleted`.
//! - `version_tables` lists every historical name of the version table,
//!   oldest first; the last entry is the current name.
//!
//! # See also
//! - docs/architecture/data-model.md

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub(crate) mod migrate;
pub mod object;
pub mod property;

use property::{PropertyDescriptor, PropertyKind};

pub type StoreResult<T> = Result<T, StoreError>;
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors from mapping, transaction and collection operations.
#[derive(Debug)]
pub enum StoreError {
    /// A transaction is already open in this process.
    Concurrency { open_label: String },
    /// A mutation was attempted outside a transaction.
    NoActiveTransaction,
    /// Lookup of a nonexistent (or hidden soft-deleted) object.
    NotFound { store: String, id: object::ObjectId },
    /// Rejected input, surfaced before any buffering occurs.
    Validation(String),
    /// The named store was never registered on this host.
    UnknownStore(String),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Serialized-object encode/decode failure.
    Encoding(serde_json::Error),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrency { open_label } => {
                write!(f, "transaction `{open_label}` is already in progress")
            }
            Self::NoActiveTransaction => write!(f, "no active transaction"),
            Self::NotFound { store, id } => {
                write!(f, "object {id} not found in store `{store}`")
            }
            Self::Validation(message) => write!(f, "{message}"),
            Self::UnknownStore(store) => write!(f, "store `{store}` is not registered"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Encoding(err) => write!(f, "serialized object encoding failed: {err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encoding(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encoding(value)
    }
}

/// Errors from store registration and schema migration.
///
/// All of these are fatal for the affected store: callers must not read or
/// write application data behind a store whose registration failed.
#[derive(Debug)]
pub enum SchemaError {
    /// The declared definition violates a structural rule.
    InvalidDefinition { store: String, reason: String },
    /// The persisted version is newer than the steps this binary knows.
    VersionAhead {
        store: String,
        db_version: u32,
        latest_supported: u32,
    },
    /// The version table does not hold exactly one sane row.
    VersionTableCorrupt { store: String, reason: String },
    /// A migration step's SQL failed; the store stays at its prior version.
    StepFailed {
        store: String,
        version: u32,
        source: DbError,
    },
    /// A step ran but did not record its own version number.
    StepNotVerified {
        store: String,
        version: u32,
        recorded: u32,
    },
    /// Underlying SQLite/bootstrap error outside a specific step.
    Db(DbError),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDefinition { store, reason } => {
                write!(f, "invalid definition for store `{store}`: {reason}")
            }
            Self::VersionAhead {
                store,
                db_version,
                latest_supported,
            } => write!(
                f,
                "store `{store}` schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::VersionTableCorrupt { store, reason } => {
                write!(f, "store `{store}` version table is corrupt: {reason}")
            }
            Self::StepFailed { store, version, .. } => {
                write!(f, "migration step {version} for store `{store}` failed")
            }
            Self::StepNotVerified {
                store,
                version,
                recorded,
            } => write!(
                f,
                "migration step {version} for store `{store}` recorded version {recorded}"
            ),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StepFailed { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for SchemaError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SchemaError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One ordered, self-contained schema transformation.
///
/// The SQL is responsible for recording its own version number in the
/// store's version table; the engine verifies that before committing.
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub version: u32,
    pub sql: &'static str,
}

/// Declarative shape of one schema-versioned store.
#[derive(Debug, Clone)]
pub struct StoreDefinition {
    /// Current name of the row table.
    pub store_name: String,
    /// Every name the version table has had, oldest first.
    pub version_tables: Vec<String>,
    /// Ordered migration steps, versions 1..=n.
    pub migrations: Vec<MigrationStep>,
    /// Persisted and transient properties of one row.
    pub properties: Vec<PropertyDescriptor>,
}

impl StoreDefinition {
    /// Returns the newest migration version this definition knows.
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |step| step.version)
    }

    /// Returns the descriptor registered under `name`.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|descriptor| descriptor.name == name)
    }

    /// Name of the primary-key column.
    pub fn id_column(&self) -> &str {
        self.properties
            .iter()
            .find(|descriptor| matches!(descriptor.kind, PropertyKind::Id))
            .map_or("id", |descriptor| descriptor.name.as_str())
    }

    /// Name of the soft-delete flag column.
    pub fn deleted_column(&self) -> &str {
        "deleted"
    }

    /// Descriptors that map to table columns, in declaration order.
    pub fn persisted_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties
            .iter()
            .filter(|descriptor| descriptor.is_persisted())
    }

    /// Checks the structural rules a registrable definition must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.store_name.is_empty() {
            return Err("store name cannot be empty".to_string());
        }
        ensure_sql_name("store name", &self.store_name)?;

        if self.version_tables.is_empty() {
            return Err("at least one version table name is required".to_string());
        }
        for table in &self.version_tables {
            ensure_sql_name("version table name", table)?;
        }

        for (index, step) in self.migrations.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.version != expected {
                return Err(format!(
                    "migration versions must be contiguous from 1; step {index} declares version {}",
                    step.version
                ));
            }
        }

        let mut id_count = 0usize;
        for descriptor in &self.properties {
            if descriptor.name.is_empty() {
                return Err("property names cannot be empty".to_string());
            }
            ensure_sql_name("property name", &descriptor.name)?;
            let duplicates = self
                .properties
                .iter()
                .filter(|other| other.name == descriptor.name)
                .count();
            if duplicates > 1 {
                return Err(format!("duplicate property name `{}`", descriptor.name));
            }
            match &descriptor.kind {
                PropertyKind::Id => id_count += 1,
                PropertyKind::ForeignKey { store } if store.is_empty() => {
                    return Err(format!(
                        "foreign key `{}` must name a target store",
                        descriptor.name
                    ));
                }
                _ => {}
            }
        }
        if id_count != 1 {
            return Err(format!(
                "exactly one id property is required, found {id_count}"
            ));
        }
        match self.property("deleted") {
            Some(descriptor) if matches!(descriptor.kind, PropertyKind::Boolean) => {}
            Some(_) => return Err("property `deleted` must be boolean".to_string()),
            None => return Err("a boolean `deleted` property is required".to_string()),
        }

        Ok(())
    }
}

/// Quotes an identifier for direct inclusion in generated SQL.
///
/// Store and column names may contain `/` and `-`, so every generated
/// statement double-quotes them.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn ensure_sql_name(what: &str, name: &str) -> Result<(), String> {
    if name.contains('"') {
        return Err(format!("{what} `{name}` cannot contain double quotes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::property::{PropertyDescriptor, PropertyValue};
    use super::{quote_ident, MigrationStep, StoreDefinition};

    fn minimal_definition() -> StoreDefinition {
        StoreDefinition {
            store_name: "bench/items".to_string(),
            version_tables: vec!["bench/items/version".to_string()],
            migrations: vec![MigrationStep {
                version: 1,
                sql: "SELECT 1;",
            }],
            properties: vec![
                PropertyDescriptor::id("id"),
                PropertyDescriptor::boolean("deleted"),
                PropertyDescriptor::text("label"),
            ],
        }
    }

    #[test]
    fn minimal_definition_validates() {
        minimal_definition().validate().unwrap();
    }

    #[test]
    fn non_contiguous_versions_are_rejected() {
        let mut definition = minimal_definition();
        definition.migrations.push(MigrationStep {
            version: 3,
            sql: "SELECT 1;",
        });
        let reason = definition.validate().unwrap_err();
        assert!(reason.contains("contiguous"));
    }

    #[test]
    fn missing_deleted_flag_is_rejected() {
        let mut definition = minimal_definition();
        definition.properties.retain(|p| p.name != "deleted");
        let reason = definition.validate().unwrap_err();
        assert!(reason.contains("deleted"));
    }

    #[test]
    fn second_id_property_is_rejected() {
        let mut definition = minimal_definition();
        definition.properties.push(PropertyDescriptor::id("id2"));
        let reason = definition.validate().unwrap_err();
        assert!(reason.contains("exactly one id"));
    }

    #[test]
    fn transient_default_does_not_count_as_persisted() {
        let mut definition = minimal_definition();
        definition
            .properties
            .push(PropertyDescriptor::transient("selected", PropertyValue::Bool(false)));
        assert_eq!(definition.persisted_properties().count(), 3);
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("workbench/items"), "\"workbench/items\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
