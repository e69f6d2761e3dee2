//! Activity log: the append-mostly journal of bench events.
//!
//! Appends run in their own non-undoable transaction, so a user's undo
//! never reverts the journal.

use crate::host::{StoreHost, TransactionOptions};
use crate::store::object::{ObjectId, StoreObject};
use crate::store::property::{
    as_bool, as_i64, as_json, as_text, prop_bool, prop_i64, prop_json, prop_map, prop_opt_i64,
    prop_text, PropertyDescriptor, PropertyMap, PropertyValue,
};
use crate::store::{MigrationStep, StoreDefinition, StoreResult};

pub const ACTIVITY_LOG_STORE: &str = "activity/log";

/// One journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityLogEntry {
    pub id: ObjectId,
    /// Milliseconds since the Unix epoch.
    pub date: i64,
    /// Related instrument record, if any.
    pub oid: Option<ObjectId>,
    /// Entry kind, persisted in the `type` column.
    pub kind: String,
    pub message: String,
    pub data: serde_json::Value,
    pub deleted: bool,
}

impl StoreObject for ActivityLogEntry {
    fn store_name() -> &'static str {
        ACTIVITY_LOG_STORE
    }

    fn from_props(props: &PropertyMap) -> StoreResult<Self> {
        Ok(Self {
            id: prop_i64(props, "id")?,
            date: prop_i64(props, "date")?,
            oid: prop_opt_i64(props, "oid")?,
            kind: prop_text(props, "type")?,
            message: prop_text(props, "message")?,
            data: prop_json(props, "data")?,
            deleted: prop_bool(props, "deleted")?,
        })
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn apply(&mut self, changes: &PropertyMap) -> StoreResult<()> {
        for (name, value) in changes {
            match name.as_str() {
                "date" => self.date = as_i64(value, name)?,
                "oid" => {
                    self.oid = match value {
                        PropertyValue::Null => None,
                        other => Some(as_i64(other, name)?),
                    }
                }
                "type" => self.kind = as_text(value, name)?,
                "message" => self.message = as_text(value, name)?,
                "data" => self.data = as_json(value, name)?,
                "deleted" => self.deleted = as_bool(value, name)?,
                _ => {}
            }
        }
        Ok(())
    }
}

/// The `activity/log` store.
pub fn activity_log_store() -> StoreDefinition {
    StoreDefinition {
        store_name: ACTIVITY_LOG_STORE.to_string(),
        version_tables: vec!["activity/log/version".to_string()],
        migrations: vec![
            MigrationStep {
                version: 1,
                sql: include_str!("sql/activity_log/0001_init.sql"),
            },
            MigrationStep {
                version: 2,
                sql: include_str!("sql/activity_log/0002_date_index.sql"),
            },
        ],
        properties: vec![
            PropertyDescriptor::id("id"),
            PropertyDescriptor::boolean("deleted"),
            PropertyDescriptor::integer("date"),
            PropertyDescriptor::foreign("oid", super::instrument::INSTRUMENT_RECORDS_STORE),
            PropertyDescriptor::text("type"),
            PropertyDescriptor::text("message"),
            PropertyDescriptor::serialized("data"),
        ],
    }
}

/// Appends one journal entry in its own non-undoable transaction.
///
/// Fails with a concurrency error while another transaction is open; call
/// it at idle points, not from inside `transact` bodies.
pub fn log_activity(
    host: &mut StoreHost,
    oid: Option<ObjectId>,
    kind: &str,
    message: &str,
    data: serde_json::Value,
) -> StoreResult<ObjectId> {
    let props = prop_map([
        ("date", PropertyValue::Integer(crate::host::txn::epoch_ms())),
        (
            "oid",
            oid.map_or(PropertyValue::Null, PropertyValue::Integer),
        ),
        ("type", PropertyValue::from(kind)),
        ("message", PropertyValue::from(message)),
        ("data", PropertyValue::Json(data)),
    ]);
    host.transact_with(
        "Log activity",
        TransactionOptions { undoable: false },
        |host| host.create(ACTIVITY_LOG_STORE, &props),
    )
}

#[cfg(test)]
mod tests {
    use super::{activity_log_store, ActivityLogEntry};
    use crate::store::object::StoreObject;
    use crate::store::property::{prop_map, PropertyValue};

    #[test]
    fn definition_passes_validation() {
        activity_log_store().validate().unwrap();
        assert_eq!(activity_log_store().latest_version(), 2);
    }

    #[test]
    fn entries_distinguish_missing_and_present_oid() {
        let props = prop_map([
            ("id", PropertyValue::from(1i64)),
            ("deleted", PropertyValue::from(false)),
            ("date", PropertyValue::from(1_700_000_000_000i64)),
            ("oid", PropertyValue::Null),
            ("type", PropertyValue::from("instrument/connected")),
            ("message", PropertyValue::from("connected")),
            ("data", PropertyValue::Json(serde_json::Value::Null)),
        ]);
        let mut entry = ActivityLogEntry::from_props(&props).unwrap();
        assert_eq!(entry.oid, None);

        entry
            .apply(&prop_map([("oid", PropertyValue::from(9i64))]))
            .unwrap();
        assert_eq!(entry.oid, Some(9));
    }
}
