//! Instrument records: the devices known to this bench.

use crate::store::object::{ObjectId, StoreObject};
use crate::store::property::{
    as_bool, as_json, as_text, prop_bool, prop_i64, prop_json, prop_map, prop_text,
    PropertyDescriptor, PropertyMap, PropertyValue,
};
use crate::store::{MigrationStep, StoreDefinition, StoreResult};

pub const INSTRUMENT_RECORDS_STORE: &str = "instrument/records";

/// One known instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentRecord {
    pub id: ObjectId,
    pub label: String,
    /// Identification payload captured from the device, if any.
    pub idn: serde_json::Value,
    pub deleted: bool,
}

impl InstrumentRecord {
    /// Property map for creating one record.
    pub fn props(label: &str, idn: serde_json::Value) -> PropertyMap {
        prop_map([
            ("label", PropertyValue::from(label)),
            ("idn", PropertyValue::Json(idn)),
        ])
    }
}

impl StoreObject for InstrumentRecord {
    fn store_name() -> &'static str {
        INSTRUMENT_RECORDS_STORE
    }

    fn from_props(props: &PropertyMap) -> StoreResult<Self> {
        Ok(Self {
            id: prop_i64(props, "id")?,
            label: prop_text(props, "label")?,
            idn: prop_json(props, "idn")?,
            deleted: prop_bool(props, "deleted")?,
        })
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn apply(&mut self, changes: &PropertyMap) -> StoreResult<()> {
        for (name, value) in changes {
            match name.as_str() {
                "label" => self.label = as_text(value, name)?,
                "idn" => self.idn = as_json(value, name)?,
                "deleted" => self.deleted = as_bool(value, name)?,
                _ => {}
            }
        }
        Ok(())
    }
}

/// The `instrument/records` store.
pub fn instrument_records_store() -> StoreDefinition {
    StoreDefinition {
        store_name: INSTRUMENT_RECORDS_STORE.to_string(),
        version_tables: vec!["instrument/records/version".to_string()],
        migrations: vec![MigrationStep {
            version: 1,
            sql: include_str!("sql/instrument_records/0001_init.sql"),
        }],
        properties: vec![
            PropertyDescriptor::id("id"),
            PropertyDescriptor::boolean("deleted"),
            PropertyDescriptor::text("label"),
            PropertyDescriptor::serialized("idn"),
        ],
    }
}
