//! Workbench items: instruments placed on the bench surface.
//!
//! # Responsibility
//! - Define the `workbench/items` store, including its full schema history.
//! - Provide the typed object UI layers work with.
//!
//! # Invariants
//! - The store began life as `front-panel/items`; step 2 renamed it, and
//!   `version_tables` still lists the old version table first so stores
//!   written by old builds migrate cleanly.
//! - `oid` always names an `instrument/records` row.
//!
//! # See also
//! - docs/architecture/data-model.md

use serde::{Deserialize, Serialize};

use super::instrument::INSTRUMENT_RECORDS_STORE;
use crate::store::object::{ObjectId, StoreObject};
use crate::store::property::{
    as_bool, as_i64, as_json, as_text, prop_bool, prop_i64, prop_json, prop_map, prop_text,
    PropertyDescriptor, PropertyMap, PropertyValue,
};
use crate::store::{MigrationStep, StoreDefinition, StoreResult};

pub const WORKBENCH_ITEMS_STORE: &str = "workbench/items";

/// Placement rectangle of one item, in bench coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// One object placed on the workbench.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbenchItem {
    pub id: ObjectId,
    /// Item kind, persisted in the `type` column.
    pub kind: String,
    /// Identifier of the owning instrument record.
    pub oid: ObjectId,
    pub rect: Rect,
    /// Runtime selection state, never persisted.
    pub selected: bool,
    pub deleted: bool,
}

impl WorkbenchItem {
    /// Property map for creating one item.
    pub fn props(kind: &str, oid: ObjectId, rect: Rect) -> StoreResult<PropertyMap> {
        Ok(prop_map([
            ("type", PropertyValue::from(kind)),
            ("oid", PropertyValue::from(oid)),
            ("rect", PropertyValue::Json(serde_json::to_value(rect)?)),
        ]))
    }

    /// Property map that moves or resizes an existing item.
    pub fn rect_patch(rect: Rect) -> StoreResult<PropertyMap> {
        Ok(prop_map([(
            "rect",
            PropertyValue::Json(serde_json::to_value(rect)?),
        )]))
    }
}

impl StoreObject for WorkbenchItem {
    fn store_name() -> &'static str {
        WORKBENCH_ITEMS_STORE
    }

    fn from_props(props: &PropertyMap) -> StoreResult<Self> {
        Ok(Self {
            id: prop_i64(props, "id")?,
            kind: prop_text(props, "type")?,
            oid: prop_i64(props, "oid")?,
            rect: serde_json::from_value(prop_json(props, "rect")?)?,
            selected: prop_bool(props, "selected")?,
            deleted: prop_bool(props, "deleted")?,
        })
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn apply(&mut self, changes: &PropertyMap) -> StoreResult<()> {
        for (name, value) in changes {
            match name.as_str() {
                "type" => self.kind = as_text(value, name)?,
                "oid" => self.oid = as_i64(value, name)?,
                "rect" => self.rect = serde_json::from_value(as_json(value, name)?)?,
                "selected" => self.selected = as_bool(value, name)?,
                "deleted" => self.deleted = as_bool(value, name)?,
                _ => {}
            }
        }
        Ok(())
    }
}

/// The `workbench/items` store with its full schema history.
pub fn workbench_items_store() -> StoreDefinition {
    StoreDefinition {
        store_name: WORKBENCH_ITEMS_STORE.to_string(),
        version_tables: vec![
            "front-panel/items/version".to_string(),
            "workbench/items/version".to_string(),
        ],
        migrations: vec![
            MigrationStep {
                version: 1,
                sql: include_str!("sql/workbench_items/0001_init.sql"),
            },
            MigrationStep {
                version: 2,
                sql: include_str!("sql/workbench_items/0002_rename.sql"),
            },
            MigrationStep {
                version: 3,
                sql: include_str!("sql/workbench_items/0003_oid_integer.sql"),
            },
            MigrationStep {
                version: 4,
                sql: include_str!("sql/workbench_items/0004_id_column.sql"),
            },
        ],
        properties: vec![
            PropertyDescriptor::id("id"),
            PropertyDescriptor::boolean("deleted"),
            PropertyDescriptor::text("type"),
            PropertyDescriptor::foreign("oid", INSTRUMENT_RECORDS_STORE),
            PropertyDescriptor::serialized("rect"),
            PropertyDescriptor::transient("selected", PropertyValue::Bool(false)),
        ],
    }
}
