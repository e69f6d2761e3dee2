//! Property type registry: persisted value kinds and column codecs.
//!
//! # Responsibility
//! - Define the recognized property kinds and their runtime value forms.
//! - Encode/decode property values to/from SQLite column values.
//! - Provide typed accessors over raw property maps.
//!
//! # Invariants
//! - Every persisted kind has exactly one column encoding and one decoding.
//! - `Serialized` values round-trip losslessly; the registry never interprets
//!   their contents.
//! - `Transient` descriptors never map to a column.
//!
//! # See also
//! - docs/architecture/data-model.md

use super::{StoreDefinition, StoreError, StoreResult};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw column tuple of one row, keyed by property name.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Persisted value kind recognized by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Store-assigned stable primary key. Exactly one per store.
    Id,
    /// Persisted as integer 0/1.
    Boolean,
    /// Signed 64-bit integer column (timestamps, counters).
    Integer,
    /// UTF-8 text column.
    Text,
    /// Identifier of a row in another store. Resolved lazily, never owned.
    ForeignKey { store: String },
    /// Opaque JSON-encoded payload. Round-trips without interpretation.
    Serialized,
    /// In-memory only. Defaulted at materialization, never written.
    Transient { default: PropertyValue },
}

/// One named, typed column (or transient field) of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    pub fn id(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Id,
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Boolean,
        }
    }

    pub fn integer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Integer,
        }
    }

    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Text,
        }
    }

    pub fn foreign(name: &str, target_store: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::ForeignKey {
                store: target_store.to_string(),
            },
        }
    }

    pub fn serialized(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Serialized,
        }
    }

    pub fn transient(name: &str, default: PropertyValue) -> Self {
        Self {
            name: name.to_string(),
            kind: PropertyKind::Transient { default },
        }
    }

    /// Returns whether this descriptor maps to a table column.
    pub fn is_persisted(&self) -> bool {
        !matches!(self.kind, PropertyKind::Transient { .. })
    }
}

/// Runtime form of one property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
    Json(serde_json::Value),
}

impl PropertyValue {
    /// Human-readable value form name for diagnostics.
    pub fn form(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Builds a property map from literal entries.
pub fn prop_map<const N: usize>(entries: [(&str, PropertyValue); N]) -> PropertyMap {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Returns whether `value` is writable under `kind`.
///
/// Transient kinds match nothing: they are never writable through the mapper.
pub(crate) fn value_matches_kind(kind: &PropertyKind, value: &PropertyValue) -> bool {
    matches!(
        (kind, value),
        (PropertyKind::Id, PropertyValue::Integer(_))
            | (PropertyKind::Boolean, PropertyValue::Bool(_))
            | (PropertyKind::Integer, PropertyValue::Integer(_))
            | (PropertyKind::Text, PropertyValue::Text(_))
            | (PropertyKind::ForeignKey { .. }, PropertyValue::Integer(_))
            | (PropertyKind::ForeignKey { .. }, PropertyValue::Null)
            | (PropertyKind::Serialized, PropertyValue::Json(_))
    )
}

/// Human-readable kind name for diagnostics.
pub(crate) fn kind_label(kind: &PropertyKind) -> &'static str {
    match kind {
        PropertyKind::Id => "id",
        PropertyKind::Boolean => "boolean",
        PropertyKind::Integer => "integer",
        PropertyKind::Text => "text",
        PropertyKind::ForeignKey { .. } => "foreign key",
        PropertyKind::Serialized => "serialized object",
        PropertyKind::Transient { .. } => "transient",
    }
}

/// Encodes one property value as a SQLite column value.
pub(crate) fn to_sql_value(kind: &PropertyKind, value: &PropertyValue) -> StoreResult<SqlValue> {
    match (kind, value) {
        (PropertyKind::Id, PropertyValue::Integer(v)) => Ok(SqlValue::Integer(*v)),
        (PropertyKind::Boolean, PropertyValue::Bool(v)) => Ok(SqlValue::Integer(bool_to_int(*v))),
        (PropertyKind::Integer, PropertyValue::Integer(v)) => Ok(SqlValue::Integer(*v)),
        (PropertyKind::Text, PropertyValue::Text(v)) => Ok(SqlValue::Text(v.clone())),
        (PropertyKind::ForeignKey { .. }, PropertyValue::Integer(v)) => Ok(SqlValue::Integer(*v)),
        (PropertyKind::ForeignKey { .. }, PropertyValue::Null) => Ok(SqlValue::Null),
        (PropertyKind::Serialized, PropertyValue::Json(v)) if v.is_null() => Ok(SqlValue::Null),
        (PropertyKind::Serialized, PropertyValue::Json(v)) => {
            Ok(SqlValue::Text(serde_json::to_string(v)?))
        }
        (PropertyKind::Transient { .. }, _) => Err(StoreError::InvalidData(
            "transient property has no column encoding".to_string(),
        )),
        (kind, value) => Err(StoreError::InvalidData(format!(
            "cannot encode {} value as {} column",
            value.form(),
            kind_label(kind)
        ))),
    }
}

/// Decodes one SQLite column value under the descriptor's kind.
pub(crate) fn from_sql_value(
    kind: &PropertyKind,
    column: &str,
    value: ValueRef<'_>,
) -> StoreResult<PropertyValue> {
    match kind {
        PropertyKind::Id | PropertyKind::Integer => match value {
            ValueRef::Integer(v) => Ok(PropertyValue::Integer(v)),
            other => Err(decode_error(column, kind, other)),
        },
        PropertyKind::Boolean => match value {
            ValueRef::Integer(0) => Ok(PropertyValue::Bool(false)),
            ValueRef::Integer(1) => Ok(PropertyValue::Bool(true)),
            ValueRef::Integer(other) => Err(StoreError::InvalidData(format!(
                "invalid boolean value `{other}` in column `{column}`"
            ))),
            other => Err(decode_error(column, kind, other)),
        },
        PropertyKind::Text => match value {
            ValueRef::Text(bytes) => Ok(PropertyValue::Text(text_from_bytes(column, bytes)?)),
            other => Err(decode_error(column, kind, other)),
        },
        PropertyKind::ForeignKey { .. } => match value {
            ValueRef::Integer(v) => Ok(PropertyValue::Integer(v)),
            ValueRef::Null => Ok(PropertyValue::Null),
            other => Err(decode_error(column, kind, other)),
        },
        PropertyKind::Serialized => match value {
            ValueRef::Null => Ok(PropertyValue::Json(serde_json::Value::Null)),
            ValueRef::Text(bytes) => {
                let parsed = serde_json::from_slice(bytes).map_err(|err| {
                    StoreError::InvalidData(format!(
                        "invalid serialized payload in column `{column}`: {err}"
                    ))
                })?;
                Ok(PropertyValue::Json(parsed))
            }
            other => Err(decode_error(column, kind, other)),
        },
        PropertyKind::Transient { .. } => Err(StoreError::InvalidData(format!(
            "transient property `{column}` has no column to decode"
        ))),
    }
}

/// Fills missing transient properties with their declared defaults.
pub(crate) fn with_transient_defaults(
    definition: &StoreDefinition,
    row: PropertyMap,
) -> PropertyMap {
    let mut merged = row;
    for descriptor in &definition.properties {
        if let PropertyKind::Transient { default } = &descriptor.kind {
            merged
                .entry(descriptor.name.clone())
                .or_insert_with(|| default.clone());
        }
    }
    merged
}

/// Reads a required boolean property.
pub fn prop_bool(props: &PropertyMap, name: &str) -> StoreResult<bool> {
    as_bool(required(props, name)?, name)
}

/// Reads an optional boolean property, defaulting when absent.
pub fn prop_bool_or(props: &PropertyMap, name: &str, default: bool) -> StoreResult<bool> {
    match props.get(name) {
        Some(value) => as_bool(value, name),
        None => Ok(default),
    }
}

/// Reads a required integer property.
pub fn prop_i64(props: &PropertyMap, name: &str) -> StoreResult<i64> {
    as_i64(required(props, name)?, name)
}

/// Reads an integer property that may be null or absent.
pub fn prop_opt_i64(props: &PropertyMap, name: &str) -> StoreResult<Option<i64>> {
    match props.get(name) {
        Some(PropertyValue::Null) | None => Ok(None),
        Some(value) => Ok(Some(as_i64(value, name)?)),
    }
}

/// Reads a required text property.
pub fn prop_text(props: &PropertyMap, name: &str) -> StoreResult<String> {
    as_text(required(props, name)?, name)
}

/// Reads a required serialized property.
pub fn prop_json(props: &PropertyMap, name: &str) -> StoreResult<serde_json::Value> {
    as_json(required(props, name)?, name)
}

pub fn as_bool(value: &PropertyValue, name: &str) -> StoreResult<bool> {
    match value {
        PropertyValue::Bool(v) => Ok(*v),
        other => Err(form_error(name, "boolean", other)),
    }
}

pub fn as_i64(value: &PropertyValue, name: &str) -> StoreResult<i64> {
    match value {
        PropertyValue::Integer(v) => Ok(*v),
        other => Err(form_error(name, "integer", other)),
    }
}

pub fn as_text(value: &PropertyValue, name: &str) -> StoreResult<String> {
    match value {
        PropertyValue::Text(v) => Ok(v.clone()),
        other => Err(form_error(name, "text", other)),
    }
}

pub fn as_json(value: &PropertyValue, name: &str) -> StoreResult<serde_json::Value> {
    match value {
        PropertyValue::Json(v) => Ok(v.clone()),
        other => Err(form_error(name, "json", other)),
    }
}

fn required<'map>(props: &'map PropertyMap, name: &str) -> StoreResult<&'map PropertyValue> {
    props
        .get(name)
        .ok_or_else(|| StoreError::InvalidData(format!("missing property `{name}`")))
}

fn form_error(name: &str, expected: &str, got: &PropertyValue) -> StoreError {
    StoreError::InvalidData(format!(
        "property `{name}` expects {expected}, got {}",
        got.form()
    ))
}

fn decode_error(column: &str, kind: &PropertyKind, value: ValueRef<'_>) -> StoreError {
    StoreError::InvalidData(format!(
        "column `{column}` holds {} incompatible with {}",
        sql_form(value),
        kind_label(kind)
    ))
}

fn text_from_bytes(column: &str, bytes: &[u8]) -> StoreResult<String> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => Err(StoreError::InvalidData(format!(
            "column `{column}` holds non-UTF-8 text"
        ))),
    }
}

fn sql_form(value: ValueRef<'_>) -> &'static str {
    match value {
        ValueRef::Null => "NULL",
        ValueRef::Integer(_) => "INTEGER",
        ValueRef::Real(_) => "REAL",
        ValueRef::Text(_) => "TEXT",
        ValueRef::Blob(_) => "BLOB",
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::{
        from_sql_value, prop_bool, prop_bool_or, prop_map, prop_opt_i64, to_sql_value,
        value_matches_kind, PropertyDescriptor, PropertyKind, PropertyValue,
    };
    use crate::store::StoreError;
    use rusqlite::types::{Value as SqlValue, ValueRef};

    #[test]
    fn boolean_encodes_as_integer_and_rejects_out_of_range_decode() {
        let encoded = to_sql_value(&PropertyKind::Boolean, &PropertyValue::Bool(true)).unwrap();
        assert_eq!(encoded, SqlValue::Integer(1));

        let decoded =
            from_sql_value(&PropertyKind::Boolean, "deleted", ValueRef::Integer(0)).unwrap();
        assert_eq!(decoded, PropertyValue::Bool(false));

        let err =
            from_sql_value(&PropertyKind::Boolean, "deleted", ValueRef::Integer(2)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn serialized_round_trips_without_interpretation() {
        let payload = PropertyValue::Json(serde_json::json!({"x": 1, "nested": {"y": [1, 2]}}));
        let encoded = to_sql_value(&PropertyKind::Serialized, &payload).unwrap();
        let text = match &encoded {
            SqlValue::Text(text) => text.clone(),
            other => panic!("expected text encoding, got {other:?}"),
        };

        let decoded =
            from_sql_value(&PropertyKind::Serialized, "rect", ValueRef::Text(text.as_bytes()))
                .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn serialized_null_maps_to_sql_null() {
        let encoded = to_sql_value(
            &PropertyKind::Serialized,
            &PropertyValue::Json(serde_json::Value::Null),
        )
        .unwrap();
        assert_eq!(encoded, SqlValue::Null);

        let decoded = from_sql_value(&PropertyKind::Serialized, "data", ValueRef::Null).unwrap();
        assert_eq!(decoded, PropertyValue::Json(serde_json::Value::Null));
    }

    #[test]
    fn foreign_key_accepts_integer_or_null() {
        let fk = PropertyKind::ForeignKey {
            store: "instrument/records".to_string(),
        };
        assert!(value_matches_kind(&fk, &PropertyValue::Integer(42)));
        assert!(value_matches_kind(&fk, &PropertyValue::Null));
        assert!(!value_matches_kind(&fk, &PropertyValue::Text("42".to_string())));
    }

    #[test]
    fn transient_is_never_writable() {
        let descriptor = PropertyDescriptor::transient("selected", PropertyValue::Bool(false));
        assert!(!descriptor.is_persisted());
        assert!(!value_matches_kind(&descriptor.kind, &PropertyValue::Bool(true)));
    }

    #[test]
    fn map_accessors_report_missing_and_mismatched_properties() {
        let props = prop_map([("deleted", PropertyValue::Bool(false))]);

        assert!(!prop_bool(&props, "deleted").unwrap());
        assert!(prop_bool_or(&props, "selected", true).unwrap());
        assert_eq!(prop_opt_i64(&props, "oid").unwrap(), None);

        let err = prop_bool(&props, "missing").unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(message) if message.contains("missing")));
    }
}
