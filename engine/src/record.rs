//! Record snapshots.
//!
//! A record is an immutable value: tables replace it wholesale with an
//! updated copy rather than mutating it, so an `Arc<Record>` handed out
//! earlier keeps describing the state it was read from.

use crate::{
    error::Result,
    field::{FieldMetadata, FieldValue},
    Error, RecordId, Schema, Version,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Snapshot key holding the record id.
pub const ID_KEY: &str = "$id";

/// Snapshot key holding the per-field metadata.
pub const METADATA_KEY: &str = "@@metadata";

/// A data record in a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique identifier within the table
    pub id: RecordId,
    /// Current value of every schema field
    pub fields: BTreeMap<String, FieldValue>,
    /// Private CRDT bookkeeping of every schema field
    pub metadata: BTreeMap<String, FieldMetadata>,
}

impl Record {
    /// Create a record with every field at its initial value.
    pub fn create(schema: &Schema, id: impl Into<RecordId>) -> Self {
        let mut fields = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for (name, field) in &schema.fields {
            fields.insert(name.clone(), field.create_value());
            metadata.insert(name.clone(), field.create_metadata());
        }
        Self {
            id: id.into(),
            fields,
            metadata,
        }
    }

    /// Get the value of a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Replace one field's value and metadata.
    ///
    /// Tables call this on a private copy before swapping it in.
    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue, metadata: FieldMetadata) {
        self.fields.insert(name.to_string(), value);
        self.metadata.insert(name.to_string(), metadata);
    }

    /// The largest version referenced by any field's metadata.
    pub fn max_version(&self) -> Version {
        self.metadata
            .values()
            .map(FieldMetadata::max_version)
            .max()
            .unwrap_or(0)
    }

    /// Plain field values keyed by name, without id or metadata.
    pub fn values(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Serialize to the snapshot record shape.
    pub fn to_json(&self) -> Result<Value> {
        let mut object = Map::new();
        object.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        object.insert(
            METADATA_KEY.to_string(),
            serde_json::to_value(&self.metadata)?,
        );
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        Ok(Value::Object(object))
    }

    /// Read a record from the snapshot shape.
    ///
    /// Fields missing from the object start at their initial state. Entries
    /// not named by the schema are ignored.
    pub fn from_json(schema: &Schema, json: &Value) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| Error::InvalidSnapshot(format!("record is not an object: {json}")))?;
        let id = object
            .get(ID_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidSnapshot(format!("record without {ID_KEY}")))?
            .to_string();

        let mut stored: BTreeMap<String, FieldMetadata> = match object.get(METADATA_KEY) {
            Some(metadata) => serde_json::from_value(metadata.clone())?,
            None => BTreeMap::new(),
        };

        let mut record = Record::create(schema, id.clone());
        for (name, field) in &schema.fields {
            let value = field.value_from_json(object.get(name))?;
            let metadata = stored
                .remove(name)
                .unwrap_or_else(|| field.create_metadata());
            if metadata.kind() != field.kind() || !is_consistent(&value, &metadata) {
                return Err(Error::InvalidRecord(id));
            }
            record.fields.insert(name.clone(), value);
            record.metadata.insert(name.clone(), metadata);
        }
        Ok(record)
    }
}

/// Sequence metadata must hold exactly one id per element.
fn is_consistent(value: &FieldValue, metadata: &FieldMetadata) -> bool {
    match (value, metadata) {
        (FieldValue::List(items), FieldMetadata::List(m)) => items.len() == m.ids.len(),
        (FieldValue::Text(text), FieldMetadata::Text(m)) => text.chars().count() == m.ids.len(),
        _ => true,
    }
}
