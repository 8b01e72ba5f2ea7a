//! Snapshots for persisting and restoring datastore contents.
//!
//! The format is a JSON object keyed by schema id, each value an array of
//! records in the [`Record::to_json`] shape. `BTreeMap` keeps the output
//! deterministic, so two converged replicas serialize identically.

use crate::{error::Result, Error, Record, SchemaId, Table, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Serialized records of every table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatastoreSnapshot {
    pub tables: BTreeMap<SchemaId, Vec<Value>>,
}

impl DatastoreSnapshot {
    /// Capture the records of every table.
    pub fn capture<'a>(tables: impl IntoIterator<Item = &'a Table>) -> Result<Self> {
        let mut snapshot = Self::default();
        for table in tables {
            snapshot
                .tables
                .insert(table.schema().id.clone(), table.to_json()?);
        }
        Ok(snapshot)
    }

    /// Count records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Load the records of each table that has an entry in the snapshot.
    ///
    /// Schema ids without a table are skipped. Returns the highest version
    /// referenced by any restored metadata.
    pub fn restore_into(&self, tables: &mut BTreeMap<SchemaId, Table>) -> Result<Version> {
        let mut version = 0;
        for (schema_id, records) in &self.tables {
            let Some(table) = tables.get_mut(schema_id) else {
                tracing::warn!(schema = %schema_id, "snapshot names unknown schema, skipping");
                continue;
            };
            let records = records
                .iter()
                .map(|json| Record::from_json(table.schema(), json))
                .collect::<Result<Vec<_>>>()?;
            version = records
                .iter()
                .map(Record::max_version)
                .fold(version, Version::max);
            table.restore(records);
        }
        Ok(version)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::Schema;
    use serde_json::json;

    fn tables() -> BTreeMap<SchemaId, Table> {
        let mut tables = BTreeMap::new();
        tables.insert(
            "todos".to_string(),
            Table::new(Schema::new("todos").with_field("title", Field::text())),
        );
        tables
    }

    #[test]
    fn restore_skips_unknown_tables() {
        let snapshot = DatastoreSnapshot::from_json(
            r#"{"todos": [{"$id": "a", "title": ""}], "other": [{"$id": "z"}]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.record_count(), 2);

        let mut tables = tables();
        let version = snapshot.restore_into(&mut tables).unwrap();
        assert_eq!(version, 0);
        assert!(tables["todos"].has("a"));
    }

    #[test]
    fn capture_round_trip() {
        let mut tables = tables();
        let record = Record::from_json(
            tables["todos"].schema(),
            &json!({"$id": "a", "title": ""}),
        )
        .unwrap();
        tables.get_mut("todos").unwrap().restore([record]);

        let snapshot = DatastoreSnapshot::capture(tables.values()).unwrap();
        let json = snapshot.to_json().unwrap();
        assert!(json.starts_with(r#"{"todos":[{"$id":"a""#));
        assert_eq!(DatastoreSnapshot::from_json(&json).unwrap(), snapshot);
        assert!(snapshot.to_json_pretty().unwrap().contains('\n'));
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        assert!(matches!(
            DatastoreSnapshot::from_json("[1, 2]"),
            Err(Error::InvalidSnapshot(_))
        ));
        let snapshot = DatastoreSnapshot::from_json(r#"{"todos": [{"title": ""}]}"#).unwrap();
        assert!(matches!(
            snapshot.restore_into(&mut tables()),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
