//! Tables: the records of one schema, ordered by record id.

use crate::{
    error::Result,
    field::{Field, FieldChange, FieldPatch, FieldUpdate},
    transaction::Context,
    Error, Record, RecordId, Schema,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Local edits: `recordId -> field -> update`.
pub type TableUpdate = BTreeMap<RecordId, BTreeMap<String, FieldUpdate>>;

/// Wire deltas: `recordId -> field -> patch`.
pub type TablePatch = BTreeMap<RecordId, BTreeMap<String, FieldPatch>>;

/// User-facing deltas: `recordId -> field -> change`.
pub type TableChange = BTreeMap<RecordId, BTreeMap<String, FieldChange>>;

/// The records of one schema.
///
/// Records are never mutated in place: every update or patch swaps in a
/// new `Arc<Record>`, so snapshots obtained from [`Table::get`] stay valid.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    records: BTreeMap<RecordId, Arc<Record>>,
}

impl Table {
    /// Create an empty table.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.records.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }

    /// The record at `index` in id order.
    pub fn at(&self, index: usize) -> Option<&Arc<Record>> {
        self.records.values().nth(index)
    }

    /// Serialize every record to the snapshot shape.
    pub fn to_json(&self) -> Result<Vec<Value>> {
        self.records.values().map(|record| record.to_json()).collect()
    }

    /// Insert restored records, replacing any with the same id.
    pub(crate) fn restore(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.records.insert(record.id.clone(), Arc::new(record));
        }
    }

    /// Apply local edits within the open transaction of `context`.
    ///
    /// The whole update is checked against the schema first; an invalid
    /// update leaves both the table and the context untouched.
    pub(crate) fn update(&mut self, context: &mut Context, data: TableUpdate) -> Result<()> {
        if !context.in_transaction {
            return Err(Error::NoTransaction);
        }
        self.validate(&data)?;

        for (record_id, fields) in data {
            let mut next = Record::clone(&self.record_or_default(&record_id));
            let mut record_change = BTreeMap::new();
            let mut record_patch = BTreeMap::new();

            for (name, update) in &fields {
                let field = self.field(name)?;
                let previous = next
                    .fields
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| field.create_value());
                let mut metadata = next
                    .metadata
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| field.create_metadata());

                let result = field.apply_update(
                    &previous,
                    update,
                    &mut metadata,
                    context.version,
                    context.store_id,
                )?;
                next.set_field(name, result.value, metadata);
                record_change.insert(name.clone(), result.change);
                record_patch.insert(name.clone(), result.patch);
            }

            self.records.insert(record_id.clone(), Arc::new(next));
            self.accumulate(context, &record_id, record_change, record_patch)?;
        }

        Ok(())
    }

    /// Apply a remote patch, returning what changed.
    pub(crate) fn patch(&mut self, patch: &TablePatch) -> TableChange {
        self.patch_with(patch, false)
    }

    /// Revert a remote patch, returning what changed.
    pub(crate) fn unpatch(&mut self, patch: &TablePatch) -> TableChange {
        self.patch_with(patch, true)
    }

    fn patch_with(&mut self, patch: &TablePatch, undo: bool) -> TableChange {
        let mut change = TableChange::new();

        for (record_id, fields) in patch {
            let mut next = Record::clone(&self.record_or_default(record_id));
            let mut record_change = BTreeMap::new();
            let mut touched = false;

            for (name, field_patch) in fields {
                let Some(field) = self.schema.field(name) else {
                    tracing::warn!(
                        schema = %self.schema.id,
                        record = %record_id,
                        field = %name,
                        "skipping patch for unknown field"
                    );
                    continue;
                };
                let previous = next
                    .fields
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| field.create_value());
                let mut metadata = next
                    .metadata
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| field.create_metadata());

                let result = if undo {
                    field.unapply_patch(&previous, field_patch, &mut metadata)
                } else {
                    field.apply_patch(&previous, field_patch, &mut metadata)
                };
                match result {
                    Ok(result) => {
                        next.set_field(name, result.value, metadata);
                        touched = true;
                        // Cemetery-only bookkeeping still lands in the metadata.
                        if !result.change.is_empty() {
                            record_change.insert(name.clone(), result.change);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            schema = %self.schema.id,
                            record = %record_id,
                            field = %name,
                            error = %err,
                            "skipping malformed field patch"
                        );
                    }
                }
            }

            if touched {
                self.records.insert(record_id.clone(), Arc::new(next));
            }
            if !record_change.is_empty() {
                change.insert(record_id.clone(), record_change);
            }
        }

        change
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.schema.field(name).ok_or_else(|| Error::UnknownField {
            schema: self.schema.id.clone(),
            field: name.to_string(),
        })
    }

    fn validate(&self, data: &TableUpdate) -> Result<()> {
        for fields in data.values() {
            for (name, update) in fields {
                let field = self.field(name)?;
                if field.kind() != update.kind() {
                    return Err(Error::FieldKindMismatch {
                        expected: field.kind(),
                        got: update.kind(),
                    });
                }
            }
        }
        Ok(())
    }

    fn record_or_default(&self, id: &str) -> Arc<Record> {
        self.records
            .get(id)
            .cloned()
            .unwrap_or_else(|| Arc::new(Record::create(&self.schema, id)))
    }

    /// Compose this record's deltas with earlier ones from the same
    /// transaction.
    fn accumulate(
        &self,
        context: &mut Context,
        record_id: &str,
        change: BTreeMap<String, FieldChange>,
        patch: BTreeMap<String, FieldPatch>,
    ) -> Result<()> {
        let changes = context
            .change
            .entry(self.schema.id.clone())
            .or_default()
            .entry(record_id.to_string())
            .or_default();
        for (name, next) in change {
            let merged = match changes.remove(&name) {
                Some(earlier) => self.field(&name)?.merge_change(earlier, next)?,
                None => next,
            };
            changes.insert(name, merged);
        }

        let patches = context
            .patch
            .entry(self.schema.id.clone())
            .or_default()
            .entry(record_id.to_string())
            .or_default();
        for (name, next) in patch {
            let merged = match patches.remove(&name) {
                Some(earlier) => self.field(&name)?.merge_patch(earlier, next)?,
                None => next,
            };
            patches.insert(name, merged);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;
    use serde_json::json;

    fn table() -> Table {
        Table::new(
            Schema::new("todos")
                .with_field("title", Field::text())
                .with_field("done", Field::register_with_default(json!(false)))
                .with_field("tags", Field::list()),
        )
    }

    fn context(version: u64, store_id: u32) -> Context {
        let mut context = Context::default();
        context.begin(format!("tx-{version}"), version, store_id);
        context
    }

    fn update(record: &str, fields: Vec<(&str, FieldUpdate)>) -> TableUpdate {
        let mut data = TableUpdate::new();
        data.insert(
            record.to_string(),
            fields
                .into_iter()
                .map(|(name, u)| (name.to_string(), u))
                .collect(),
        );
        data
    }

    #[test]
    fn update_requires_transaction() {
        let mut table = table();
        let mut context = Context::default();
        let result = table.update(&mut context, update("a", vec![("done", FieldUpdate::set(true))]));
        assert_eq!(result, Err(Error::NoTransaction));
    }

    #[test]
    fn update_creates_records_lazily() {
        let mut table = table();
        let mut context = context(1, 1);
        table
            .update(&mut context, update("b", vec![("done", FieldUpdate::set(true))]))
            .unwrap();
        table
            .update(&mut context, update("a", vec![("title", FieldUpdate::edit(0, 0, "x"))]))
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.has("a"));
        assert_eq!(table.at(0).unwrap().id, "a");
        assert_eq!(table.at(1).unwrap().id, "b");
        assert_eq!(
            table.get("b").unwrap().get("done"),
            Some(&FieldValue::Register(json!(true)))
        );
        // Untouched fields keep their defaults.
        assert_eq!(
            table.get("a").unwrap().get("done"),
            Some(&FieldValue::Register(json!(false)))
        );
        assert_eq!(context.patch["todos"].len(), 2);
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let mut table = table();
        let mut context = context(1, 1);
        let data = update(
            "a",
            vec![
                ("done", FieldUpdate::set(true)),
                ("tags", FieldUpdate::edit(0, 0, "nope")),
            ],
        );
        assert_eq!(
            table.update(&mut context, data),
            Err(Error::FieldKindMismatch {
                expected: crate::field::FieldKind::List,
                got: crate::field::FieldKind::Text,
            })
        );
        assert!(table.is_empty());
        assert!(context.patch.is_empty());

        let data = update("a", vec![("missing", FieldUpdate::set(1))]);
        assert!(matches!(
            table.update(&mut context, data),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn repeated_updates_compose_in_context() {
        let mut table = table();
        let mut context = context(1, 1);
        table
            .update(&mut context, update("a", vec![("done", FieldUpdate::set(true))]))
            .unwrap();
        table
            .update(&mut context, update("a", vec![("done", FieldUpdate::set("maybe"))]))
            .unwrap();
        table
            .update(&mut context, update("a", vec![("title", FieldUpdate::edit(0, 0, "ab"))]))
            .unwrap();
        table
            .update(&mut context, update("a", vec![("title", FieldUpdate::edit(2, 0, "c"))]))
            .unwrap();

        match &context.change["todos"]["a"]["done"] {
            FieldChange::Register(change) => {
                assert_eq!(change.previous, json!(false));
                assert_eq!(change.current, json!("maybe"));
            }
            other => panic!("unexpected change {other:?}"),
        }
        match &context.patch["todos"]["a"]["title"] {
            FieldPatch::Text(parts) => assert_eq!(parts.len(), 2),
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn snapshots_survive_later_updates() {
        let mut table = table();
        let mut context = context(1, 1);
        table
            .update(&mut context, update("a", vec![("done", FieldUpdate::set(true))]))
            .unwrap();
        let before = Arc::clone(table.get("a").unwrap());
        table
            .update(&mut context, update("a", vec![("done", FieldUpdate::set(false))]))
            .unwrap();

        assert_eq!(before.get("done"), Some(&FieldValue::Register(json!(true))));
        assert_eq!(
            table.get("a").unwrap().get("done"),
            Some(&FieldValue::Register(json!(false)))
        );
    }

    #[test]
    fn patch_and_unpatch_on_another_table() {
        let mut local = table();
        let mut remote = table();
        let mut context = context(1, 1);
        local
            .update(
                &mut context,
                update(
                    "a",
                    vec![
                        ("title", FieldUpdate::edit(0, 0, "hello")),
                        ("tags", FieldUpdate::splice(0, 0, vec![json!("x")])),
                    ],
                ),
            )
            .unwrap();
        let patch = context.patch["todos"].clone();

        let change = remote.patch(&patch);
        assert_eq!(change["a"].len(), 2);
        assert_eq!(remote.get("a").unwrap().values(), local.get("a").unwrap().values());
        assert_eq!(remote.to_json().unwrap()[0]["$id"], json!("a"));

        remote.unpatch(&patch);
        assert_eq!(
            remote.get("a").unwrap().values(),
            json!({"title": "", "done": false, "tags": []})
        );
    }

    #[test]
    fn early_removal_changes_metadata_only() {
        let mut table = table();
        let ghost = crate::identifier::create_triplex_id(1, 9, None, None);
        let mut patch = TablePatch::new();
        patch.entry("a".to_string()).or_default().insert(
            "title".to_string(),
            FieldPatch::Text(vec![crate::field::TextPatchPart {
                removed_ids: vec![ghost.clone()],
                removed_text: "x".to_string(),
                inserted_ids: Vec::new(),
                inserted_text: String::new(),
            }]),
        );

        let change = table.patch(&patch);
        assert!(change.is_empty());

        let record = table.get("a").unwrap();
        assert_eq!(record.get("title").unwrap().as_text(), Some(""));
        match &record.metadata["title"] {
            crate::field::FieldMetadata::Text(m) => assert_eq!(m.cemetery.get(&ghost), Some(&1)),
            other => panic!("unexpected metadata {other:?}"),
        }
    }

    #[test]
    fn patch_skips_unknown_and_mismatched_fields() {
        let mut table = table();
        let mut context = context(1, 2);
        let mut source = Table::new(
            Schema::new("todos")
                .with_field("title", Field::register())
                .with_field("extra", Field::register()),
        );
        source
            .update(
                &mut context,
                update(
                    "a",
                    vec![("title", FieldUpdate::set("x")), ("extra", FieldUpdate::set(1))],
                ),
            )
            .unwrap();

        let change = table.patch(&context.patch["todos"]);
        assert!(change.is_empty());
        assert!(!table.has("a"));
    }
}
