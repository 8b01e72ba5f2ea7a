//! Map field: a register per key.

use super::{CrdtField, PatchResult, RegisterMetadata, UpdateResult};
use crate::identifier::{create_duplex_id, Identifier};
use crate::{StoreId, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Visible entries of a map. Never contains `null`.
pub type MapValue = BTreeMap<String, Value>;

/// Entries to write. A `null` value deletes the key.
pub type MapUpdate = BTreeMap<String, Value>;

/// A field holding a string-keyed map of JSON values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MapField;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetadata {
    /// Surviving writes per key
    pub entries: BTreeMap<String, RegisterMetadata>,
}

impl MapMetadata {
    pub(crate) fn max_version(&self) -> Version {
        self.entries
            .values()
            .map(RegisterMetadata::max_version)
            .max()
            .unwrap_or(0)
    }
}

/// Per-key before/after values; `null` means absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapChange {
    pub previous: BTreeMap<String, Value>,
    pub current: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPatch {
    pub id: Identifier,
    pub values: BTreeMap<String, Value>,
}

enum Direction {
    Apply,
    Unapply,
}

fn write(
    previous: &MapValue,
    id: &Identifier,
    values: &BTreeMap<String, Value>,
    metadata: &mut MapMetadata,
    direction: Direction,
) -> PatchResult<MapValue, MapChange> {
    let mut value = previous.clone();
    let mut change = MapChange::default();

    for (key, written) in values {
        let entry = metadata.entries.entry(key.clone()).or_default();
        match direction {
            Direction::Apply => entry.set(id, written.clone()),
            Direction::Unapply => {
                entry.remove(id);
            }
        }
        let current = entry.current().cloned().unwrap_or(Value::Null);
        if entry.is_empty() {
            metadata.entries.remove(key);
        }

        let before = if current.is_null() {
            value.remove(key)
        } else {
            value.insert(key.clone(), current.clone())
        };
        change
            .previous
            .insert(key.clone(), before.unwrap_or(Value::Null));
        change.current.insert(key.clone(), current);
    }

    PatchResult { value, change }
}

impl CrdtField for MapField {
    type Value = MapValue;
    type Metadata = MapMetadata;
    type Update = MapUpdate;
    type Change = MapChange;
    type Patch = MapPatch;

    fn create_value(&self) -> MapValue {
        MapValue::new()
    }

    fn create_metadata(&self) -> MapMetadata {
        MapMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &MapValue,
        update: &MapUpdate,
        metadata: &mut MapMetadata,
        version: Version,
        store: StoreId,
    ) -> UpdateResult<MapValue, MapChange, MapPatch> {
        let id = create_duplex_id(version, store);
        let result = write(previous, &id, update, metadata, Direction::Apply);
        UpdateResult {
            value: result.value,
            change: result.change,
            patch: MapPatch {
                id,
                values: update.clone(),
            },
        }
    }

    fn apply_patch(
        &self,
        previous: &MapValue,
        patch: &MapPatch,
        metadata: &mut MapMetadata,
    ) -> PatchResult<MapValue, MapChange> {
        write(previous, &patch.id, &patch.values, metadata, Direction::Apply)
    }

    fn unapply_patch(
        &self,
        previous: &MapValue,
        patch: &MapPatch,
        metadata: &mut MapMetadata,
    ) -> PatchResult<MapValue, MapChange> {
        write(
            previous,
            &patch.id,
            &patch.values,
            metadata,
            Direction::Unapply,
        )
    }

    fn merge_change(&self, first: MapChange, second: MapChange) -> MapChange {
        let mut previous = second.previous;
        previous.extend(first.previous);
        let mut current = first.current;
        current.extend(second.current);
        MapChange { previous, current }
    }

    fn merge_patch(&self, first: MapPatch, second: MapPatch) -> MapPatch {
        let mut values = first.values;
        values.extend(second.values);
        MapPatch {
            id: second.id,
            values,
        }
    }
}
