//! Register field: a multi-value register resolved by last writer.

use super::{CrdtField, PatchResult, UpdateResult};
use crate::identifier::{create_duplex_id, Identifier};
use crate::{StoreId, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A field holding a single atomic JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterField {
    /// Value of the field before any write, and after every write is undone
    pub default: Value,
}

impl RegisterField {
    pub fn new(default: Value) -> Self {
        Self { default }
    }
}

/// Every surviving write, sorted by id. The highest id is the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMetadata {
    pub ids: Vec<Identifier>,
    pub values: Vec<Value>,
}

impl RegisterMetadata {
    /// Insert a write, or overwrite the write with the same id.
    pub fn set(&mut self, id: &Identifier, value: Value) {
        match self.ids.binary_search(id) {
            Ok(i) => self.values[i] = value,
            Err(i) => {
                self.ids.insert(i, id.clone());
                self.values.insert(i, value);
            }
        }
    }

    /// Remove the write with the given id. Returns whether it was present.
    pub fn remove(&mut self, id: &Identifier) -> bool {
        match self.ids.binary_search(id) {
            Ok(i) => {
                self.ids.remove(i);
                self.values.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// The winning value, if any write survives.
    pub fn current(&self) -> Option<&Value> {
        self.values.last()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn max_version(&self) -> Version {
        self.ids.iter().map(Identifier::max_version).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterChange {
    pub previous: Value,
    pub current: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPatch {
    pub id: Identifier,
    pub value: Value,
}

impl RegisterField {
    fn current(&self, metadata: &RegisterMetadata) -> Value {
        metadata
            .current()
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl CrdtField for RegisterField {
    type Value = Value;
    type Metadata = RegisterMetadata;
    type Update = Value;
    type Change = RegisterChange;
    type Patch = RegisterPatch;

    fn create_value(&self) -> Value {
        self.default.clone()
    }

    fn create_metadata(&self) -> RegisterMetadata {
        RegisterMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &Value,
        update: &Value,
        metadata: &mut RegisterMetadata,
        version: Version,
        store: StoreId,
    ) -> UpdateResult<Value, RegisterChange, RegisterPatch> {
        let id = create_duplex_id(version, store);
        metadata.set(&id, update.clone());
        let value = self.current(metadata);
        UpdateResult {
            change: RegisterChange {
                previous: previous.clone(),
                current: value.clone(),
            },
            patch: RegisterPatch {
                id,
                value: update.clone(),
            },
            value,
        }
    }

    fn apply_patch(
        &self,
        previous: &Value,
        patch: &RegisterPatch,
        metadata: &mut RegisterMetadata,
    ) -> PatchResult<Value, RegisterChange> {
        metadata.set(&patch.id, patch.value.clone());
        let value = self.current(metadata);
        PatchResult {
            change: RegisterChange {
                previous: previous.clone(),
                current: value.clone(),
            },
            value,
        }
    }

    fn unapply_patch(
        &self,
        previous: &Value,
        patch: &RegisterPatch,
        metadata: &mut RegisterMetadata,
    ) -> PatchResult<Value, RegisterChange> {
        metadata.remove(&patch.id);
        let value = self.current(metadata);
        PatchResult {
            change: RegisterChange {
                previous: previous.clone(),
                current: value.clone(),
            },
            value,
        }
    }

    fn merge_change(&self, first: RegisterChange, second: RegisterChange) -> RegisterChange {
        RegisterChange {
            previous: first.previous,
            current: second.current,
        }
    }

    fn merge_patch(&self, _first: RegisterPatch, second: RegisterPatch) -> RegisterPatch {
        second
    }
}
