//! Field CRDTs.
//!
//! Every field of a schema is one of four kinds. Each kind implements
//! [`CrdtField`], which covers the local edit path (`apply_update`), the
//! remote path (`apply_patch` / `unapply_patch`) and the merging of deltas
//! produced within a single transaction.
//!
//! [`Field`] is the closed set of kinds stored in a schema. Its methods work
//! on the type-erased [`FieldValue`], [`FieldUpdate`], [`FieldChange`],
//! [`FieldPatch`] and [`FieldMetadata`] enums and dispatch to the concrete
//! implementation, rejecting mismatched kinds.

mod list;
mod map;
mod register;
mod text;

pub use list::{ListChangePart, ListField, ListPatchPart, ListSplice, SequenceMetadata};
pub use map::{MapChange, MapField, MapMetadata, MapPatch, MapUpdate, MapValue};
pub use register::{RegisterChange, RegisterField, RegisterMetadata, RegisterPatch};
pub use text::{TextChangePart, TextField, TextPatchPart, TextSplice};

use crate::{error::Result, Error, StoreId, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Output of a local edit.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult<V, C, P> {
    /// The new field value
    pub value: V,
    /// User-facing delta
    pub change: C,
    /// Wire-format delta
    pub patch: P,
}

/// Output of applying or unapplying a remote patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchResult<V, C> {
    /// The new field value
    pub value: V,
    /// User-facing delta
    pub change: C,
}

/// The capability set shared by all field kinds.
pub trait CrdtField {
    type Value: Clone;
    type Metadata: Clone;
    type Update;
    type Change;
    type Patch;

    /// The value of the field in a fresh record.
    fn create_value(&self) -> Self::Value;

    /// The private bookkeeping of the field in a fresh record.
    fn create_metadata(&self) -> Self::Metadata;

    /// Apply a local edit made at `version` by replica `store`.
    fn apply_update(
        &self,
        previous: &Self::Value,
        update: &Self::Update,
        metadata: &mut Self::Metadata,
        version: Version,
        store: StoreId,
    ) -> UpdateResult<Self::Value, Self::Change, Self::Patch>;

    /// Apply a patch produced by another replica.
    fn apply_patch(
        &self,
        previous: &Self::Value,
        patch: &Self::Patch,
        metadata: &mut Self::Metadata,
    ) -> PatchResult<Self::Value, Self::Change>;

    /// Revert a previously applied patch.
    fn unapply_patch(
        &self,
        previous: &Self::Value,
        patch: &Self::Patch,
        metadata: &mut Self::Metadata,
    ) -> PatchResult<Self::Value, Self::Change>;

    /// Combine two changes made to the field within one transaction.
    fn merge_change(&self, first: Self::Change, second: Self::Change) -> Self::Change;

    /// Combine two patches made to the field within one transaction.
    fn merge_patch(&self, first: Self::Patch, second: Self::Patch) -> Self::Patch;
}

/// The kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Register,
    List,
    Text,
    Map,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Register => write!(f, "register"),
            FieldKind::List => write!(f, "list"),
            FieldKind::Text => write!(f, "text"),
            FieldKind::Map => write!(f, "map"),
        }
    }
}

/// A field definition in a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Register(RegisterField),
    List(ListField),
    Text(TextField),
    Map(MapField),
}

impl Field {
    /// A register field defaulting to `null`.
    pub fn register() -> Self {
        Field::Register(RegisterField::default())
    }

    /// A register field with the given default value.
    pub fn register_with_default(default: Value) -> Self {
        Field::Register(RegisterField::new(default))
    }

    /// A list field.
    pub fn list() -> Self {
        Field::List(ListField)
    }

    /// A text field.
    pub fn text() -> Self {
        Field::Text(TextField)
    }

    /// A map field.
    pub fn map() -> Self {
        Field::Map(MapField)
    }

    /// The kind of this field.
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Register(_) => FieldKind::Register,
            Field::List(_) => FieldKind::List,
            Field::Text(_) => FieldKind::Text,
            Field::Map(_) => FieldKind::Map,
        }
    }

    fn mismatch(&self, got: FieldKind) -> Error {
        Error::FieldKindMismatch {
            expected: self.kind(),
            got,
        }
    }

    pub fn create_value(&self) -> FieldValue {
        match self {
            Field::Register(f) => FieldValue::Register(f.create_value()),
            Field::List(f) => FieldValue::List(f.create_value()),
            Field::Text(f) => FieldValue::Text(f.create_value()),
            Field::Map(f) => FieldValue::Map(f.create_value()),
        }
    }

    pub fn create_metadata(&self) -> FieldMetadata {
        match self {
            Field::Register(f) => FieldMetadata::Register(f.create_metadata()),
            Field::List(f) => FieldMetadata::List(f.create_metadata()),
            Field::Text(f) => FieldMetadata::Text(f.create_metadata()),
            Field::Map(f) => FieldMetadata::Map(f.create_metadata()),
        }
    }

    pub fn apply_update(
        &self,
        previous: &FieldValue,
        update: &FieldUpdate,
        metadata: &mut FieldMetadata,
        version: Version,
        store: StoreId,
    ) -> Result<UpdateResult<FieldValue, FieldChange, FieldPatch>> {
        use FieldMetadata as M;
        use FieldUpdate as U;
        use FieldValue as V;

        let result = match (self, previous, update, metadata) {
            (Field::Register(f), V::Register(p), U::Register(u), M::Register(m)) => {
                let r = f.apply_update(p, u, m, version, store);
                UpdateResult {
                    value: V::Register(r.value),
                    change: FieldChange::Register(r.change),
                    patch: FieldPatch::Register(r.patch),
                }
            }
            (Field::List(f), V::List(p), U::List(u), M::List(m)) => {
                let r = f.apply_update(p, u, m, version, store);
                UpdateResult {
                    value: V::List(r.value),
                    change: FieldChange::List(r.change),
                    patch: FieldPatch::List(r.patch),
                }
            }
            (Field::Text(f), V::Text(p), U::Text(u), M::Text(m)) => {
                let r = f.apply_update(p, u, m, version, store);
                UpdateResult {
                    value: V::Text(r.value),
                    change: FieldChange::Text(r.change),
                    patch: FieldPatch::Text(r.patch),
                }
            }
            (Field::Map(f), V::Map(p), U::Map(u), M::Map(m)) => {
                let r = f.apply_update(p, u, m, version, store);
                UpdateResult {
                    value: V::Map(r.value),
                    change: FieldChange::Map(r.change),
                    patch: FieldPatch::Map(r.patch),
                }
            }
            _ => return Err(self.mismatch(update.kind())),
        };
        Ok(result)
    }

    pub fn apply_patch(
        &self,
        previous: &FieldValue,
        patch: &FieldPatch,
        metadata: &mut FieldMetadata,
    ) -> Result<PatchResult<FieldValue, FieldChange>> {
        self.patch_with(previous, patch, metadata, false)
    }

    pub fn unapply_patch(
        &self,
        previous: &FieldValue,
        patch: &FieldPatch,
        metadata: &mut FieldMetadata,
    ) -> Result<PatchResult<FieldValue, FieldChange>> {
        self.patch_with(previous, patch, metadata, true)
    }

    fn patch_with(
        &self,
        previous: &FieldValue,
        patch: &FieldPatch,
        metadata: &mut FieldMetadata,
        undo: bool,
    ) -> Result<PatchResult<FieldValue, FieldChange>> {
        use FieldMetadata as M;
        use FieldPatch as P;
        use FieldValue as V;

        fn run<F: CrdtField>(
            field: &F,
            previous: &F::Value,
            patch: &F::Patch,
            metadata: &mut F::Metadata,
            undo: bool,
        ) -> PatchResult<F::Value, F::Change> {
            if undo {
                field.unapply_patch(previous, patch, metadata)
            } else {
                field.apply_patch(previous, patch, metadata)
            }
        }

        let result = match (self, previous, patch, metadata) {
            (Field::Register(f), V::Register(v), P::Register(p), M::Register(m)) => {
                let r = run(f, v, p, m, undo);
                PatchResult {
                    value: V::Register(r.value),
                    change: FieldChange::Register(r.change),
                }
            }
            (Field::List(f), V::List(v), P::List(p), M::List(m)) => {
                let r = run(f, v, p, m, undo);
                PatchResult {
                    value: V::List(r.value),
                    change: FieldChange::List(r.change),
                }
            }
            (Field::Text(f), V::Text(v), P::Text(p), M::Text(m)) => {
                let r = run(f, v, p, m, undo);
                PatchResult {
                    value: V::Text(r.value),
                    change: FieldChange::Text(r.change),
                }
            }
            (Field::Map(f), V::Map(v), P::Map(p), M::Map(m)) => {
                let r = run(f, v, p, m, undo);
                PatchResult {
                    value: V::Map(r.value),
                    change: FieldChange::Map(r.change),
                }
            }
            _ => return Err(self.mismatch(patch.kind())),
        };
        Ok(result)
    }

    pub fn merge_change(&self, first: FieldChange, second: FieldChange) -> Result<FieldChange> {
        use FieldChange as C;
        match (self, first, second) {
            (Field::Register(f), C::Register(a), C::Register(b)) => {
                Ok(C::Register(f.merge_change(a, b)))
            }
            (Field::List(f), C::List(a), C::List(b)) => Ok(C::List(f.merge_change(a, b))),
            (Field::Text(f), C::Text(a), C::Text(b)) => Ok(C::Text(f.merge_change(a, b))),
            (Field::Map(f), C::Map(a), C::Map(b)) => Ok(C::Map(f.merge_change(a, b))),
            (_, a, b) => {
                let got = if a.kind() == self.kind() { b.kind() } else { a.kind() };
                Err(self.mismatch(got))
            }
        }
    }

    pub fn merge_patch(&self, first: FieldPatch, second: FieldPatch) -> Result<FieldPatch> {
        use FieldPatch as P;
        match (self, first, second) {
            (Field::Register(f), P::Register(a), P::Register(b)) => {
                Ok(P::Register(f.merge_patch(a, b)))
            }
            (Field::List(f), P::List(a), P::List(b)) => Ok(P::List(f.merge_patch(a, b))),
            (Field::Text(f), P::Text(a), P::Text(b)) => Ok(P::Text(f.merge_patch(a, b))),
            (Field::Map(f), P::Map(a), P::Map(b)) => Ok(P::Map(f.merge_patch(a, b))),
            (_, a, b) => {
                let got = if a.kind() == self.kind() { b.kind() } else { a.kind() };
                Err(self.mismatch(got))
            }
        }
    }

    /// Read a plain JSON value (as found in a snapshot) into a field value.
    ///
    /// A missing entry yields the field's initial value.
    pub fn value_from_json(&self, json: Option<&Value>) -> Result<FieldValue> {
        let Some(json) = json else {
            return Ok(self.create_value());
        };
        let value = match (self, json) {
            (Field::Register(_), v) => FieldValue::Register(v.clone()),
            (Field::List(_), Value::Array(items)) => FieldValue::List(items.clone()),
            (Field::Text(_), Value::String(s)) => FieldValue::Text(s.clone()),
            (Field::Map(_), Value::Object(entries)) => FieldValue::Map(
                entries
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            (field, other) => {
                return Err(Error::InvalidSnapshot(format!(
                    "expected {} value, got {}",
                    field.kind(),
                    other
                )))
            }
        };
        Ok(value)
    }
}

/// The current value of a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Register(Value),
    List(Vec<Value>),
    Text(String),
    Map(MapValue),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Register(_) => FieldKind::Register,
            FieldValue::List(_) => FieldKind::List,
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Map(_) => FieldKind::Map,
        }
    }

    pub fn as_register(&self) -> Option<&Value> {
        match self {
            FieldValue::Register(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            FieldValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            FieldValue::Map(v) => Some(v),
            _ => None,
        }
    }

    /// The value as plain JSON.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Register(v) => v.clone(),
            FieldValue::List(items) => Value::Array(items.clone()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

/// Private per-field bookkeeping stored alongside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FieldMetadata {
    Register(RegisterMetadata),
    List(SequenceMetadata),
    Text(SequenceMetadata),
    Map(MapMetadata),
}

impl FieldMetadata {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldMetadata::Register(_) => FieldKind::Register,
            FieldMetadata::List(_) => FieldKind::List,
            FieldMetadata::Text(_) => FieldKind::Text,
            FieldMetadata::Map(_) => FieldKind::Map,
        }
    }

    /// The largest version of any identifier held in the metadata.
    pub fn max_version(&self) -> Version {
        match self {
            FieldMetadata::Register(m) => m.max_version(),
            FieldMetadata::List(m) | FieldMetadata::Text(m) => m.max_version(),
            FieldMetadata::Map(m) => m.max_version(),
        }
    }
}

/// A local edit to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FieldUpdate {
    Register(Value),
    List(Vec<ListSplice>),
    Text(Vec<TextSplice>),
    Map(MapUpdate),
}

impl FieldUpdate {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldUpdate::Register(_) => FieldKind::Register,
            FieldUpdate::List(_) => FieldKind::List,
            FieldUpdate::Text(_) => FieldKind::Text,
            FieldUpdate::Map(_) => FieldKind::Map,
        }
    }

    /// Overwrite a register.
    pub fn set(value: impl Into<Value>) -> Self {
        FieldUpdate::Register(value.into())
    }

    /// A single list splice.
    pub fn splice(index: usize, remove: usize, values: Vec<Value>) -> Self {
        FieldUpdate::List(vec![ListSplice {
            index,
            remove,
            values,
        }])
    }

    /// A single text splice.
    pub fn edit(index: usize, remove: usize, text: impl Into<String>) -> Self {
        FieldUpdate::Text(vec![TextSplice {
            index,
            remove,
            text: text.into(),
        }])
    }

    /// Set map entries; a `null` value deletes its key.
    pub fn entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        FieldUpdate::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A user-facing description of what changed in a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FieldChange {
    Register(RegisterChange),
    List(Vec<ListChangePart>),
    Text(Vec<TextChangePart>),
    Map(MapChange),
}

impl FieldChange {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldChange::Register(_) => FieldKind::Register,
            FieldChange::List(_) => FieldKind::List,
            FieldChange::Text(_) => FieldKind::Text,
            FieldChange::Map(_) => FieldKind::Map,
        }
    }

    /// Whether the change describes nothing observable.
    ///
    /// Register changes always carry a before/after pair.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldChange::Register(_) => false,
            FieldChange::List(parts) => parts.is_empty(),
            FieldChange::Text(parts) => parts.is_empty(),
            FieldChange::Map(change) => change.current.is_empty(),
        }
    }
}

/// The wire-format delta of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FieldPatch {
    Register(RegisterPatch),
    List(Vec<ListPatchPart>),
    Text(Vec<TextPatchPart>),
    Map(MapPatch),
}

impl FieldPatch {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldPatch::Register(_) => FieldKind::Register,
            FieldPatch::List(_) => FieldKind::List,
            FieldPatch::Text(_) => FieldKind::Text,
            FieldPatch::Map(_) => FieldKind::Map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_rejects_mismatched_update() {
        let field = Field::text();
        let mut metadata = field.create_metadata();
        let result = field.apply_update(
            &field.create_value(),
            &FieldUpdate::set(1),
            &mut metadata,
            1,
            1,
        );
        assert_eq!(
            result.unwrap_err(),
            Error::FieldKindMismatch {
                expected: FieldKind::Text,
                got: FieldKind::Register,
            }
        );
    }

    #[test]
    fn dispatch_routes_to_kind() {
        let field = Field::list();
        let mut metadata = field.create_metadata();
        let result = field
            .apply_update(
                &field.create_value(),
                &FieldUpdate::splice(0, 0, vec![json!(1), json!(2)]),
                &mut metadata,
                1,
                1,
            )
            .unwrap();
        assert_eq!(result.value.as_list().unwrap(), &[json!(1), json!(2)]);
        assert_eq!(result.patch.kind(), FieldKind::List);
    }

    #[test]
    fn value_from_json_checks_shape() {
        assert_eq!(
            Field::text().value_from_json(Some(&json!("hi"))).unwrap(),
            FieldValue::Text("hi".into())
        );
        assert!(Field::text().value_from_json(Some(&json!(3))).is_err());
        assert_eq!(
            Field::register_with_default(json!(0))
                .value_from_json(None)
                .unwrap(),
            FieldValue::Register(json!(0))
        );
        let map = Field::map()
            .value_from_json(Some(&json!({"a": 1, "b": null})))
            .unwrap();
        assert_eq!(map.as_map().unwrap().len(), 1);
    }

    #[test]
    fn patch_wire_format_is_tagged() {
        let patch = FieldPatch::Register(RegisterPatch {
            id: crate::identifier::create_duplex_id(1, 1),
            value: json!("x"),
        });
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["data"]["value"], "x");
        let parsed: FieldPatch = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, patch);
    }

    #[test]
    fn value_serializes_as_plain_json() {
        let value = FieldValue::List(vec![json!(1), json!("a")]);
        assert_eq!(serde_json::to_value(&value).unwrap(), json!([1, "a"]));
        assert_eq!(value.to_json(), json!([1, "a"]));
    }
}
