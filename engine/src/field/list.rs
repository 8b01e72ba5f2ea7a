//! List field, and the sequence algorithm shared with the text field.
//!
//! A sequence keeps one identifier per live element, strictly increasing and
//! aligned with the values. Local splices allocate fresh identifiers between
//! the neighbours of the edited range. Remote patches locate elements by
//! identifier, so they apply in any order:
//!
//! - removing an identifier that is not present records it in the
//!   sequence's cemetery;
//! - inserting an identifier found in the cemetery consumes the entry and
//!   drops the insertion (delete wins over a concurrent insert).
//!
//! Unapplying a patch is applying it with removals and insertions swapped.

use super::{CrdtField, PatchResult, UpdateResult};
use crate::identifier::{create_triplex_ids, Identifier};
use crate::{StoreId, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier bookkeeping for list and text fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceMetadata {
    /// One id per live element, strictly increasing
    pub ids: Vec<Identifier>,
    /// Pending delete counts for ids removed before their insertion arrived
    pub cemetery: BTreeMap<Identifier, u32>,
}

impl SequenceMetadata {
    pub(crate) fn max_version(&self) -> Version {
        self.ids
            .iter()
            .chain(self.cemetery.keys())
            .map(Identifier::max_version)
            .max()
            .unwrap_or(0)
    }
}

/// Element-level outcome of one local splice.
pub(crate) struct Spliced<T> {
    pub index: usize,
    pub removed_ids: Vec<Identifier>,
    pub removed: Vec<T>,
    pub inserted_ids: Vec<Identifier>,
}

/// One contiguous edit observed while applying a remote part.
pub(crate) struct Edited<T> {
    pub index: usize,
    pub removed: Vec<T>,
    pub inserted: Vec<T>,
}

/// Replace `remove` elements at `index` with `inserted`, clamping both to
/// the current bounds.
pub(crate) fn splice<T: Clone>(
    values: &mut Vec<T>,
    metadata: &mut SequenceMetadata,
    index: usize,
    remove: usize,
    inserted: &[T],
    version: Version,
    store: StoreId,
) -> Spliced<T> {
    let len = values.len();
    let index = index.min(len);
    let end = index + remove.min(len - index);

    let lower = index.checked_sub(1).map(|i| &metadata.ids[i]);
    let upper = metadata.ids.get(end);
    let inserted_ids = create_triplex_ids(inserted.len(), version, store, lower, upper);

    let removed_ids = metadata
        .ids
        .splice(index..end, inserted_ids.iter().cloned())
        .collect();
    let removed = values
        .splice(index..end, inserted.iter().cloned())
        .collect();

    Spliced {
        index,
        removed_ids,
        removed,
        inserted_ids,
    }
}

/// Apply one remote part: removals first, then insertions.
pub(crate) fn apply_part<T: Clone>(
    values: &mut Vec<T>,
    metadata: &mut SequenceMetadata,
    removed_ids: &[Identifier],
    inserted_ids: &[Identifier],
    inserted: &[T],
) -> Vec<Edited<T>> {
    let mut edits = remove_ids(values, metadata, removed_ids);
    edits.extend(insert_ids(values, metadata, inserted_ids, inserted));
    edits
}

fn remove_ids<T: Clone>(
    values: &mut Vec<T>,
    metadata: &mut SequenceMetadata,
    ids: &[Identifier],
) -> Vec<Edited<T>> {
    let mut edits = Vec::new();
    let mut i = 0;

    while i < ids.len() {
        let index = match metadata.ids.binary_search(&ids[i]) {
            Ok(index) => index,
            Err(_) => {
                // Not inserted here yet, or already gone.
                *metadata.cemetery.entry(ids[i].clone()).or_insert(0) += 1;
                i += 1;
                continue;
            }
        };

        let mut count = 1;
        while i + count < ids.len() && metadata.ids.get(index + count) == Some(&ids[i + count]) {
            count += 1;
        }

        metadata.ids.drain(index..index + count);
        edits.push(Edited {
            index,
            removed: values.drain(index..index + count).collect(),
            inserted: Vec::new(),
        });
        i += count;
    }

    edits
}

fn insert_ids<T: Clone>(
    values: &mut Vec<T>,
    metadata: &mut SequenceMetadata,
    ids: &[Identifier],
    inserted: &[T],
) -> Vec<Edited<T>> {
    let mut kept: Vec<(&Identifier, &T)> = Vec::with_capacity(ids.len());
    for (id, value) in ids.iter().zip(inserted) {
        match metadata.cemetery.get_mut(id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                metadata.cemetery.remove(id);
            }
            None => kept.push((id, value)),
        }
    }

    let mut edits = Vec::new();
    let mut i = 0;

    while i < kept.len() {
        let index = match metadata.ids.binary_search(kept[i].0) {
            Ok(_) => {
                tracing::debug!(id = %kept[i].0, "skipping insertion of existing element");
                i += 1;
                continue;
            }
            Err(index) => index,
        };

        // Extend the run while the next id lands on the same index.
        let next = metadata.ids.get(index);
        let mut end = i + 1;
        while end < kept.len()
            && kept[end].0 > kept[end - 1].0
            && next.map_or(true, |next| kept[end].0 < next)
        {
            end += 1;
        }

        let run = &kept[i..end];
        metadata
            .ids
            .splice(index..index, run.iter().map(|(id, _)| (*id).clone()));
        let run_values: Vec<T> = run.iter().map(|(_, value)| (*value).clone()).collect();
        values.splice(index..index, run_values.iter().cloned());
        edits.push(Edited {
            index,
            removed: Vec::new(),
            inserted: run_values,
        });
        i = end;
    }

    edits
}

/// A local list edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSplice {
    pub index: usize,
    pub remove: usize,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangePart {
    pub index: usize,
    pub removed: Vec<Value>,
    pub inserted: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatchPart {
    pub removed_ids: Vec<Identifier>,
    pub removed_values: Vec<Value>,
    pub inserted_ids: Vec<Identifier>,
    pub inserted_values: Vec<Value>,
}

/// A field holding an ordered sequence of JSON values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListField;

impl ListField {
    fn patch(
        previous: &[Value],
        parts: &[ListPatchPart],
        metadata: &mut SequenceMetadata,
        undo: bool,
    ) -> PatchResult<Vec<Value>, Vec<ListChangePart>> {
        let mut value = previous.to_vec();
        let mut change = Vec::new();
        for part in parts {
            let edits = if undo {
                apply_part(
                    &mut value,
                    metadata,
                    &part.inserted_ids,
                    &part.removed_ids,
                    &part.removed_values,
                )
            } else {
                apply_part(
                    &mut value,
                    metadata,
                    &part.removed_ids,
                    &part.inserted_ids,
                    &part.inserted_values,
                )
            };
            change.extend(edits.into_iter().map(|e| ListChangePart {
                index: e.index,
                removed: e.removed,
                inserted: e.inserted,
            }));
        }
        PatchResult { value, change }
    }
}

impl CrdtField for ListField {
    type Value = Vec<Value>;
    type Metadata = SequenceMetadata;
    type Update = Vec<ListSplice>;
    type Change = Vec<ListChangePart>;
    type Patch = Vec<ListPatchPart>;

    fn create_value(&self) -> Vec<Value> {
        Vec::new()
    }

    fn create_metadata(&self) -> SequenceMetadata {
        SequenceMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &Vec<Value>,
        update: &Vec<ListSplice>,
        metadata: &mut SequenceMetadata,
        version: Version,
        store: StoreId,
    ) -> UpdateResult<Vec<Value>, Vec<ListChangePart>, Vec<ListPatchPart>> {
        let mut value = previous.clone();
        let mut change = Vec::with_capacity(update.len());
        let mut patch = Vec::with_capacity(update.len());

        for s in update {
            let spliced = splice(
                &mut value, metadata, s.index, s.remove, &s.values, version, store,
            );
            if spliced.removed.is_empty() && s.values.is_empty() {
                continue;
            }
            change.push(ListChangePart {
                index: spliced.index,
                removed: spliced.removed.clone(),
                inserted: s.values.clone(),
            });
            patch.push(ListPatchPart {
                removed_ids: spliced.removed_ids,
                removed_values: spliced.removed,
                inserted_ids: spliced.inserted_ids,
                inserted_values: s.values.clone(),
            });
        }

        UpdateResult {
            value,
            change,
            patch,
        }
    }

    fn apply_patch(
        &self,
        previous: &Vec<Value>,
        patch: &Vec<ListPatchPart>,
        metadata: &mut SequenceMetadata,
    ) -> PatchResult<Vec<Value>, Vec<ListChangePart>> {
        Self::patch(previous, patch, metadata, false)
    }

    fn unapply_patch(
        &self,
        previous: &Vec<Value>,
        patch: &Vec<ListPatchPart>,
        metadata: &mut SequenceMetadata,
    ) -> PatchResult<Vec<Value>, Vec<ListChangePart>> {
        Self::patch(previous, patch, metadata, true)
    }

    fn merge_change(
        &self,
        mut first: Vec<ListChangePart>,
        second: Vec<ListChangePart>,
    ) -> Vec<ListChangePart> {
        first.extend(second);
        first
    }

    fn merge_patch(
        &self,
        mut first: Vec<ListPatchPart>,
        second: Vec<ListPatchPart>,
    ) -> Vec<ListPatchPart> {
        first.extend(second);
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(index: usize, values: Vec<Value>) -> Vec<ListSplice> {
        vec![ListSplice {
            index,
            remove: 0,
            values,
        }]
    }

    fn remove(index: usize, count: usize) -> Vec<ListSplice> {
        vec![ListSplice {
            index,
            remove: count,
            values: Vec::new(),
        }]
    }

    #[test]
    fn local_splices_keep_ids_aligned() {
        let field = ListField;
        let mut metadata = field.create_metadata();

        let r = field.apply_update(&vec![], &insert(0, vec![json!(1), json!(3)]), &mut metadata, 1, 1);
        let r = field.apply_update(&r.value, &insert(1, vec![json!(2)]), &mut metadata, 2, 1);
        assert_eq!(r.value, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(metadata.ids.len(), 3);
        assert!(metadata.ids.windows(2).all(|w| w[0] < w[1]));

        let r = field.apply_update(&r.value, &remove(0, 2), &mut metadata, 3, 1);
        assert_eq!(r.value, vec![json!(3)]);
        assert_eq!(r.change[0].removed, vec![json!(1), json!(2)]);
        assert_eq!(r.patch[0].removed_ids.len(), 2);
        assert_eq!(metadata.ids.len(), 1);
    }

    #[test]
    fn out_of_range_splice_is_clamped() {
        let field = ListField;
        let mut metadata = field.create_metadata();
        let r = field.apply_update(&vec![], &insert(10, vec![json!("a")]), &mut metadata, 1, 1);
        assert_eq!(r.change[0].index, 0);

        let r = field.apply_update(&r.value, &remove(0, 99), &mut metadata, 2, 1);
        assert!(r.value.is_empty());
        assert_eq!(r.change[0].removed, vec![json!("a")]);
    }

    #[test]
    fn concurrent_inserts_converge() {
        let field = ListField;
        let mut base_meta = field.create_metadata();
        let base = field.apply_update(&vec![], &insert(0, vec![json!("x"), json!("y")]), &mut base_meta, 1, 1);

        let mut left_meta = base_meta.clone();
        let mut right_meta = base_meta.clone();
        let left = field.apply_update(&base.value, &insert(1, vec![json!("l1"), json!("l2")]), &mut left_meta, 2, 1);
        let right = field.apply_update(&base.value, &insert(2, vec![json!("r")]), &mut right_meta, 2, 2);

        let on_left = field.apply_patch(&left.value, &right.patch, &mut left_meta);
        let on_right = field.apply_patch(&right.value, &left.patch, &mut right_meta);
        assert_eq!(on_left.value, on_right.value);
        assert_eq!(on_left.value.len(), 5);
        assert_eq!(left_meta.ids, right_meta.ids);
    }

    #[test]
    fn removal_before_insertion_wins() {
        let field = ListField;
        let mut origin = field.create_metadata();
        let inserted = field.apply_update(&vec![], &insert(0, vec![json!("e")]), &mut origin, 1, 1);
        let removed = field.apply_update(&inserted.value, &remove(0, 1), &mut origin, 2, 1);

        // The removal reaches a third replica before the insertion.
        let mut other = field.create_metadata();
        let r = field.apply_patch(&vec![], &removed.patch, &mut other);
        assert!(r.value.is_empty());
        assert!(r.change.is_empty());
        assert_eq!(other.cemetery.len(), 1);

        let r = field.apply_patch(&r.value, &inserted.patch, &mut other);
        assert!(r.value.is_empty());
        assert!(other.cemetery.is_empty());
        assert!(other.ids.is_empty());
    }

    #[test]
    fn unapply_is_inverse() {
        let field = ListField;
        let mut metadata = field.create_metadata();
        let base = field.apply_update(&vec![], &insert(0, vec![json!(1), json!(2), json!(3)]), &mut metadata, 1, 1);

        let mut remote = field.create_metadata();
        let applied = field.apply_patch(&vec![], &base.patch, &mut remote);
        let edit = field.apply_update(
            &base.value,
            &vec![ListSplice {
                index: 1,
                remove: 1,
                values: vec![json!("a"), json!("b")],
            }],
            &mut metadata,
            2,
            1,
        );

        let patched = field.apply_patch(&applied.value, &edit.patch, &mut remote);
        assert_eq!(patched.value, edit.value);
        let undone = field.unapply_patch(&patched.value, &edit.patch, &mut remote);
        assert_eq!(undone.value, base.value);
    }

    #[test]
    fn duplicate_insertion_is_skipped() {
        let field = ListField;
        let mut origin = field.create_metadata();
        let r = field.apply_update(&vec![], &insert(0, vec![json!(1)]), &mut origin, 1, 1);

        let mut remote = field.create_metadata();
        let once = field.apply_patch(&vec![], &r.patch, &mut remote);
        let twice = field.apply_patch(&once.value, &r.patch, &mut remote);
        assert_eq!(twice.value, vec![json!(1)]);
        assert_eq!(remote.ids.len(), 1);
    }

    #[test]
    fn merges_concatenate() {
        let field = ListField;
        let a = ListChangePart {
            index: 0,
            removed: vec![],
            inserted: vec![json!(1)],
        };
        let b = ListChangePart {
            index: 1,
            removed: vec![],
            inserted: vec![json!(2)],
        };
        let merged = field.merge_change(vec![a.clone()], vec![b.clone()]);
        assert_eq!(merged, vec![a, b]);
    }
}
