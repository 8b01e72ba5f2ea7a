//! Text field: the list algorithm over characters.

use super::list::{apply_part, splice};
use super::{CrdtField, PatchResult, SequenceMetadata, UpdateResult};
use crate::identifier::Identifier;
use crate::{StoreId, Version};
use serde::{Deserialize, Serialize};

/// A local text edit. `index` and `remove` count characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSplice {
    pub index: usize,
    pub remove: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChangePart {
    pub index: usize,
    pub removed: String,
    pub inserted: String,
}

/// One id per character of `removed_text` / `inserted_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPatchPart {
    pub removed_ids: Vec<Identifier>,
    pub removed_text: String,
    pub inserted_ids: Vec<Identifier>,
    pub inserted_text: String,
}

/// A field holding collaboratively edited text.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextField;

impl TextField {
    fn patch(
        previous: &str,
        parts: &[TextPatchPart],
        metadata: &mut SequenceMetadata,
        undo: bool,
    ) -> PatchResult<String, Vec<TextChangePart>> {
        let mut chars: Vec<char> = previous.chars().collect();
        let mut change = Vec::new();

        for part in parts {
            let (removed_ids, inserted_ids, inserted) = if undo {
                (&part.inserted_ids, &part.removed_ids, &part.removed_text)
            } else {
                (&part.removed_ids, &part.inserted_ids, &part.inserted_text)
            };
            let inserted: Vec<char> = inserted.chars().collect();
            let edits = apply_part(&mut chars, metadata, removed_ids, inserted_ids, &inserted);
            change.extend(edits.into_iter().map(|e| TextChangePart {
                index: e.index,
                removed: e.removed.into_iter().collect(),
                inserted: e.inserted.into_iter().collect(),
            }));
        }

        PatchResult {
            value: chars.into_iter().collect(),
            change,
        }
    }
}

impl CrdtField for TextField {
    type Value = String;
    type Metadata = SequenceMetadata;
    type Update = Vec<TextSplice>;
    type Change = Vec<TextChangePart>;
    type Patch = Vec<TextPatchPart>;

    fn create_value(&self) -> String {
        String::new()
    }

    fn create_metadata(&self) -> SequenceMetadata {
        SequenceMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &String,
        update: &Vec<TextSplice>,
        metadata: &mut SequenceMetadata,
        version: Version,
        store: StoreId,
    ) -> UpdateResult<String, Vec<TextChangePart>, Vec<TextPatchPart>> {
        let mut chars: Vec<char> = previous.chars().collect();
        let mut change = Vec::with_capacity(update.len());
        let mut patch = Vec::with_capacity(update.len());

        for s in update {
            let inserted: Vec<char> = s.text.chars().collect();
            let spliced = splice(
                &mut chars, metadata, s.index, s.remove, &inserted, version, store,
            );
            if spliced.removed.is_empty() && inserted.is_empty() {
                continue;
            }
            let removed: String = spliced.removed.into_iter().collect();
            change.push(TextChangePart {
                index: spliced.index,
                removed: removed.clone(),
                inserted: s.text.clone(),
            });
            patch.push(TextPatchPart {
                removed_ids: spliced.removed_ids,
                removed_text: removed,
                inserted_ids: spliced.inserted_ids,
                inserted_text: s.text.clone(),
            });
        }

        UpdateResult {
            value: chars.into_iter().collect(),
            change,
            patch,
        }
    }

    fn apply_patch(
        &self,
        previous: &String,
        patch: &Vec<TextPatchPart>,
        metadata: &mut SequenceMetadata,
    ) -> PatchResult<String, Vec<TextChangePart>> {
        Self::patch(previous, patch, metadata, false)
    }

    fn unapply_patch(
        &self,
        previous: &String,
        patch: &Vec<TextPatchPart>,
        metadata: &mut SequenceMetadata,
    ) -> PatchResult<String, Vec<TextChangePart>> {
        Self::patch(previous, patch, metadata, true)
    }

    fn merge_change(
        &self,
        mut first: Vec<TextChangePart>,
        second: Vec<TextChangePart>,
    ) -> Vec<TextChangePart> {
        first.extend(second);
        first
    }

    fn merge_patch(
        &self,
        mut first: Vec<TextPatchPart>,
        second: Vec<TextPatchPart>,
    ) -> Vec<TextPatchPart> {
        first.extend(second);
        first
    }
}
