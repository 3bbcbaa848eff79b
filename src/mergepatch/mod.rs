//! Shared merge-patch plumbing: the error taxonomy, precondition
//! predicates, and YAML rendering for conflict reports.

use serde_json::Value;
use thiserror::Error;

/// JsonMap is a JSON object: an ordered mapping from field name to value.
///
/// All patch documents and patch targets are JsonMaps at the top level.
pub type JsonMap = serde_json::Map<String, Value>;

/// PatchError is returned by the strategic merge patch engine.
///
/// The display strings are part of the wire-facing contract; callers match
/// on them across language boundaries, so they must not be reworded.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("bad JSON document")]
    BadJsonDoc,

    #[error("no list of lists")]
    NoListOfLists,

    #[error("invalid patch format of primitive list")]
    BadPatchFormatForPrimitiveList,

    #[error("cannot merge lists without merge key for type {kind}")]
    MergeKeyRequired { kind: &'static str },

    #[error("unknown patch type: {patch_type} in map: {map}")]
    UnknownPatchType { patch_type: String, map: String },

    #[error("delete patch type with no merge key defined")]
    DeleteWithoutMergeKey,

    #[error("merging lists cannot yet be specified in the patch")]
    MergeDirectiveInList,

    #[error("map: {map} does not contain declared merge key: {key}")]
    MissingMergeKey { map: String, key: String },

    #[error("invalid value for special key: {key}")]
    InvalidSpecialKey { key: String },

    #[error("list element types are not identical: {lists}")]
    ElementKindsDiffer { lists: String },

    #[error("no elements in any of the given slices")]
    NoElements,

    #[error("value for key {index} is not a map")]
    NotAMap { index: usize },

    #[error("invalid element type in merging list: {list}")]
    InvalidMergingListElement { list: String },

    #[error("cannot find merge key `{key}` in merging list element: {element}")]
    MergeKeyNotFound { key: String, element: String },

    /// A user-supplied precondition rejected the computed patch. Carries
    /// the offending patch for inspection.
    #[error("precondition failed")]
    PreconditionFailed { patch: JsonMap },

    /// Three-way reconciliation found live-state drift that contradicts the
    /// patch. Both sides are carried pre-rendered as YAML.
    #[error("conflict: patch={patch} changed={changed}")]
    Conflict { patch: String, changed: String },

    /// A metadata provider failed to resolve a field.
    #[error("{message}")]
    SchemaError { message: String },
}

impl PatchError {
    /// Creates a schema lookup error.
    pub fn schema_error(message: impl Into<String>) -> Self {
        PatchError::SchemaError {
            message: message.into(),
        }
    }

    pub(crate) fn conflict(patch: &JsonMap, changed: &JsonMap) -> Self {
        PatchError::Conflict {
            patch: to_yaml_or_error(patch),
            changed: to_yaml_or_error(changed),
        }
    }
}

/// PreconditionFunc inspects a computed patch and returns false to reject
/// it. Rejection surfaces as [`PatchError::PreconditionFailed`].
pub type PreconditionFunc = Box<dyn Fn(&JsonMap) -> bool + Send + Sync>;

/// Requires that the given top-level key is absent from the patch, i.e.
/// that the field did not change between original and modified.
pub fn require_key_unchanged(key: impl Into<String>) -> PreconditionFunc {
    let key = key.into();
    Box::new(move |patch| !patch.contains_key(&key))
}

/// Requires that the given key under the top-level `metadata` object is
/// absent from the patch.
pub fn require_metadata_key_unchanged(key: impl Into<String>) -> PreconditionFunc {
    let key = key.into();
    Box::new(move |patch| match patch.get("metadata") {
        Some(Value::Object(metadata)) => !metadata.contains_key(&key),
        _ => true,
    })
}

/// Renders a JSON object as YAML, falling back to the error text if the
/// value cannot be represented.
pub fn to_yaml_or_error(map: &JsonMap) -> String {
    serde_yaml::to_string(map).unwrap_or_else(|err| format!("yaml marshal error: {err}"))
}
