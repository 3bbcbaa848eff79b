//! Patch metadata lookup: per-field strategies and merge keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::mergepatch::PatchError;

/// PatchStrategy controls how a structural field is patched: `merge`
/// combines member-wise, `replace` swaps the whole subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStrategy {
    Merge,
    Replace,
}

/// PatchMeta is the metadata attached to a single field: an optional
/// patch strategy and, for mergeable lists of objects, the name of the
/// field that identifies an element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchMeta {
    patch_strategy: Option<PatchStrategy>,
    merge_key: Option<String>,
}

impl PatchMeta {
    pub fn new(patch_strategy: Option<PatchStrategy>, merge_key: Option<String>) -> Self {
        PatchMeta {
            patch_strategy,
            merge_key,
        }
    }

    pub fn patch_strategy(&self) -> Option<PatchStrategy> {
        self.patch_strategy
    }

    pub fn merge_key(&self) -> Option<&str> {
        self.merge_key.as_deref()
    }
}

/// LookupPatchMeta resolves the patch metadata of a named field, returning
/// the descriptor for the field's element type alongside the metadata.
///
/// For object fields the returned descriptor describes the object's own
/// fields; for list fields it describes the list elements. Absent metadata
/// is not an error: unknown fields resolve to an empty descriptor with
/// empty metadata, and the engine decides whether that matters.
pub trait LookupPatchMeta: Sized {
    fn lookup_patch_metadata(&self, field: &str) -> Result<(Self, PatchMeta), PatchError>;
}

/// SchemaDescriptor is a declarative, serializable patch-metadata tree.
///
/// Each level maps field names to a [`FieldDescriptor`]; fields not listed
/// carry no metadata. The default descriptor deduces nothing, which makes
/// every list replace-by-default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, FieldDescriptor>,
}

/// FieldDescriptor holds one field's patch metadata and the descriptor of
/// its element type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "patchStrategy"
    )]
    pub patch_strategy: Option<PatchStrategy>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "patchMergeKey"
    )]
    pub merge_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "elementType")]
    pub element_type: Option<Box<SchemaDescriptor>>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        SchemaDescriptor::default()
    }

    /// Adds a field descriptor, builder style.
    pub fn field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), descriptor);
        self
    }
}

impl FieldDescriptor {
    /// A list field merged by the given element-identifying key.
    pub fn merge_by(key: impl Into<String>) -> Self {
        FieldDescriptor {
            patch_strategy: Some(PatchStrategy::Merge),
            merge_key: Some(key.into()),
            element_type: None,
        }
    }

    /// A list of primitives merged as a set.
    pub fn merge() -> Self {
        FieldDescriptor {
            patch_strategy: Some(PatchStrategy::Merge),
            merge_key: None,
            element_type: None,
        }
    }

    /// A field replaced wholesale on patch.
    pub fn replace() -> Self {
        FieldDescriptor {
            patch_strategy: Some(PatchStrategy::Replace),
            merge_key: None,
            element_type: None,
        }
    }

    /// Attaches the descriptor of the field's element type.
    pub fn element_type(mut self, element: SchemaDescriptor) -> Self {
        self.element_type = Some(Box::new(element));
        self
    }
}

impl LookupPatchMeta for SchemaDescriptor {
    fn lookup_patch_metadata(&self, field: &str) -> Result<(Self, PatchMeta), PatchError> {
        match self.fields.get(field) {
            Some(descriptor) => {
                let element = descriptor
                    .element_type
                    .as_deref()
                    .cloned()
                    .unwrap_or_default();
                let meta = PatchMeta::new(
                    descriptor.patch_strategy,
                    descriptor.merge_key.clone(),
                );
                Ok((element, meta))
            }
            None => Ok((SchemaDescriptor::default(), PatchMeta::default())),
        }
    }
}
