//! Strategic merge patch: diff, merge, and three-way reconciliation over
//! JSON documents with per-field patch strategies.
//!
//! Strategic merge patch extends JSON merge patch by letting field
//! metadata decide whether lists are replaced wholesale or merged
//! member-wise (by a merge key for lists of objects, set-wise for lists
//! of primitives). Patch documents may carry directive markers:
//! `$patch: replace|delete|merge` and the parallel deletion key
//! `$deleteFromPrimitiveList/<field>`.

use serde_json::Value;

use crate::mergepatch::{JsonMap, PatchError, PreconditionFunc};

use super::meta::{LookupPatchMeta, PatchStrategy};

/// Reserved key carrying a patch directive.
pub const DIRECTIVE_MARKER: &str = "$patch";
/// Directive value deleting the enclosing structure.
pub const DELETE_DIRECTIVE: &str = "delete";
/// Directive value replacing the enclosing structure wholesale.
pub const REPLACE_DIRECTIVE: &str = "replace";
/// Directive value requesting a member-wise merge; only legal in maps.
pub const MERGE_DIRECTIVE: &str = "merge";
/// Prefix of the parallel deletion key for primitive merge lists.
pub const DELETE_FROM_PRIMITIVE_LIST_DIRECTIVE_PREFIX: &str = "$deleteFromPrimitiveList";

/// The JSON kind of a value. Every element of a well-formed list shares
/// one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    fn name(self) -> &'static str {
        match self {
            JsonKind::Null => "null",
            JsonKind::Bool => "boolean",
            JsonKind::Number => "number",
            JsonKind::String => "string",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
        }
    }
}

fn json_kind(value: &Value) -> JsonKind {
    match value {
        Value::Null => JsonKind::Null,
        Value::Bool(_) => JsonKind::Bool,
        Value::Number(_) => JsonKind::Number,
        Value::String(_) => JsonKind::String,
        Value::Array(_) => JsonKind::Array,
        Value::Object(_) => JsonKind::Object,
    }
}

fn same_kind(left: &Value, right: &Value) -> bool {
    json_kind(left) == json_kind(right)
}

/// The comparable string form of a scalar. Merge keys and scalar lists
/// are ordered by this form, not by JSON kind.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_map(map: &JsonMap) -> String {
    Value::Object(map.clone()).to_string()
}

/// Parses a JSON document into a top-level object. Empty input and JSON
/// `null` both parse as the empty object.
fn json_map_from_bytes(data: &[u8]) -> Result<JsonMap, PatchError> {
    if data.is_empty() {
        return Ok(JsonMap::new());
    }
    match serde_json::from_slice(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(JsonMap::new()),
        _ => Err(PatchError::BadJsonDoc),
    }
}

/// Creates a patch that yields `modified` when strategically merged into
/// `original`. Both documents are JSON-encoded; the result is a
/// JSON-encoded patch suitable for [`strategic_merge_patch`].
pub fn create_two_way_merge_patch<S: LookupPatchMeta>(
    original: &[u8],
    modified: &[u8],
    schema: &S,
    preconditions: &[PreconditionFunc],
) -> Result<Vec<u8>, PatchError> {
    let original_map = json_map_from_bytes(original)?;
    let modified_map = json_map_from_bytes(modified)?;
    let patch = create_two_way_merge_map_patch(&original_map, &modified_map, schema, preconditions)?;
    serde_json::to_vec(&patch).map_err(|_| PatchError::BadJsonDoc)
}

/// Map-level form of [`create_two_way_merge_patch`].
pub fn create_two_way_merge_map_patch<S: LookupPatchMeta>(
    original: &JsonMap,
    modified: &JsonMap,
    schema: &S,
    preconditions: &[PreconditionFunc],
) -> Result<JsonMap, PatchError> {
    let patch = diff_maps(original, modified, schema, false, false)?;

    for precondition in preconditions {
        if !precondition(&patch) {
            return Err(PatchError::PreconditionFailed { patch });
        }
    }

    Ok(patch)
}

/// Returns a recursive strategic merge patch that yields `modified` when
/// applied to `original`.
fn diff_maps<S: LookupPatchMeta>(
    original: &JsonMap,
    modified: &JsonMap,
    schema: &S,
    ignore_changes_and_additions: bool,
    ignore_deletions: bool,
) -> Result<JsonMap, PatchError> {
    let mut patch = JsonMap::new();

    for (key, modified_value) in modified {
        let Some(original_value) = original.get(key) else {
            // Key was added.
            if !ignore_changes_and_additions {
                patch.insert(key.clone(), modified_value.clone());
            }
            continue;
        };

        if key == DIRECTIVE_MARKER {
            let (Value::String(original_directive), Value::String(modified_directive)) =
                (original_value, modified_value)
            else {
                return Err(PatchError::InvalidSpecialKey {
                    key: DIRECTIVE_MARKER.to_string(),
                });
            };
            if modified_directive != original_directive {
                patch.insert(key.clone(), modified_value.clone());
            }
            continue;
        }

        if !same_kind(original_value, modified_value) {
            // Kinds have changed.
            if !ignore_changes_and_additions {
                patch.insert(key.clone(), modified_value.clone());
            }
            continue;
        }

        match (original_value, modified_value) {
            (Value::Object(original_object), Value::Object(modified_object)) => {
                let (element_schema, meta) = match schema.lookup_patch_metadata(key) {
                    Ok(found) => found,
                    // A failed lookup is moot when the values are equal.
                    Err(_) if original_value == modified_value => continue,
                    Err(err) => return Err(err),
                };

                if meta.patch_strategy() == Some(PatchStrategy::Replace) {
                    if !ignore_changes_and_additions {
                        patch.insert(key.clone(), modified_value.clone());
                    }
                    continue;
                }

                let patch_value = diff_maps(
                    original_object,
                    modified_object,
                    &element_schema,
                    ignore_changes_and_additions,
                    ignore_deletions,
                )?;
                if !patch_value.is_empty() {
                    patch.insert(key.clone(), Value::Object(patch_value));
                }
            }
            (Value::Array(original_list), Value::Array(modified_list)) => {
                let (element_schema, meta) = match schema.lookup_patch_metadata(key) {
                    Ok(found) => found,
                    Err(_) if original_value == modified_value => continue,
                    Err(err) => return Err(err),
                };

                if meta.patch_strategy() == Some(PatchStrategy::Merge) {
                    let (additions, deletions) = diff_lists(
                        original_list,
                        modified_list,
                        &element_schema,
                        meta.merge_key(),
                        ignore_changes_and_additions,
                        ignore_deletions,
                    )?;

                    if !additions.is_empty() {
                        patch.insert(key.clone(), Value::Array(additions));
                    }
                    if !deletions.is_empty() {
                        let parallel_key = format!(
                            "{}/{}",
                            DELETE_FROM_PRIMITIVE_LIST_DIRECTIVE_PREFIX, key
                        );
                        patch.insert(parallel_key, Value::Array(deletions));
                    }
                    continue;
                }

                // Lists without a merge strategy are replaced wholesale.
                if !ignore_changes_and_additions && original_value != modified_value {
                    patch.insert(key.clone(), modified_value.clone());
                }
            }
            _ => {
                if !ignore_changes_and_additions && original_value != modified_value {
                    patch.insert(key.clone(), modified_value.clone());
                }
            }
        }
    }

    if !ignore_deletions {
        // Nulls mark deleted keys.
        for key in original.keys() {
            if !modified.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    Ok(patch)
}

/// Diffs two merge-strategy lists, returning additions and a parallel
/// deletion list. Only lists of primitives produce a deletion list;
/// object deletions are carried in-line as `$patch: delete` elements.
fn diff_lists<S: LookupPatchMeta>(
    original: &[Value],
    modified: &[Value],
    schema: &S,
    merge_key: Option<&str>,
    ignore_changes_and_additions: bool,
    ignore_deletions: bool,
) -> Result<(Vec<Value>, Vec<Value>), PatchError> {
    if original.is_empty() {
        if modified.is_empty() || ignore_changes_and_additions {
            return Ok((Vec::new(), Vec::new()));
        }
        return Ok((modified.to_vec(), Vec::new()));
    }

    let kind = slice_element_kind(&[original, modified])?;
    match kind {
        JsonKind::Object => {
            let additions = diff_lists_of_maps(
                original,
                modified,
                schema,
                merge_key.unwrap_or(""),
                ignore_changes_and_additions,
                ignore_deletions,
            )?;
            Ok((additions, Vec::new()))
        }
        _ => diff_lists_of_scalars(
            original,
            modified,
            ignore_changes_and_additions,
            ignore_deletions,
        ),
    }
}

/// Diffs two lists of scalars by sorted two-pointer walk, returning the
/// additions and deletions between them.
fn diff_lists_of_scalars(
    original: &[Value],
    modified: &[Value],
    ignore_changes_and_additions: bool,
    ignore_deletions: bool,
) -> Result<(Vec<Value>, Vec<Value>), PatchError> {
    let original_scalars = sort_scalars(original.to_vec());
    let modified_scalars = sort_scalars(modified.to_vec());

    let mut original_index = 0;
    let mut modified_index = 0;
    let mut additions = Vec::new();
    let mut deletions = Vec::new();

    while original_index < original_scalars.len() || modified_index < modified_scalars.len() {
        let original_in_bounds = original_index < original_scalars.len();
        let modified_in_bounds = modified_index < modified_scalars.len();

        // Scalars compare by string form; the values themselves carry no
        // ordering across kinds.
        let original_string = if original_in_bounds {
            scalar_string(&original_scalars[original_index])
        } else {
            String::new()
        };
        let modified_string = if modified_in_bounds {
            scalar_string(&modified_scalars[modified_index])
        } else {
            String::new()
        };

        if original_in_bounds && modified_in_bounds && original_string == modified_string {
            original_index += 1;
            modified_index += 1;
        } else if !original_in_bounds
            || (modified_in_bounds && original_string > modified_string)
        {
            // Modified has an additional scalar.
            if !ignore_changes_and_additions {
                additions.push(modified_scalars[modified_index].clone());
            }
            modified_index += 1;
        } else {
            // Original has an additional scalar.
            if !ignore_deletions {
                deletions.push(original_scalars[original_index].clone());
            }
            original_index += 1;
        }
    }

    Ok((additions, deletions))
}

fn delete_directive_element(merge_key: &str, merge_value: Value) -> Value {
    let mut element = JsonMap::new();
    element.insert(merge_key.to_string(), merge_value);
    element.insert(
        DIRECTIVE_MARKER.to_string(),
        Value::String(DELETE_DIRECTIVE.to_string()),
    );
    Value::Object(element)
}

/// Diffs two lists of objects with merge semantics. Both sides are sorted
/// by the merge key's string form and walked pairwise: equal keys recurse
/// into [`diff_maps`], extras on the modified side become whole-object
/// additions, extras on the original side become `$patch: delete`
/// directives.
fn diff_lists_of_maps<S: LookupPatchMeta>(
    original: &[Value],
    modified: &[Value],
    schema: &S,
    merge_key: &str,
    ignore_changes_and_additions: bool,
    ignore_deletions: bool,
) -> Result<Vec<Value>, PatchError> {
    let mut patch = Vec::new();

    let original_sorted = sort_maps_by_field(original.to_vec(), merge_key);
    let modified_sorted = sort_maps_by_field(modified.to_vec(), merge_key);

    let mut original_index = 0;
    let mut modified_index = 0;

    'next_modified: while modified_index < modified_sorted.len() {
        let modified_map = modified_sorted[modified_index]
            .as_object()
            .ok_or(PatchError::NotAMap {
                index: modified_index,
            })?;
        let modified_key_value =
            modified_map
                .get(merge_key)
                .ok_or_else(|| PatchError::MissingMergeKey {
                    map: render_map(modified_map),
                    key: merge_key.to_string(),
                })?;

        while original_index < original_sorted.len() {
            let original_map =
                original_sorted[original_index]
                    .as_object()
                    .ok_or(PatchError::NotAMap {
                        index: original_index,
                    })?;
            let original_key_value =
                original_map
                    .get(merge_key)
                    .ok_or_else(|| PatchError::MissingMergeKey {
                        map: render_map(original_map),
                        key: merge_key.to_string(),
                    })?;

            let original_string = scalar_string(original_key_value);
            let modified_string = scalar_string(modified_key_value);
            if original_string >= modified_string {
                if original_string == modified_string {
                    // Merge key values are equal, so recurse.
                    let mut patch_value = diff_maps(
                        original_map,
                        modified_map,
                        schema,
                        ignore_changes_and_additions,
                        ignore_deletions,
                    )?;
                    original_index += 1;
                    if !patch_value.is_empty() {
                        patch_value.insert(merge_key.to_string(), modified_key_value.clone());
                        patch.push(Value::Object(patch_value));
                    }
                } else if !ignore_changes_and_additions {
                    // Item was added.
                    patch.push(Value::Object(modified_map.clone()));
                }

                modified_index += 1;
                continue 'next_modified;
            }

            if !ignore_deletions {
                // Item was deleted.
                patch.push(delete_directive_element(
                    merge_key,
                    original_key_value.clone(),
                ));
            }
            original_index += 1;
        }

        break;
    }

    if !ignore_deletions {
        // Delete any remaining items found only in original.
        while original_index < original_sorted.len() {
            let original_map =
                original_sorted[original_index]
                    .as_object()
                    .ok_or(PatchError::NotAMap {
                        index: original_index,
                    })?;
            let original_key_value =
                original_map
                    .get(merge_key)
                    .ok_or_else(|| PatchError::MissingMergeKey {
                        map: render_map(original_map),
                        key: merge_key.to_string(),
                    })?;
            patch.push(delete_directive_element(
                merge_key,
                original_key_value.clone(),
            ));
            original_index += 1;
        }
    }

    if !ignore_changes_and_additions {
        // Add any remaining items found only in modified.
        while modified_index < modified_sorted.len() {
            patch.push(modified_sorted[modified_index].clone());
            modified_index += 1;
        }
    }

    Ok(patch)
}

/// Applies a strategic merge patch to a JSON-encoded document. A patch
/// can be produced by [`create_two_way_merge_patch`].
pub fn strategic_merge_patch<S: LookupPatchMeta>(
    original: &[u8],
    patch: &[u8],
    schema: &S,
) -> Result<Vec<u8>, PatchError> {
    let original_map = json_map_from_bytes(original)?;
    let patch_map = json_map_from_bytes(patch)?;
    let result = strategic_merge_map_patch(original_map, patch_map, schema)?;
    serde_json::to_vec(&result).map_err(|_| PatchError::BadJsonDoc)
}

/// Map-level form of [`strategic_merge_patch`]. Both inputs are consumed:
/// the merge mutates them in place rather than deep-copying. Callers that
/// need the originals afterwards must clone before calling.
pub fn strategic_merge_map_patch<S: LookupPatchMeta>(
    original: JsonMap,
    patch: JsonMap,
    schema: &S,
) -> Result<JsonMap, PatchError> {
    merge_map(original, patch, schema, true, true)
}

/// Merges the fields of a patch map into an original map, honoring
/// directive markers. Consumes both inputs.
///
/// `merge_delete_list` controls whether `$deleteFromPrimitiveList/...`
/// keys are executed or passed through; `ignore_unmatched_nulls` controls
/// whether a null patch value with no matching original key is dropped or
/// preserved (preserving it keeps an explicit delete on the wire).
fn merge_map<S: LookupPatchMeta>(
    mut original: JsonMap,
    mut patch: JsonMap,
    schema: &S,
    merge_delete_list: bool,
    ignore_unmatched_nulls: bool,
) -> Result<JsonMap, PatchError> {
    if let Some(directive) = patch.get(DIRECTIVE_MARKER) {
        match directive {
            Value::String(s) if s == REPLACE_DIRECTIVE => {
                patch.remove(DIRECTIVE_MARKER);
                return Ok(patch);
            }
            Value::String(s) if s == DELETE_DIRECTIVE => {
                return Ok(JsonMap::new());
            }
            other => {
                return Err(PatchError::UnknownPatchType {
                    patch_type: scalar_string(other),
                    map: render_map(&patch),
                });
            }
        }
    }

    for (raw_key, patch_value) in patch {
        // A parallel deletion list rewrites to its target field, flagged
        // as a deletion, when deletion merging is enabled; otherwise the
        // key passes through untouched.
        let mut is_delete_list = false;
        let key = if raw_key.starts_with(DELETE_FROM_PRIMITIVE_LIST_DIRECTIVE_PREFIX) {
            if !merge_delete_list {
                original.insert(raw_key, patch_value);
                continue;
            }
            match raw_key.split_once('/') {
                Some((_, field)) => {
                    is_delete_list = true;
                    field.to_string()
                }
                None => return Err(PatchError::BadPatchFormatForPrimitiveList),
            }
        } else {
            raw_key
        };

        if patch_value.is_null() {
            original.remove(&key);
            if ignore_unmatched_nulls {
                continue;
            }
        }

        let Some(original_value) = original.remove(&key) else {
            // Not in the original document: take the patch value.
            original.insert(key, patch_value);
            continue;
        };

        if !same_kind(&original_value, &patch_value) {
            original.insert(key, patch_value);
            continue;
        }

        let (element_schema, meta) = schema.lookup_patch_metadata(&key)?;
        match (original_value, patch_value) {
            (Value::Object(original_object), Value::Object(patch_object))
                if meta.patch_strategy() != Some(PatchStrategy::Replace) =>
            {
                let merged = merge_map(
                    original_object,
                    patch_object,
                    &element_schema,
                    merge_delete_list,
                    ignore_unmatched_nulls,
                )?;
                original.insert(key, Value::Object(merged));
            }
            (Value::Array(original_list), Value::Array(patch_list))
                if meta.patch_strategy() == Some(PatchStrategy::Merge) =>
            {
                let merged = merge_slice(
                    original_list,
                    patch_list,
                    &element_schema,
                    meta.merge_key(),
                    merge_delete_list,
                    is_delete_list,
                    ignore_unmatched_nulls,
                )?;
                original.insert(key, Value::Array(merged));
            }
            (_, patch_value) => {
                // Replace strategy, or no strategy to recurse with.
                original.insert(key, patch_value);
            }
        }
    }

    Ok(original)
}

/// Merges a patch list into an original list. Consumes both inputs.
///
/// Scalar lists are treated as sets: a deletion list subtracts, anything
/// else concatenates and uniquifies. Object lists require a merge key;
/// directive elements are executed first, then each remaining patch
/// element merges into (or appends after) its key-matched counterpart.
fn merge_slice<S: LookupPatchMeta>(
    mut original: Vec<Value>,
    patch: Vec<Value>,
    schema: &S,
    merge_key: Option<&str>,
    merge_delete_list: bool,
    is_delete_list: bool,
    ignore_unmatched_nulls: bool,
) -> Result<Vec<Value>, PatchError> {
    if original.is_empty() && patch.is_empty() {
        return Ok(original);
    }

    let kind = slice_element_kind(&[&original, &patch])?;

    if kind != JsonKind::Object {
        if merge_delete_list && is_delete_list {
            return Ok(delete_from_scalar_list(original, patch));
        }
        original.extend(patch);
        return Ok(uniquify_scalars(original));
    }

    let Some(merge_key) = merge_key.filter(|k| !k.is_empty()) else {
        return Err(PatchError::MergeKeyRequired { kind: kind.name() });
    };

    // Execute any directive elements before merging the rest.
    let mut patch_without_directives = Vec::new();
    let mut replace = false;
    for value in patch {
        let Value::Object(element) = value else {
            // The kind check above guarantees object elements.
            continue;
        };

        let Some(directive) = element.get(DIRECTIVE_MARKER) else {
            patch_without_directives.push(Value::Object(element));
            continue;
        };

        match directive {
            Value::String(s) if s == DELETE_DIRECTIVE => {
                let Some(merge_value) = element.get(merge_key) else {
                    return Err(PatchError::DeleteWithoutMergeKey);
                };
                // Delete every matching entry; duplicate merge keys are
                // all removed.
                while let Some(index) =
                    find_map_in_list_by_key_value(&original, merge_key, merge_value)?
                {
                    original.remove(index);
                }
            }
            Value::String(s) if s == REPLACE_DIRECTIVE => {
                // Keep iterating to prune any other directive elements.
                replace = true;
            }
            Value::String(s) if s == MERGE_DIRECTIVE => {
                return Err(PatchError::MergeDirectiveInList);
            }
            other => {
                return Err(PatchError::UnknownPatchType {
                    patch_type: scalar_string(other),
                    map: render_map(&element),
                });
            }
        }
    }

    if replace {
        return Ok(patch_without_directives);
    }

    for value in patch_without_directives {
        let Value::Object(element) = value else {
            continue;
        };
        let Some(merge_value) = element.get(merge_key) else {
            return Err(PatchError::MissingMergeKey {
                map: render_map(&element),
                key: merge_key.to_string(),
            });
        };

        match find_map_in_list_by_key_value(&original, merge_key, merge_value)? {
            Some(index) => {
                let Value::Object(original_element) =
                    std::mem::take(&mut original[index])
                else {
                    return Err(PatchError::NotAMap { index });
                };
                let merged = merge_map(
                    original_element,
                    element,
                    schema,
                    merge_delete_list,
                    ignore_unmatched_nulls,
                )?;
                original[index] = Value::Object(merged);
            }
            None => original.push(Value::Object(element)),
        }
    }

    Ok(original)
}

/// Subtracts a deletion list from a list of scalars. Both sides are
/// uniquified and sorted first, so the result comes back sorted.
fn delete_from_scalar_list(current: Vec<Value>, to_delete: Vec<Value>) -> Vec<Value> {
    let current = uniquify_and_sort_scalars(current);
    let to_delete = uniquify_and_sort_scalars(to_delete);

    let mut current_index = 0;
    let mut delete_index = 0;
    let mut merged = Vec::new();

    while current_index < current.len() && delete_index < to_delete.len() {
        let current_string = scalar_string(&current[current_index]);
        let delete_string = scalar_string(&to_delete[delete_index]);

        if current_string == delete_string {
            current_index += 1;
        } else if current_string > delete_string {
            delete_index += 1;
        } else {
            merged.push(current[current_index].clone());
            current_index += 1;
        }
    }

    merged.extend_from_slice(&current[current_index..]);
    merged
}

/// Finds the index of the first list element whose merge-key field equals
/// the given value. Errors if any scanned element is not an object.
fn find_map_in_list_by_key_value(
    list: &[Value],
    key: &str,
    value: &Value,
) -> Result<Option<usize>, PatchError> {
    for (index, element) in list.iter().enumerate() {
        let map = element.as_object().ok_or(PatchError::NotAMap { index })?;
        if map.get(key) == Some(value) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Determines the shared element kind across the given slices. Mixed
/// kinds and lists of lists are rejected; all-empty input is an error.
fn slice_element_kind(slices: &[&[Value]]) -> Result<JsonKind, PatchError> {
    let mut kind: Option<JsonKind> = None;
    for slice in slices {
        for value in *slice {
            let current = json_kind(value);
            match kind {
                None => {
                    if current == JsonKind::Array {
                        return Err(PatchError::NoListOfLists);
                    }
                    kind = Some(current);
                }
                Some(k) if k != current => {
                    let lists = slices
                        .iter()
                        .map(|s| Value::Array(s.to_vec()).to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    return Err(PatchError::ElementKindsDiffer { lists });
                }
                Some(_) => {}
            }
        }
    }
    kind.ok_or(PatchError::NoElements)
}

fn sort_scalars(mut scalars: Vec<Value>) -> Vec<Value> {
    scalars.sort_by_cached_key(scalar_string);
    scalars
}

/// Removes duplicate scalars, keeping the first occurrence of each.
fn uniquify_scalars(scalars: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(scalars.len());
    for value in scalars {
        if !result.contains(&value) {
            result.push(value);
        }
    }
    result
}

fn uniquify_and_sort_scalars(scalars: Vec<Value>) -> Vec<Value> {
    sort_scalars(uniquify_scalars(scalars))
}

fn sort_maps_by_field(mut list: Vec<Value>, field: &str) -> Vec<Value> {
    list.sort_by_cached_key(|value| {
        value
            .as_object()
            .and_then(|map| map.get(field))
            .map(scalar_string)
            .unwrap_or_default()
    });
    list
}

/// Recursively sorts every merge-strategy list in a JSON-encoded object
/// by its merge key, and every primitive merge list by value. Merge lists
/// have no significant order, so sorting enables order-insensitive
/// comparison of patched documents.
pub fn sort_merge_lists_by_name<S: LookupPatchMeta>(
    map_json: &[u8],
    schema: &S,
) -> Result<Vec<u8>, PatchError> {
    let map = json_map_from_bytes(map_json)?;
    let sorted = sort_merge_lists_by_name_map(&map, schema)?;
    serde_json::to_vec(&sorted).map_err(|_| PatchError::BadJsonDoc)
}

/// Map-level form of [`sort_merge_lists_by_name`].
pub fn sort_merge_lists_by_name_map<S: LookupPatchMeta>(
    map: &JsonMap,
    schema: &S,
) -> Result<JsonMap, PatchError> {
    let mut result = JsonMap::new();
    for (key, value) in map {
        let mut value = value.clone();
        if key.starts_with(DELETE_FROM_PRIMITIVE_LIST_DIRECTIVE_PREFIX) {
            let Value::Array(list) = value else {
                return Err(PatchError::BadPatchFormatForPrimitiveList);
            };
            value = Value::Array(uniquify_and_sort_scalars(list));
        } else if key != DIRECTIVE_MARKER {
            let (element_schema, meta) = schema.lookup_patch_metadata(key)?;
            match &value {
                Value::Object(object) => {
                    value = Value::Object(sort_merge_lists_by_name_map(object, &element_schema)?);
                }
                Value::Array(list) if meta.patch_strategy() == Some(PatchStrategy::Merge) => {
                    value = Value::Array(sort_merge_lists_by_name_list(
                        list,
                        &element_schema,
                        meta.merge_key().unwrap_or(""),
                        true,
                    )?);
                }
                _ => {}
            }
        }
        result.insert(key.clone(), value);
    }
    Ok(result)
}

fn sort_merge_lists_by_name_list<S: LookupPatchMeta>(
    list: &[Value],
    schema: &S,
    merge_key: &str,
    recurse: bool,
) -> Result<Vec<Value>, PatchError> {
    if list.is_empty() {
        return Ok(Vec::new());
    }

    let kind = slice_element_kind(&[list])?;
    if kind != JsonKind::Object {
        return Ok(uniquify_and_sort_scalars(list.to_vec()));
    }

    let mut sorted = Vec::with_capacity(list.len());
    for (index, element) in list.iter().enumerate() {
        if recurse {
            let map = element.as_object().ok_or(PatchError::NotAMap { index })?;
            sorted.push(Value::Object(sort_merge_lists_by_name_map(map, schema)?));
        } else {
            sorted.push(element.clone());
        }
    }

    Ok(sort_maps_by_field(sorted, merge_key))
}

/// Returns true if the two maps overlap with different values anywhere,
/// under strategic merge semantics: replace-strategy subtrees never
/// conflict, merge lists compare per merge key, and scalar merge lists
/// are conflict-free by definition.
pub fn merging_maps_have_conflicts<S: LookupPatchMeta>(
    left: &JsonMap,
    right: &JsonMap,
    schema: &S,
) -> Result<bool, PatchError> {
    // The top-level maps get the same directive-marker check as every
    // nested pair: a directive on one side operates on the whole map.
    merging_values_have_conflicts(
        &Value::Object(left.clone()),
        &Value::Object(right.clone()),
        schema,
        None,
        None,
    )
}

fn merging_values_have_conflicts<S: LookupPatchMeta>(
    left: &Value,
    right: &Value,
    schema: &S,
    strategy: Option<PatchStrategy>,
    merge_key: Option<&str>,
) -> Result<bool, PatchError> {
    match (left, right) {
        (Value::Object(left_map), Value::Object(right_map)) => {
            // A directive operates on the whole map, so asymmetric or
            // differing markers conflict before any key comparison.
            let left_marker = left_map.get(DIRECTIVE_MARKER);
            let right_marker = right_map.get(DIRECTIVE_MARKER);
            if left_marker.is_some() != right_marker.is_some() {
                return Ok(true);
            }
            if left_marker != right_marker {
                return Ok(true);
            }

            if strategy == Some(PatchStrategy::Replace) {
                return Ok(false);
            }

            maps_have_conflicts(left_map, right_map, schema)
        }
        (Value::Array(left_list), Value::Array(right_list)) => {
            lists_have_conflicts(left_list, right_list, schema, strategy, merge_key)
        }
        (Value::Object(_), _) | (Value::Array(_), _) => Ok(true),
        _ => Ok(left != right),
    }
}

fn maps_have_conflicts<S: LookupPatchMeta>(
    left: &JsonMap,
    right: &JsonMap,
    schema: &S,
) -> Result<bool, PatchError> {
    for (key, left_value) in left {
        if key == DIRECTIVE_MARKER {
            continue;
        }
        let Some(right_value) = right.get(key) else {
            continue;
        };
        let (element_schema, meta) = schema.lookup_patch_metadata(key)?;
        if merging_values_have_conflicts(
            left_value,
            right_value,
            &element_schema,
            meta.patch_strategy(),
            meta.merge_key(),
        )? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn lists_have_conflicts<S: LookupPatchMeta>(
    left: &[Value],
    right: &[Value],
    schema: &S,
    strategy: Option<PatchStrategy>,
    merge_key: Option<&str>,
) -> Result<bool, PatchError> {
    let kind = slice_element_kind(&[left, right])?;

    if strategy == Some(PatchStrategy::Merge) {
        // Merging lists of scalars have no conflicts by definition.
        if kind != JsonKind::Object {
            return Ok(false);
        }

        let merge_key = merge_key.unwrap_or("");
        let left_by_key = list_of_maps_by_merge_key(left, merge_key)?;
        let right_by_key = list_of_maps_by_merge_key(right, merge_key)?;

        for (key, left_value) in &left_by_key {
            let Some(right_value) = right_by_key.get(key) else {
                continue;
            };
            if merging_values_have_conflicts(left_value, right_value, schema, None, None)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    // Without merge semantics the lists are positional.
    if left.len() != right.len() {
        return Ok(true);
    }

    let (left_sorted, right_sorted);
    let (left, right): (&[Value], &[Value]) = if kind != JsonKind::Object {
        // Sort scalar lists to tolerate merge-induced reordering.
        left_sorted = uniquify_and_sort_scalars(left.to_vec());
        right_sorted = uniquify_and_sort_scalars(right.to_vec());
        (&left_sorted, &right_sorted)
    } else {
        (left, right)
    };

    for (left_value, right_value) in left.iter().zip(right.iter()) {
        if merging_values_have_conflicts(left_value, right_value, schema, None, None)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn list_of_maps_by_merge_key<'a>(
    list: &'a [Value],
    merge_key: &str,
) -> Result<std::collections::HashMap<String, &'a Value>, PatchError> {
    let mut result = std::collections::HashMap::with_capacity(list.len());
    for value in list {
        let map = value
            .as_object()
            .ok_or_else(|| PatchError::InvalidMergingListElement {
                list: Value::Array(list.to_vec()).to_string(),
            })?;
        let merge_value = map
            .get(merge_key)
            .ok_or_else(|| PatchError::MergeKeyNotFound {
                key: merge_key.to_string(),
                element: render_map(map),
            })?;
        result.insert(scalar_string(merge_value), value);
    }
    Ok(result)
}

/// Reconciles a modified configuration with an original configuration
/// against the current live state, producing the minimal patch that
/// applies the user's changes and deletions without clobbering interim
/// drift. With `overwrite` false, drift that contradicts the patch is a
/// conflict error.
pub fn create_three_way_merge_patch<S: LookupPatchMeta>(
    original: &[u8],
    modified: &[u8],
    current: &[u8],
    schema: &S,
    overwrite: bool,
    preconditions: &[PreconditionFunc],
) -> Result<Vec<u8>, PatchError> {
    let original_map = json_map_from_bytes(original)?;
    let modified_map = json_map_from_bytes(modified)?;
    let current_map = json_map_from_bytes(current)?;
    let patch = create_three_way_merge_map_patch(
        &original_map,
        &modified_map,
        &current_map,
        schema,
        overwrite,
        preconditions,
    )?;
    serde_json::to_vec(&patch).map_err(|_| PatchError::BadJsonDoc)
}

/// Map-level form of [`create_three_way_merge_patch`].
///
/// The patch is the difference from current to modified without
/// deletions, plus the deletions from original to modified. Delta applied
/// over deletions is strictly additive, so their merge is the patch.
pub fn create_three_way_merge_map_patch<S: LookupPatchMeta>(
    original: &JsonMap,
    modified: &JsonMap,
    current: &JsonMap,
    schema: &S,
    overwrite: bool,
    preconditions: &[PreconditionFunc],
) -> Result<JsonMap, PatchError> {
    let delta = diff_maps(current, modified, schema, false, true)?;
    let deletions = diff_maps(original, modified, schema, true, false)?;
    let patch = merge_map(deletions, delta, schema, false, false)?;

    for precondition in preconditions {
        if !precondition(&patch) {
            return Err(PatchError::PreconditionFailed { patch });
        }
    }

    // Keys changed differently from original to modified than from
    // original to current are conflicts unless the caller overwrites.
    if !overwrite {
        let changed = diff_maps(original, current, schema, false, false)?;
        if merging_maps_have_conflicts(&patch, &changed, schema)? {
            return Err(PatchError::conflict(&patch, &changed));
        }
    }

    Ok(patch)
}
