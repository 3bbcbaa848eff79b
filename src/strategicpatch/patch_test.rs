//! Tests for the strategic merge patch engine.

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::mergepatch::{require_key_unchanged, JsonMap, PatchError};
    use crate::strategicpatch::{
        create_three_way_merge_map_patch, create_three_way_merge_patch,
        create_two_way_merge_map_patch, create_two_way_merge_patch, merging_maps_have_conflicts,
        sort_merge_lists_by_name_map, strategic_merge_map_patch, strategic_merge_patch,
        FieldDescriptor, SchemaDescriptor,
    };

    fn obj(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    /// Pod-shaped schema: containers merge by name (with ports merging by
    /// containerPort inside them), finalizers merge as a primitive set.
    fn pod_schema() -> SchemaDescriptor {
        SchemaDescriptor::new()
            .field(
                "containers",
                FieldDescriptor::merge_by("name").element_type(
                    SchemaDescriptor::new()
                        .field("ports", FieldDescriptor::merge_by("containerPort")),
                ),
            )
            .field("finalizers", FieldDescriptor::merge())
    }

    fn sorted(map: &JsonMap, schema: &SchemaDescriptor) -> JsonMap {
        sort_merge_lists_by_name_map(map, schema).unwrap()
    }

    #[test]
    fn test_two_way_list_merge() {
        let schema = pod_schema();
        let original = obj(json!({"containers": [{"name": "a", "image": "v1"}]}));
        let modified = obj(json!({
            "containers": [
                {"name": "a", "image": "v2"},
                {"name": "b", "image": "v1"},
            ],
        }));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(
            patch,
            obj(json!({
                "containers": [
                    {"name": "a", "image": "v2"},
                    {"name": "b", "image": "v1"},
                ],
            }))
        );

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(sorted(&merged, &schema), sorted(&modified, &schema));
    }

    #[test]
    fn test_two_way_scalar_delete_list() {
        let schema = pod_schema();
        let original = obj(json!({"finalizers": ["x", "y"]}));
        let modified = obj(json!({"finalizers": ["x"]}));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(
            patch,
            obj(json!({"$deleteFromPrimitiveList/finalizers": ["y"]}))
        );

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(merged, obj(json!({"finalizers": ["x"]})));
    }

    #[test]
    fn test_two_way_identical_documents_make_empty_patch() {
        let schema = pod_schema();
        let doc = obj(json!({
            "replicas": 2,
            "containers": [{"name": "a", "image": "v1"}],
            "finalizers": ["x"],
        }));

        let patch = create_two_way_merge_map_patch(&doc, &doc, &schema, &[]).unwrap();
        assert!(patch.is_empty(), "expected empty patch, got {patch:?}");
    }

    #[test]
    fn test_apply_empty_patch_is_identity() {
        let schema = pod_schema();
        let original = br#"{"replicas": 2, "containers": [{"name": "a"}]}"#;

        let result = strategic_merge_patch(original, b"{}", &schema).unwrap();
        let result: Value = serde_json::from_slice(&result).unwrap();
        assert_eq!(
            result,
            json!({"replicas": 2, "containers": [{"name": "a"}]})
        );
    }

    #[test]
    fn test_round_trip() {
        let schema = pod_schema();
        let cases = [
            (json!({}), json!({"replicas": 3})),
            (json!({"replicas": 3}), json!({})),
            (
                json!({"replicas": 1, "paused": false}),
                json!({"replicas": 3, "paused": true}),
            ),
            (
                json!({
                    "containers": [
                        {"name": "a", "image": "v1"},
                        {"name": "b", "image": "v1"},
                    ],
                    "finalizers": ["x", "y"],
                }),
                json!({
                    "containers": [
                        {"name": "a", "image": "v2"},
                        {"name": "c", "image": "v1"},
                    ],
                    "finalizers": ["y", "z"],
                }),
            ),
            (
                json!({
                    "containers": [
                        {"name": "a", "ports": [{"containerPort": 80, "protocol": "TCP"}]},
                    ],
                }),
                json!({
                    "containers": [
                        {"name": "a", "ports": [
                            {"containerPort": 80, "protocol": "UDP"},
                            {"containerPort": 443, "protocol": "TCP"},
                        ]},
                    ],
                }),
            ),
        ];

        for (original, modified) in cases {
            let original = obj(original);
            let modified = obj(modified);
            let patch =
                create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
            let merged =
                strategic_merge_map_patch(original.clone(), patch.clone(), &schema).unwrap();
            assert_eq!(
                sorted(&merged, &schema),
                sorted(&modified, &schema),
                "round trip failed for patch {patch:?}"
            );
        }
    }

    #[test]
    fn test_two_way_bytes_api() {
        let schema = pod_schema();
        let original = br#"{"containers": [{"name": "a", "image": "v1"}]}"#;
        let modified = br#"{"containers": [{"name": "a", "image": "v2"}]}"#;

        let patch = create_two_way_merge_patch(original, modified, &schema, &[]).unwrap();
        let result = strategic_merge_patch(original, &patch, &schema).unwrap();
        let result: Value = serde_json::from_slice(&result).unwrap();
        assert_eq!(result, json!({"containers": [{"name": "a", "image": "v2"}]}));
    }

    #[test]
    fn test_kind_change_is_replacement() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"value": 1}));
        let modified = obj(json!({"value": "one"}));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(patch, obj(json!({"value": "one"})));
    }

    #[test]
    fn test_replace_strategy_emits_whole_subtree() {
        let schema =
            SchemaDescriptor::new().field("strategy", FieldDescriptor::replace());
        let original = obj(json!({"strategy": {"type": "RollingUpdate", "surge": 1}}));
        let modified = obj(json!({"strategy": {"type": "Recreate"}}));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(patch, obj(json!({"strategy": {"type": "Recreate"}})));

        // Applying replaces rather than merging, so "surge" is gone.
        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(merged, obj(json!({"strategy": {"type": "Recreate"}})));
    }

    #[test]
    fn test_list_without_merge_strategy_is_replaced() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"args": ["a", "b"]}));
        let modified = obj(json!({"args": ["b", "c"]}));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(patch, obj(json!({"args": ["b", "c"]})));
    }

    #[test]
    fn test_deletion_emits_null_and_apply_deletes() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"replicas": 3, "paused": true}));
        let modified = obj(json!({"replicas": 3}));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(patch, obj(json!({"paused": null})));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(merged, obj(json!({"replicas": 3})));
    }

    #[test]
    fn test_merge_key_collision_pairs_first_and_deletes_rest() {
        let schema = pod_schema();
        let original = obj(json!({
            "containers": [
                {"name": "a", "image": "v1"},
                {"name": "a", "image": "v2"},
            ],
        }));
        let modified = obj(json!({"containers": [{"name": "a", "image": "v1"}]}));

        let patch =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap();
        assert_eq!(
            patch,
            obj(json!({"containers": [{"name": "a", "$patch": "delete"}]}))
        );
    }

    #[test]
    fn test_apply_replace_directive_in_map() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"limits": {"cpu": "1", "memory": "1Gi"}}));
        let patch = obj(json!({"limits": {"$patch": "replace", "cpu": "2"}}));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(merged, obj(json!({"limits": {"cpu": "2"}})));
    }

    #[test]
    fn test_apply_delete_directive_in_map() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"limits": {"cpu": "1"}}));
        let patch = obj(json!({"limits": {"$patch": "delete"}}));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(merged, obj(json!({"limits": {}})));
    }

    #[test]
    fn test_apply_delete_directive_in_merge_list() {
        let schema = pod_schema();
        let original = obj(json!({
            "containers": [
                {"name": "a", "image": "v1"},
                {"name": "b", "image": "v1"},
            ],
        }));
        let patch = obj(json!({"containers": [{"name": "a", "$patch": "delete"}]}));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(
            merged,
            obj(json!({"containers": [{"name": "b", "image": "v1"}]}))
        );
    }

    #[test]
    fn test_apply_delete_directive_removes_every_match() {
        let schema = pod_schema();
        let original = obj(json!({
            "containers": [
                {"name": "a", "image": "v1"},
                {"name": "b", "image": "v1"},
                {"name": "a", "image": "v2"},
            ],
        }));
        let patch = obj(json!({"containers": [{"name": "a", "$patch": "delete"}]}));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(
            merged,
            obj(json!({"containers": [{"name": "b", "image": "v1"}]}))
        );
    }

    #[test]
    fn test_apply_replace_directive_in_merge_list() {
        let schema = pod_schema();
        let original = obj(json!({
            "containers": [
                {"name": "a", "image": "v1"},
                {"name": "b", "image": "v1"},
            ],
        }));
        let patch = obj(json!({
            "containers": [
                {"$patch": "replace"},
                {"name": "c", "image": "v1"},
            ],
        }));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(
            merged,
            obj(json!({"containers": [{"name": "c", "image": "v1"}]}))
        );
    }

    #[test]
    fn test_merge_directive_rejected_in_list() {
        let schema = pod_schema();
        let original = obj(json!({"containers": [{"name": "a"}]}));
        let patch = obj(json!({"containers": [{"$patch": "merge", "name": "a"}]}));

        let err = strategic_merge_map_patch(original, patch, &schema).unwrap_err();
        assert_eq!(
            err.to_string(),
            "merging lists cannot yet be specified in the patch"
        );
    }

    #[test]
    fn test_delete_directive_without_merge_key_rejected() {
        let schema = pod_schema();
        let original = obj(json!({"containers": [{"name": "a"}]}));
        let patch = obj(json!({"containers": [{"$patch": "delete"}]}));

        let err = strategic_merge_map_patch(original, patch, &schema).unwrap_err();
        assert!(matches!(err, PatchError::DeleteWithoutMergeKey));
    }

    #[test]
    fn test_unknown_directive_rejected() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({}));
        let patch = obj(json!({"$patch": "frobnicate"}));

        let err = strategic_merge_map_patch(original, patch, &schema).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"unknown patch type: frobnicate in map: {"$patch":"frobnicate"}"#
        );
    }

    #[test]
    fn test_merge_list_of_objects_without_merge_key_rejected() {
        let schema =
            SchemaDescriptor::new().field("containers", FieldDescriptor::merge());
        let original = obj(json!({"containers": [{"name": "a"}]}));
        let patch = obj(json!({"containers": [{"name": "b"}]}));

        let err = strategic_merge_map_patch(original, patch, &schema).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot merge lists without merge key for type object"
        );
    }

    #[test]
    fn test_element_missing_merge_key_rejected() {
        let schema = pod_schema();
        let original = obj(json!({"containers": [{"name": "a"}]}));
        let patch = obj(json!({"containers": [{"image": "v2"}]}));

        let err = strategic_merge_map_patch(original, patch, &schema).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"map: {"image":"v2"} does not contain declared merge key: name"#
        );
    }

    #[test]
    fn test_list_of_lists_rejected() {
        let schema = SchemaDescriptor::new().field("matrix", FieldDescriptor::merge());
        let original = obj(json!({"matrix": [[1, 2]]}));
        let modified = obj(json!({"matrix": [[1, 2], [3, 4]]}));

        let err =
            create_two_way_merge_map_patch(&original, &modified, &schema, &[]).unwrap_err();
        assert_eq!(err.to_string(), "no list of lists");
    }

    #[test]
    fn test_bad_json_document() {
        let schema = SchemaDescriptor::new();
        let err = strategic_merge_patch(b"{not json", b"{}", &schema).unwrap_err();
        assert_eq!(err.to_string(), "bad JSON document");

        let err = create_two_way_merge_patch(b"[]", b"{}", &schema, &[]).unwrap_err();
        assert_eq!(err.to_string(), "bad JSON document");
    }

    #[test]
    fn test_precondition_failure() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"replicas": 1}));
        let modified = obj(json!({"replicas": 3}));

        let preconditions = vec![require_key_unchanged("replicas")];
        let err = create_two_way_merge_map_patch(&original, &modified, &schema, &preconditions)
            .unwrap_err();
        assert_eq!(err.to_string(), "precondition failed");
        match err {
            PatchError::PreconditionFailed { patch } => {
                assert_eq!(patch, obj(json!({"replicas": 3})));
            }
            other => panic!("expected precondition failure, got {other}"),
        }
    }

    #[test]
    fn test_three_way_conflict() {
        let schema = SchemaDescriptor::new();
        let original = br#"{"replicas": 1}"#;
        let modified = br#"{"replicas": 3}"#;
        let current = br#"{"replicas": 5}"#;

        let err = create_three_way_merge_patch(original, modified, current, &schema, false, &[])
            .unwrap_err();
        assert!(matches!(err, PatchError::Conflict { .. }));
        assert!(err.to_string().starts_with("conflict: patch="));

        let patch = create_three_way_merge_patch(original, modified, current, &schema, true, &[])
            .unwrap();
        let patch: Value = serde_json::from_slice(&patch).unwrap();
        assert_eq!(patch, json!({"replicas": 3}));
    }

    #[test]
    fn test_three_way_identity() {
        let schema = pod_schema();
        let config = obj(json!({"replicas": 1, "containers": [{"name": "a"}]}));
        // Live state agrees on every configured field and carries extras.
        let current = obj(json!({
            "replicas": 1,
            "containers": [{"name": "a"}],
            "status": "Running",
        }));

        let patch =
            create_three_way_merge_map_patch(&config, &config, &current, &schema, true, &[])
                .unwrap();
        assert!(patch.is_empty(), "expected empty patch, got {patch:?}");
    }

    #[test]
    fn test_three_way_reverts_drift_on_configured_fields() {
        let schema = SchemaDescriptor::new();
        let original = obj(json!({"replicas": 1}));
        let modified = obj(json!({"replicas": 1}));
        let current = obj(json!({"replicas": 5}));

        // The user changed nothing, but the live value of a configured
        // field drifted; with overwrite the patch re-asserts it.
        let patch =
            create_three_way_merge_map_patch(&original, &modified, &current, &schema, true, &[])
                .unwrap();
        assert_eq!(patch, obj(json!({"replicas": 1})));
    }

    #[test]
    fn test_three_way_carries_deletions_from_original() {
        let schema = pod_schema();
        let original = obj(json!({"finalizers": ["x", "y"], "replicas": 1}));
        let modified = obj(json!({"finalizers": ["x"], "replicas": 1}));
        let current = obj(json!({"finalizers": ["x", "y"], "replicas": 1}));

        let patch = create_three_way_merge_map_patch(
            &original, &modified, &current, &schema, false, &[],
        )
        .unwrap();
        assert_eq!(
            patch,
            obj(json!({"$deleteFromPrimitiveList/finalizers": ["y"]}))
        );

        let merged = strategic_merge_map_patch(current, patch, &schema).unwrap();
        assert_eq!(
            merged,
            obj(json!({"finalizers": ["x"], "replicas": 1}))
        );
    }

    #[test]
    fn test_three_way_merges_additions_and_deletions() {
        let schema = pod_schema();
        let original = obj(json!({
            "containers": [{"name": "a", "image": "v1"}, {"name": "b", "image": "v1"}],
        }));
        let modified = obj(json!({
            "containers": [{"name": "a", "image": "v2"}],
        }));
        let current = obj(json!({
            "containers": [{"name": "a", "image": "v1"}, {"name": "b", "image": "v1"}],
        }));

        let patch = create_three_way_merge_map_patch(
            &original, &modified, &current, &schema, false, &[],
        )
        .unwrap();

        let merged = strategic_merge_map_patch(current, patch, &schema).unwrap();
        assert_eq!(sorted(&merged, &schema), sorted(&modified, &schema));
    }

    #[test]
    fn test_conflict_detection_scalars() {
        let schema = SchemaDescriptor::new();
        let left = obj(json!({"replicas": 3, "paused": true}));
        let right = obj(json!({"replicas": 5}));

        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());
        assert!(merging_maps_have_conflicts(&right, &left, &schema).unwrap());

        let agreeing = obj(json!({"replicas": 3}));
        assert!(!merging_maps_have_conflicts(&left, &agreeing, &schema).unwrap());
        assert!(!merging_maps_have_conflicts(&agreeing, &left, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_disjoint_keys() {
        let schema = SchemaDescriptor::new();
        let left = obj(json!({"replicas": 3}));
        let right = obj(json!({"paused": true}));

        assert!(!merging_maps_have_conflicts(&left, &right, &schema).unwrap());
        assert!(!merging_maps_have_conflicts(&right, &left, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_kind_mismatch() {
        let schema = SchemaDescriptor::new();
        let left = obj(json!({"value": 1}));
        let right = obj(json!({"value": {"nested": 1}}));

        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());
        assert!(merging_maps_have_conflicts(&right, &left, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_directive_asymmetry() {
        let schema = SchemaDescriptor::new();
        let left = obj(json!({"limits": {"$patch": "replace", "cpu": "1"}}));
        let right = obj(json!({"limits": {"cpu": "2"}}));

        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());
        assert!(merging_maps_have_conflicts(&right, &left, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_top_level_directive_asymmetry() {
        let schema = SchemaDescriptor::new();
        // One side replaces the whole map, the other edits a field; that
        // is a conflict even though the field values agree.
        let left = obj(json!({"$patch": "replace", "cpu": "1"}));
        let right = obj(json!({"cpu": "1"}));

        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());
        assert!(merging_maps_have_conflicts(&right, &left, &schema).unwrap());

        // Differing markers on both sides conflict too.
        let left = obj(json!({"$patch": "replace"}));
        let right = obj(json!({"$patch": "delete"}));
        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());

        // Identical markers alone do not.
        let left = obj(json!({"$patch": "replace", "cpu": "1"}));
        let right = obj(json!({"$patch": "replace", "cpu": "1"}));
        assert!(!merging_maps_have_conflicts(&left, &right, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_replace_strategy_suppresses() {
        let schema =
            SchemaDescriptor::new().field("strategy", FieldDescriptor::replace());
        let left = obj(json!({"strategy": {"type": "Recreate"}}));
        let right = obj(json!({"strategy": {"type": "RollingUpdate"}}));

        // Replace-strategy subtrees are swapped wholesale, so differing
        // content is not a conflict.
        assert!(!merging_maps_have_conflicts(&left, &right, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_merge_lists() {
        let schema = pod_schema();

        // Scalar merge lists never conflict.
        let left = obj(json!({"finalizers": ["x"]}));
        let right = obj(json!({"finalizers": ["y"]}));
        assert!(!merging_maps_have_conflicts(&left, &right, &schema).unwrap());

        // Object merge lists compare per merge key.
        let left = obj(json!({"containers": [{"name": "a", "image": "v1"}]}));
        let right = obj(json!({"containers": [{"name": "a", "image": "v2"}]}));
        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());
        assert!(merging_maps_have_conflicts(&right, &left, &schema).unwrap());

        let disjoint = obj(json!({"containers": [{"name": "b", "image": "v2"}]}));
        assert!(!merging_maps_have_conflicts(&left, &disjoint, &schema).unwrap());
    }

    #[test]
    fn test_conflict_detection_positional_lists() {
        let schema = SchemaDescriptor::new();

        // Same scalars in a different order are not a conflict.
        let left = obj(json!({"args": [1, 2]}));
        let right = obj(json!({"args": [2, 1]}));
        assert!(!merging_maps_have_conflicts(&left, &right, &schema).unwrap());

        // Different lengths are.
        let right = obj(json!({"args": [1, 2, 3]}));
        assert!(merging_maps_have_conflicts(&left, &right, &schema).unwrap());
    }

    #[test]
    fn test_sort_merge_lists_by_name() {
        let schema = pod_schema();
        let unsorted = obj(json!({
            "containers": [
                {"name": "b", "ports": [{"containerPort": 443}, {"containerPort": 80}]},
                {"name": "a"},
            ],
            "finalizers": ["z", "x", "z"],
        }));

        let result = sorted(&unsorted, &schema);
        assert_eq!(
            result,
            obj(json!({
                "containers": [
                    {"name": "a"},
                    {"name": "b", "ports": [{"containerPort": 443}, {"containerPort": 80}]},
                ],
                "finalizers": ["x", "z"],
            }))
        );
    }

    #[test]
    fn test_apply_null_preserves_original_without_match() {
        let schema = SchemaDescriptor::new();
        // A null for a key absent from the original is dropped by the
        // public apply path.
        let original = obj(json!({"replicas": 1}));
        let patch = obj(json!({"paused": null}));

        let merged = strategic_merge_map_patch(original, patch, &schema).unwrap();
        assert_eq!(merged, obj(json!({"replicas": 1})));
    }

    #[test]
    fn test_apply_to_empty_original() {
        let schema = pod_schema();
        let patch = obj(json!({"containers": [{"name": "a", "image": "v1"}]}));

        let merged = strategic_merge_map_patch(JsonMap::new(), patch, &schema).unwrap();
        assert_eq!(
            merged,
            obj(json!({"containers": [{"name": "a", "image": "v1"}]}))
        );
    }
}
