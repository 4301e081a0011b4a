use rstest::rstest;
use serde_json::{json, Value};

use modsync_core::types::{FieldMap, ModuleId, ModuleIdentity, ModuleType, PortalId};
use modsync_engine::{
    check_for_conflict, resolve_conflict, ConflictState, DraftManager, FieldRegistry, MemoryPortal,
    ModuleRecord, Resolution,
};

fn identity() -> ModuleIdentity {
    ModuleIdentity {
        portal_id: PortalId::from("acme"),
        module_type: ModuleType::Datasource,
        module_id: ModuleId(100),
    }
}

fn fields(value: Value) -> FieldMap {
    serde_json::from_value(value).expect("field map")
}

fn portal_at(version: u64, value: Value) -> MemoryPortal {
    let portal = MemoryPortal::new();
    portal.insert_module(
        identity(),
        ModuleRecord {
            version,
            fields: fields(value),
        },
    );
    portal
}

fn baseline() -> Value {
    json!({
        "name": "Linux_CPU",
        "description": "cpu usage",
        "appliesTo": "isLinux()",
        "collectInterval": 60,
        "accessGroupIds": [4, 1, 2],
        "autoDiscoveryConfig": {"scheduleInterval": 15, "filters": []},
        "internalChecksum": "abc"
    })
}

#[rstest]
#[case::single_edit(vec![("name", json!("CPU"))])]
#[case::edit_and_revert(vec![("name", json!("CPU")), ("name", json!("Linux_CPU"))])]
#[case::reordered_ids(vec![("accessGroupIds", json!([2, 4, 1]))])]
#[case::new_id(vec![("accessGroupIds", json!([1, 2, 4, 8]))])]
#[case::deep_key_order(vec![(
    "autoDiscoveryConfig",
    json!({"filters": [], "scheduleInterval": 15})
)])]
#[case::deep_change(vec![(
    "autoDiscoveryConfig",
    json!({"filters": [], "scheduleInterval": 30})
)])]
#[case::field_absent_in_baseline(vec![("group", json!("Linux")), ("group", Value::Null)])]
#[case::many(vec![
    ("name", json!("X")),
    ("description", json!("cpu usage")),
    ("collectInterval", json!(120)),
    ("name", json!("Linux_CPU")),
    ("tags", json!("linux,cpu")),
])]
#[tokio::test]
async fn dirty_set_matches_field_rules(#[case] edits: Vec<(&str, Value)>) {
    let portal = portal_at(3, baseline());
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("load");

    for (field, value) in edits {
        drafts
            .update_field(&identity(), field, value)
            .await
            .expect("update");
        let snapshot = drafts.snapshot(&identity()).await.expect("draft");
        let expected = FieldRegistry::standard().dirty_fields(&snapshot.original, &snapshot.draft);
        assert_eq!(snapshot.dirty_fields, expected, "after editing {field}");
    }

    drafts.reset_draft(&identity()).await.expect("reset");
    let snapshot = drafts.snapshot(&identity()).await.expect("draft");
    assert_eq!(snapshot.draft, snapshot.original);
    assert!(snapshot.dirty_fields.is_empty());
}

#[tokio::test]
async fn reordering_large_ids_is_not_dirty() {
    let portal = portal_at(
        3,
        json!({"accessGroupIds": [9_007_199_254_740_993_u64, 9_007_199_254_740_992_u64]}),
    );
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("load");
    let dirty = drafts
        .update_field(
            &identity(),
            "accessGroupIds",
            json!([9_007_199_254_740_992_u64, 9_007_199_254_740_993_u64]),
        )
        .await
        .expect("update");
    assert!(!dirty);
    let snapshot = drafts.snapshot(&identity()).await.expect("draft");
    assert!(snapshot.dirty_fields.is_empty(), "{:?}", snapshot.dirty_fields);
}

#[tokio::test]
async fn repeated_open_keeps_edits() {
    let portal = portal_at(3, baseline());
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("load");
    drafts
        .update_field(&identity(), "name", json!("B"))
        .await
        .expect("update");
    let before = drafts.snapshot(&identity()).await.expect("draft");

    let again = drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("reload");
    assert_eq!(again.draft, before.draft);
    assert_eq!(again.dirty_fields, before.dirty_fields);
}

#[tokio::test]
async fn unmanaged_only_version_bump_is_not_a_conflict() {
    let portal = portal_at(3, json!({"name": "A"}));
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("load");
    drafts
        .update_field(&identity(), "name", json!("B"))
        .await
        .expect("update");

    portal.set_field(&identity(), "lastModifiedBy", json!("someone"));
    assert_eq!(portal.version(&identity()), Some(4));

    let state = check_for_conflict(&drafts, &portal, &identity(), None)
        .await
        .expect("check");
    assert_eq!(state, ConflictState::clean(4));
    let snapshot = drafts.snapshot(&identity()).await.expect("draft");
    assert_eq!(snapshot.draft["name"], json!("B"));
    assert_eq!(snapshot.version, 3, "draft version stays at load time");
}

#[tokio::test]
async fn conflicting_fields_exclude_equal_values() {
    let portal = portal_at(1, baseline());
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("load");

    // Same values, different representation: not conflicts.
    portal.set_field(&identity(), "accessGroupIds", json!([2, 1, 4, 4]));
    portal.set_field(
        &identity(),
        "autoDiscoveryConfig",
        json!({"filters": [], "scheduleInterval": 15.0}),
    );
    // A real change.
    portal.set_field(&identity(), "description", json!("cpu busy time"));

    let state = check_for_conflict(&drafts, &portal, &identity(), None)
        .await
        .expect("check");
    assert!(state.has_conflict);
    assert_eq!(state.conflicting_fields, vec!["description".to_string()]);
}

#[tokio::test]
async fn use_portal_resolution_adopts_remote_version() {
    let portal = portal_at(1, baseline());
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity(), false)
        .await
        .expect("load");
    drafts
        .update_field(&identity(), "appliesTo", json!("false()"))
        .await
        .expect("update");
    portal.set_field(&identity(), "appliesTo", json!("isWindows()"));

    let state = check_for_conflict(&drafts, &portal, &identity(), None)
        .await
        .expect("check");
    let details = resolve_conflict(&drafts, &portal, &identity(), Resolution::UsePortal)
        .await
        .expect("resolve");
    assert!(details.dirty_fields.is_empty());
    assert_eq!(details.version, state.portal_version);
    assert_eq!(drafts.conflict(&identity()).await, None);
}

#[tokio::test]
async fn conflict_check_without_draft_fails() {
    let portal = portal_at(1, baseline());
    let drafts = DraftManager::default();
    let err = check_for_conflict(&drafts, &portal, &identity(), None)
        .await
        .expect_err("no draft");
    assert!(err.to_string().contains("acme/datasource/100"), "{err}");
}
