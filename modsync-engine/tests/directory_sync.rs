use std::fs;

use serde_json::json;
use tempfile::TempDir;

use modsync_core::types::{
    Checksum, ModuleBinding, ModuleDirectoryConfig, ModuleId, ModuleType, PortalConnection,
    PortalId, ScriptDescriptor, ScriptRole,
};
use modsync_engine::{
    compute_script_status, diff_script, export_module, fingerprint, fingerprint_bytes,
    load_descriptor, persist_details, pull_details, re_export_script, restore_local_draft,
    scan_directory, DraftManager, EngineEvent, EventBus, FieldRegistry, FsDirectory,
    MemoryDirectory, MemoryPortal, MetadataHealth, ModuleRecord, Permission, PersistOutcome,
    PortalSession, ScriptExport, ScriptState, SyncError, DESCRIPTOR_FILE,
};

fn binding(portal: &str) -> ModuleBinding {
    ModuleBinding {
        portal_id: PortalId::from(portal),
        portal_hostname: format!("{portal}.example.com"),
        module_id: ModuleId(77),
        module_type: ModuleType::Datasource,
        module_name: "Linux_Disk".into(),
        lineage_id: Some("lin-77".into()),
    }
}

fn session(portal: &str) -> PortalSession {
    PortalSession::connected(PortalConnection {
        portal_id: PortalId::from(portal),
        hostname: format!("{portal}.example.com"),
    })
}

fn portal() -> MemoryPortal {
    let portal = MemoryPortal::new();
    portal.insert_module(
        binding("p1").identity(),
        ModuleRecord {
            version: 5,
            fields: serde_json::from_value(json!({
                "name": "Linux_Disk",
                "appliesTo": "isLinux()",
                "description": "disk io",
                "internal": true
            }))
            .expect("fields"),
        },
    );
    portal.set_script(&binding("p1").identity(), ScriptRole::Collection, "collect()\r\n");
    portal.set_script(&binding("p1").identity(), ScriptRole::Discovery, "discover()\n");
    portal
}

async fn exported(dir: &FsDirectory, portal: &MemoryPortal) -> ModuleDirectoryConfig {
    export_module(
        dir,
        &session("p1"),
        portal,
        &FieldRegistry::standard(),
        &binding("p1"),
        &[
            ScriptExport::new(ScriptRole::Collection),
            ScriptExport::new(ScriptRole::Discovery).with_language("powershell"),
        ],
    )
    .await
    .expect("export")
}

#[tokio::test]
async fn export_writes_scripts_and_descriptor() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    let config = exported(&dir, &portal).await;

    assert!(tmp.path().join("collection.groovy").exists());
    assert!(tmp.path().join("discovery.ps1").exists());
    let on_disk: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join(DESCRIPTOR_FILE)).expect("read"))
            .expect("json");
    assert_eq!(on_disk["portalBinding"]["lineageId"], json!("lin-77"));
    assert_eq!(on_disk["moduleDetails"]["portalVersion"], json!(7));
    assert!(on_disk["moduleDetails"]["portalBaseline"].get("internal").is_none());

    let collection = &config.scripts[&ScriptRole::Collection];
    assert_eq!(collection.portal_checksum, fingerprint("collect()\n"));
    assert!(collection.in_sync_with_portal());
}

#[tokio::test]
async fn external_edit_then_re_export_round_trip() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    exported(&dir, &portal).await;

    fs::write(tmp.path().join("collection.groovy"), "collect(); tweak()\n").expect("edit");
    let report = scan_directory(&dir, None).await.expect("scan");
    let collection = report
        .scripts
        .iter()
        .find(|s| s.role == ScriptRole::Collection)
        .expect("collection");
    assert_eq!(collection.state, ScriptState::Modified);
    assert!(report.has_modified_scripts());

    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let status = re_export_script(&dir, &session("p1"), &portal, ScriptRole::Collection, Some(&bus))
        .await
        .expect("re-export");
    assert_eq!(status.state, ScriptState::Present);
    assert!(matches!(
        rx.try_recv(),
        Ok(EngineEvent::ScriptStatus { state: ScriptState::Present, .. })
    ));

    let config = load_descriptor(&dir).await.expect("descriptor");
    let descriptor = &config.scripts[&ScriptRole::Collection];
    let status = compute_script_status(&dir, ScriptRole::Collection, descriptor)
        .await
        .expect("status");
    assert!(!status.modified());
    assert!(descriptor.in_sync_with_portal());
}

#[tokio::test]
async fn non_utf8_script_is_reported_modified() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    exported(&dir, &portal).await;

    let latin1 = [0xff, 0xfe, b'a', b'\r', b'\n'];
    fs::write(tmp.path().join("collection.groovy"), latin1).expect("edit");
    let report = scan_directory(&dir, None).await.expect("scan");
    let collection = report
        .scripts
        .iter()
        .find(|s| s.role == ScriptRole::Collection)
        .expect("collection");
    assert_eq!(collection.state, ScriptState::Modified);
    assert_eq!(collection.checksum, Some(fingerprint_bytes(&latin1)));

    let diff = diff_script(&dir, &session("p1"), &portal, ScriptRole::Collection)
        .await
        .expect("diff")
        .expect("differs");
    assert!(diff.contains("-collect()"), "{diff}");

    fs::remove_file(tmp.path().join(DESCRIPTOR_FILE)).expect("remove");
    let report = scan_directory(&dir, None).await.expect("scan without descriptor");
    assert_eq!(report.metadata, MetadataHealth::Missing);
    assert_eq!(report.scripts[0].state, ScriptState::Present);
    assert_eq!(report.scripts[0].file_name, "collection.groovy");
}

#[tokio::test]
async fn stale_disk_checksum_is_modified_until_re_export() {
    let dir = MemoryDirectory::new("mod");
    let portal = portal();
    let mut config = ModuleDirectoryConfig::new(binding("p1"));
    config.scripts.insert(
        ScriptRole::Collection,
        ScriptDescriptor {
            file_name: "collection.groovy".into(),
            language: "groovy".into(),
            mode: "embed".into(),
            portal_checksum: Checksum::from("x"),
            disk_checksum: Checksum::from("x"),
        },
    );
    dir.put_external(DESCRIPTOR_FILE, &config.to_json().expect("render"));
    dir.put_external("collection.groovy", "local body\n");

    let descriptor = config.scripts[&ScriptRole::Collection].clone();
    let status = compute_script_status(&dir, ScriptRole::Collection, &descriptor)
        .await
        .expect("status");
    assert!(status.modified());
    assert_eq!(status.checksum, Some(fingerprint("local body\n")));

    re_export_script(&dir, &session("p1"), &portal, ScriptRole::Collection, None)
        .await
        .expect("re-export");
    let config = load_descriptor(&dir).await.expect("descriptor");
    let descriptor = &config.scripts[&ScriptRole::Collection];
    let expected = fingerprint("collect()\n");
    assert_eq!(descriptor.portal_checksum, expected);
    assert_eq!(descriptor.disk_checksum, expected);
    let status = compute_script_status(&dir, ScriptRole::Collection, descriptor)
        .await
        .expect("status");
    assert!(!status.modified());
}

#[tokio::test]
async fn failed_descriptor_write_restores_previous_script() {
    let dir = MemoryDirectory::new("mod");
    let portal = portal();
    let mut config = ModuleDirectoryConfig::new(binding("p1"));
    config.scripts.insert(
        ScriptRole::Collection,
        ScriptDescriptor {
            file_name: "collection.groovy".into(),
            language: "groovy".into(),
            mode: "embed".into(),
            portal_checksum: fingerprint("old body\n"),
            disk_checksum: fingerprint("old body\n"),
        },
    );
    dir.put_external(DESCRIPTOR_FILE, &config.to_json().expect("render"));
    dir.put_external("collection.groovy", "old body\n");

    dir.fail_writes_to(DESCRIPTOR_FILE, true);
    let err = re_export_script(&dir, &session("p1"), &portal, ScriptRole::Collection, None)
        .await
        .expect_err("descriptor write fails");
    assert!(matches!(err, SyncError::Io { .. }), "{err}");
    assert_eq!(dir.get("collection.groovy").as_deref(), Some("old body\n"));
    let report = scan_directory(&dir, None).await.expect("scan");
    assert!(!report.has_modified_scripts());

    dir.fail_writes_to(DESCRIPTOR_FILE, false);
    re_export_script(&dir, &session("p1"), &portal, ScriptRole::Collection, None)
        .await
        .expect("re-export");
    let report = scan_directory(&dir, None).await.expect("scan");
    assert!(!report.has_modified_scripts());
    assert_eq!(
        report.scripts[0].checksum,
        Some(fingerprint("collect()\n"))
    );
}

#[tokio::test]
async fn re_export_under_other_portal_is_refused() {
    let dir = MemoryDirectory::new("mod");
    let portal = portal();
    let config = ModuleDirectoryConfig::new(binding("p1"));
    dir.put_external(DESCRIPTOR_FILE, &config.to_json().expect("render"));

    let err = re_export_script(&dir, &session("p2"), &portal, ScriptRole::Collection, None)
        .await
        .expect_err("mismatch");
    match err {
        SyncError::BindingMismatch {
            required, active, ..
        } => {
            assert_eq!(required, PortalId::from("p1"));
            assert_eq!(active, Some(PortalId::from("p2")));
        }
        other => panic!("expected BindingMismatch, got {other:?}"),
    }
    assert_eq!(dir.write_count(), 0);
}

#[tokio::test]
async fn denied_permission_writes_nothing() {
    let dir = MemoryDirectory::new("mod");
    let portal = portal();
    dir.put_external(
        DESCRIPTOR_FILE,
        &ModuleDirectoryConfig::new(binding("p1"))
            .to_json()
            .expect("render"),
    );
    dir.set_permission(Permission::Prompt, false);

    let err = re_export_script(&dir, &session("p1"), &portal, ScriptRole::Discovery, None)
        .await
        .expect_err("denied");
    assert!(matches!(err, SyncError::PermissionDenied { ref directory } if directory == "mod"));
    assert_eq!(dir.write_count(), 0);
    assert_eq!(dir.get("discovery.groovy"), None);
}

#[tokio::test]
async fn offline_portal_writes_nothing() {
    let dir = MemoryDirectory::new("mod");
    let portal = portal();
    dir.put_external(
        DESCRIPTOR_FILE,
        &ModuleDirectoryConfig::new(binding("p1"))
            .to_json()
            .expect("render"),
    );
    portal.set_offline(true);

    let err = re_export_script(&dir, &session("p1"), &portal, ScriptRole::Collection, None)
        .await
        .expect_err("offline");
    assert!(matches!(err, SyncError::RemoteUnreachable { .. }));
    assert_eq!(dir.write_count(), 0);
}

#[tokio::test]
async fn corrupt_descriptor_still_probes_default_files() {
    let tmp = TempDir::new().expect("tmp");
    fs::write(tmp.path().join(DESCRIPTOR_FILE), "{\"portalBinding\": ").expect("write");
    fs::write(tmp.path().join("discovery.py"), "print(1)\n").expect("write");
    let dir = FsDirectory::new(tmp.path());

    let report = scan_directory(&dir, None).await.expect("scan");
    assert!(matches!(report.metadata, MetadataHealth::Corrupt { .. }));
    assert_eq!(report.binding, None);

    let collection = &report.scripts[0];
    assert_eq!(collection.role, ScriptRole::Collection);
    assert_eq!(collection.state, ScriptState::Missing);
    let discovery = &report.scripts[1];
    assert_eq!(discovery.file_name, "discovery.py");
    assert_eq!(discovery.state, ScriptState::Present);

    assert!(matches!(
        load_descriptor(&dir).await,
        Err(SyncError::ConfigCorrupt { .. })
    ));
}

#[tokio::test]
async fn persist_merges_only_dirty_fields() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    exported(&dir, &portal).await;

    let identity = binding("p1").identity();
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    assert_eq!(
        persist_details(&dir, &session("p1"), &drafts, &identity)
            .await
            .expect("persist"),
        PersistOutcome::Skipped
    );

    drafts
        .update_field(&identity, "description", json!("disk throughput"))
        .await
        .expect("update");
    let outcome = persist_details(&dir, &session("p1"), &drafts, &identity)
        .await
        .expect("persist");
    assert_eq!(
        outcome,
        PersistOutcome::Written {
            fields: vec!["description".to_string()]
        }
    );

    let details = load_descriptor(&dir)
        .await
        .expect("descriptor")
        .module_details
        .expect("details");
    assert_eq!(details.portal_baseline["description"], json!("disk io"));
    assert_eq!(details.local_draft["description"], json!("disk throughput"));
    assert_eq!(details.local_draft["appliesTo"], json!("isLinux()"));
}

#[tokio::test]
async fn reverted_field_is_cleared_from_local_draft() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    exported(&dir, &portal).await;

    let identity = binding("p1").identity();
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    drafts
        .update_field(&identity, "description", json!("disk throughput"))
        .await
        .expect("update");
    persist_details(&dir, &session("p1"), &drafts, &identity)
        .await
        .expect("persist edit");

    drafts
        .update_field(&identity, "description", json!("disk io"))
        .await
        .expect("revert");
    let outcome = persist_details(&dir, &session("p1"), &drafts, &identity)
        .await
        .expect("persist revert");
    assert_eq!(
        outcome,
        PersistOutcome::Written {
            fields: vec!["description".to_string()]
        }
    );
    let details = load_descriptor(&dir)
        .await
        .expect("descriptor")
        .module_details
        .expect("details");
    assert_eq!(details.local_draft["description"], json!("disk io"));

    let fresh = DraftManager::default();
    fresh
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    let applied = restore_local_draft(&dir, &fresh, &identity)
        .await
        .expect("restore");
    assert!(applied.is_empty(), "{applied:?}");
    assert_eq!(
        persist_details(&dir, &session("p1"), &fresh, &identity)
            .await
            .expect("persist clean"),
        PersistOutcome::Skipped
    );
}

#[tokio::test]
async fn persist_into_another_modules_directory_is_refused() {
    let dir = MemoryDirectory::new("mod");
    let portal = portal();
    let mut other = binding("p1");
    other.module_id = ModuleId(78);
    dir.put_external(
        DESCRIPTOR_FILE,
        &ModuleDirectoryConfig::new(other).to_json().expect("render"),
    );

    let identity = binding("p1").identity();
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    drafts
        .update_field(&identity, "name", json!("x"))
        .await
        .expect("update");

    let err = persist_details(&dir, &session("p1"), &drafts, &identity)
        .await
        .expect_err("mismatch");
    assert!(matches!(err, SyncError::ModuleMismatch { .. }));
    assert_eq!(dir.write_count(), 0);
}

#[tokio::test]
async fn pull_keeps_local_edits_and_follows_untouched_fields() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    exported(&dir, &portal).await;

    let identity = binding("p1").identity();
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    drafts
        .update_field(&identity, "description", json!("mine"))
        .await
        .expect("update");
    persist_details(&dir, &session("p1"), &drafts, &identity)
        .await
        .expect("persist");

    portal.set_field(&identity, "appliesTo", json!("isLinux() && hasDisk()"));
    portal.set_field(&identity, "description", json!("theirs"));
    let details = pull_details(&dir, &session("p1"), &portal, &FieldRegistry::standard())
        .await
        .expect("pull");
    assert_eq!(details.portal_version, 9);
    assert_eq!(details.portal_baseline["description"], json!("theirs"));
    assert_eq!(details.local_draft["description"], json!("mine"));
    assert_eq!(details.local_draft["appliesTo"], json!("isLinux() && hasDisk()"));
}

#[tokio::test]
async fn restore_applies_persisted_edits_to_fresh_draft() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    exported(&dir, &portal).await;

    let identity = binding("p1").identity();
    let drafts = DraftManager::default();
    drafts
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    drafts
        .update_field(&identity, "name", json!("Disk_IO"))
        .await
        .expect("update");
    persist_details(&dir, &session("p1"), &drafts, &identity)
        .await
        .expect("persist");

    // A new session starts from the portal again.
    let fresh = DraftManager::default();
    fresh
        .load_details(&portal, &identity, false)
        .await
        .expect("load");
    let applied = restore_local_draft(&dir, &fresh, &identity)
        .await
        .expect("restore");
    assert_eq!(applied, vec!["name".to_string()]);
    let snapshot = fresh.snapshot(&identity).await.expect("draft");
    assert_eq!(snapshot.draft["name"], json!("Disk_IO"));
    assert!(snapshot.dirty_fields.contains("name"));
}

#[tokio::test]
async fn export_refuses_directory_of_another_module() {
    let tmp = TempDir::new().expect("tmp");
    let dir = FsDirectory::new(tmp.path());
    let portal = portal();
    let mut other = binding("p1");
    other.module_type = ModuleType::ConfigSource;
    fs::write(
        tmp.path().join(DESCRIPTOR_FILE),
        ModuleDirectoryConfig::new(other).to_json().expect("render"),
    )
    .expect("write");

    let err = export_module(
        &dir,
        &session("p1"),
        &portal,
        &FieldRegistry::standard(),
        &binding("p1"),
        &[ScriptExport::new(ScriptRole::Collection)],
    )
    .await
    .expect_err("mismatch");
    assert!(matches!(err, SyncError::ModuleMismatch { .. }));
    assert!(!tmp.path().join("collection.groovy").exists());
}

#[tokio::test]
async fn scan_emits_status_events() {
    let dir = MemoryDirectory::new("mod");
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let report = scan_directory(&dir, Some(&bus)).await.expect("scan");
    assert_eq!(report.metadata, MetadataHealth::Missing);
    for _ in 0..2 {
        match rx.try_recv().expect("event") {
            EngineEvent::ScriptStatus { state, .. } => assert_eq!(state, ScriptState::Missing),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(rx.try_recv().is_err());
}
