//! Directory sync coordinator.
//!
//! Keeps a mirrored module directory (`module.json` plus script files) in
//! step with the portal and with the in-memory draft.
//!
//! Script state per role:
//! 1. `Missing` (file absent)
//! 2. `Modified` (fingerprint differs from the recorded `diskChecksum`)
//! 3. `Present`
//!
//! A modified script only returns to `Present` through [`re_export_script`].
//!
//! Every write path re-checks the binding, then obtains a [`WriteAccess`]
//! before the first byte is written. Portal fetches happen before that, so
//! a failed fetch writes nothing.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use similar::TextDiff;

use modsync_core::types::{
    Checksum, ModuleBinding, ModuleDetails, ModuleDirectoryConfig, ModuleIdentity, ScriptDescriptor,
    ScriptRole, DEFAULT_LANGUAGE, DEFAULT_MODE, SCRIPT_LANGUAGES,
};

use crate::binding::{require_active, PortalSession};
use crate::checksum::{fingerprint, fingerprint_bytes, normalize_line_endings};
use crate::directory::{ensure_write_access, DirectoryStore, WriteAccess};
use crate::drafts::{DraftManager, ModuleDetailsDraft};
use crate::error::SyncError;
use crate::events::{EngineEvent, EventBus};
use crate::fields::FieldRegistry;
use crate::portal::{fetch_record, fetch_script, PortalClient};

/// Name of the descriptor file inside a module directory.
pub const DESCRIPTOR_FILE: &str = "module.json";

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptState {
    Present,
    Modified,
    Missing,
}

impl std::fmt::Display for ScriptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScriptState::Present => "present",
            ScriptState::Modified => "modified",
            ScriptState::Missing => "missing",
        })
    }
}

/// State of one role's script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStatus {
    pub role: ScriptRole,
    pub file_name: String,
    pub state: ScriptState,
    /// Fingerprint of the file as it is now; `None` when missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl ScriptStatus {
    pub fn modified(&self) -> bool {
        self.state == ScriptState::Modified
    }
}

/// Health of `module.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MetadataHealth {
    Ok,
    Missing,
    /// Present but unparseable; script states are best-effort.
    Corrupt { reason: String },
}

/// Everything [`scan_directory`] learned about a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryReport {
    pub directory: String,
    pub metadata: MetadataHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ModuleBinding>,
    pub scripts: Vec<ScriptStatus>,
}

impl DirectoryReport {
    pub fn has_modified_scripts(&self) -> bool {
        self.scripts.iter().any(ScriptStatus::modified)
    }
}

/// Result of [`persist_details`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Nothing was dirty; `module.json` was not touched.
    Skipped,
    Written { fields: Vec<String> },
}

/// One script to include in a first export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExport {
    pub role: ScriptRole,
    pub language: String,
    pub mode: String,
}

impl ScriptExport {
    pub fn new(role: ScriptRole) -> Self {
        Self {
            role,
            language: DEFAULT_LANGUAGE.to_string(),
            mode: DEFAULT_MODE.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Read and parse the directory's `module.json`.
pub async fn load_descriptor<D: DirectoryStore>(
    dir: &D,
) -> Result<ModuleDirectoryConfig, SyncError> {
    let Some(text) = dir.read_file(DESCRIPTOR_FILE).await? else {
        return Err(SyncError::NotFound {
            directory: dir.name().to_string(),
            what: DESCRIPTOR_FILE.to_string(),
        });
    };
    ModuleDirectoryConfig::from_json(&text).map_err(|source| SyncError::ConfigCorrupt {
        directory: dir.name().to_string(),
        source,
    })
}

async fn write_descriptor<D: DirectoryStore>(
    dir: &D,
    access: &WriteAccess,
    config: &ModuleDirectoryConfig,
) -> Result<(), SyncError> {
    let text = config.to_json()?;
    dir.write_file(access, DESCRIPTOR_FILE, &text).await?;
    tracing::info!(directory = dir.name(), "wrote {DESCRIPTOR_FILE}");
    Ok(())
}

/// Write one script, then the descriptor recording its checksum.
///
/// When the descriptor write fails the previous script text is put back, so
/// the old `diskChecksum` still describes the file. A script that was absent
/// or not UTF-8 cannot be restored; re-exporting again resyncs it.
async fn write_script_and_descriptor<D: DirectoryStore>(
    dir: &D,
    access: &WriteAccess,
    file_name: &str,
    content: &str,
    config: &ModuleDirectoryConfig,
) -> Result<(), SyncError> {
    let previous = dir
        .read_bytes(file_name)
        .await?
        .and_then(|bytes| String::from_utf8(bytes).ok());
    dir.write_file(access, file_name, content).await?;

    let Err(err) = write_descriptor(dir, access, config).await else {
        return Ok(());
    };
    match previous {
        Some(previous) => {
            if let Err(restore) = dir.write_file(access, file_name, &previous).await {
                tracing::warn!(
                    directory = dir.name(),
                    file = file_name,
                    error = %restore,
                    "could not restore script",
                );
            }
        }
        None => {
            tracing::warn!(
                directory = dir.name(),
                file = file_name,
                "script left without a matching descriptor",
            );
        }
    }
    Err(err)
}

fn ensure_same_module<D: DirectoryStore>(
    dir: &D,
    config: &ModuleDirectoryConfig,
    expected: &ModuleIdentity,
) -> Result<(), SyncError> {
    let found = config.portal_binding.identity();
    if &found == expected {
        return Ok(());
    }
    Err(SyncError::ModuleMismatch {
        directory: dir.name().to_string(),
        expected: expected.clone(),
        found,
    })
}

// ---------------------------------------------------------------------------
// Script status
// ---------------------------------------------------------------------------

/// Classify one role's file against its descriptor.
pub async fn compute_script_status<D: DirectoryStore>(
    dir: &D,
    role: ScriptRole,
    descriptor: &ScriptDescriptor,
) -> Result<ScriptStatus, SyncError> {
    let (state, checksum) = match dir.read_bytes(&descriptor.file_name).await? {
        None => (ScriptState::Missing, None),
        Some(content) => {
            let current = fingerprint_bytes(&content);
            let state = if current == descriptor.disk_checksum {
                ScriptState::Present
            } else {
                ScriptState::Modified
            };
            (state, Some(current))
        }
    };
    Ok(ScriptStatus {
        role,
        file_name: descriptor.file_name.clone(),
        state,
        checksum,
    })
}

/// Status of every script the directory knows about.
///
/// A missing or corrupt `module.json` is reported in the result rather than
/// as an error; script files are then probed under their role-default names.
pub async fn scan_directory<D: DirectoryStore>(
    dir: &D,
    events: Option<&EventBus>,
) -> Result<DirectoryReport, SyncError> {
    let mut report = DirectoryReport {
        directory: dir.name().to_string(),
        metadata: MetadataHealth::Ok,
        binding: None,
        scripts: Vec::new(),
    };

    match load_descriptor(dir).await {
        Ok(config) => {
            for (role, descriptor) in &config.scripts {
                let status = compute_script_status(dir, *role, descriptor).await?;
                report.scripts.push(status);
            }
            report.binding = Some(config.portal_binding);
        }
        Err(SyncError::NotFound { .. }) => {
            report.metadata = MetadataHealth::Missing;
            report.scripts = probe_default_files(dir).await?;
        }
        Err(SyncError::ConfigCorrupt { source, .. }) => {
            tracing::warn!(directory = dir.name(), error = %source, "module.json is unrecoverable");
            report.metadata = MetadataHealth::Corrupt {
                reason: source.to_string(),
            };
            report.scripts = probe_default_files(dir).await?;
        }
        Err(err) => return Err(err),
    }

    if let Some(events) = events {
        for status in &report.scripts {
            events.emit(EngineEvent::ScriptStatus {
                directory: report.directory.clone(),
                role: status.role,
                state: status.state,
            });
        }
    }
    Ok(report)
}

/// Existence-only check of `<role>.<ext>` for every known language.
async fn probe_default_files<D: DirectoryStore>(dir: &D) -> Result<Vec<ScriptStatus>, SyncError> {
    let mut statuses = Vec::new();
    for role in ScriptRole::all() {
        let mut found = None;
        for language in SCRIPT_LANGUAGES {
            let file_name = role.default_file_name(language);
            if let Some(content) = dir.read_bytes(&file_name).await? {
                found = Some((file_name, fingerprint_bytes(&content)));
                break;
            }
        }
        statuses.push(match found {
            Some((file_name, checksum)) => ScriptStatus {
                role: *role,
                file_name,
                state: ScriptState::Present,
                checksum: Some(checksum),
            },
            None => ScriptStatus {
                role: *role,
                file_name: role.default_file_name(DEFAULT_LANGUAGE),
                state: ScriptState::Missing,
                checksum: None,
            },
        });
    }
    Ok(statuses)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// File name for `role`: the descriptor's, or the role default when the role
/// has never been exported.
fn file_name_for(config: &ModuleDirectoryConfig, role: ScriptRole) -> Result<String, SyncError> {
    if let Some(descriptor) = config.scripts.get(&role) {
        return Ok(descriptor.file_name.clone());
    }
    let file_name = role.default_file_name(DEFAULT_LANGUAGE);
    if let Some(other) = config.role_using_file(&file_name, role) {
        return Err(SyncError::FileNameCollision {
            file_name,
            role,
            other,
        });
    }
    Ok(file_name)
}

/// Overwrite one script with the portal's content.
///
/// Afterwards `portalChecksum == diskChecksum == fingerprint(content)` and
/// the script is not modified.
pub async fn re_export_script<D: DirectoryStore, P: PortalClient>(
    dir: &D,
    session: &PortalSession,
    portal: &P,
    role: ScriptRole,
    events: Option<&EventBus>,
) -> Result<ScriptStatus, SyncError> {
    let mut config = load_descriptor(dir).await?;
    require_active(&config.portal_binding, session.active())?;
    let identity = config.portal_binding.identity();
    let file_name = file_name_for(&config, role)?;

    let content = fetch_script(portal, &identity, role).await?;
    let access = ensure_write_access(dir).await?;

    let checksum = fingerprint(&content);
    let descriptor = config
        .scripts
        .entry(role)
        .or_insert_with(|| ScriptDescriptor {
            file_name: file_name.clone(),
            language: DEFAULT_LANGUAGE.to_string(),
            mode: DEFAULT_MODE.to_string(),
            portal_checksum: Checksum::default(),
            disk_checksum: Checksum::default(),
        });
    descriptor.portal_checksum = checksum.clone();
    descriptor.disk_checksum = checksum.clone();
    write_script_and_descriptor(dir, &access, &file_name, &content, &config).await?;
    tracing::info!(directory = dir.name(), %role, file = %file_name, "re-exported script");

    let status = ScriptStatus {
        role,
        file_name,
        state: ScriptState::Present,
        checksum: Some(checksum),
    };
    if let Some(events) = events {
        events.emit(EngineEvent::ScriptStatus {
            directory: dir.name().to_string(),
            role,
            state: status.state,
        });
    }
    Ok(status)
}

/// Write the module's dirty fields into `moduleDetails.localDraft`.
///
/// A field persisted as edited earlier and since reverted in memory is
/// written back too, so [`restore_local_draft`] does not resurrect it. The
/// draft is expected to have been restored from the same directory first.
/// The portal baseline is never modified here.
pub async fn persist_details<D: DirectoryStore>(
    dir: &D,
    session: &PortalSession,
    drafts: &DraftManager,
    identity: &ModuleIdentity,
) -> Result<PersistOutcome, SyncError> {
    let Some(details) = drafts.snapshot(identity).await else {
        return Err(SyncError::NoDraft {
            module: identity.clone(),
        });
    };
    let mut config = match load_descriptor(dir).await {
        Ok(config) => config,
        Err(_) if !details.is_dirty() => {
            tracing::debug!(module = %identity, "nothing dirty, module.json left alone");
            return Ok(PersistOutcome::Skipped);
        }
        Err(err) => return Err(err),
    };
    let reverted = reverted_fields(drafts.fields(), &details, config.module_details.as_ref());
    if !details.is_dirty() && reverted.is_empty() {
        tracing::debug!(module = %identity, "nothing dirty, module.json left alone");
        return Ok(PersistOutcome::Skipped);
    }

    require_active(&config.portal_binding, session.active())?;
    ensure_same_module(dir, &config, identity)?;
    let access = ensure_write_access(dir).await?;

    let mut stored = config.module_details.take().unwrap_or_else(|| ModuleDetails {
        portal_version: details.version,
        last_pulled_at: details.loaded_at,
        portal_baseline: details.original.clone(),
        local_draft: details.original.clone(),
    });
    for (field, value) in &stored.portal_baseline {
        if !stored.local_draft.contains_key(field) {
            stored.local_draft.insert(field.clone(), value.clone());
        }
    }
    let written: BTreeSet<String> = details.dirty_fields.union(&reverted).cloned().collect();
    for field in &written {
        match details.draft.get(field) {
            Some(value) => stored.local_draft.insert(field.clone(), value.clone()),
            None => stored.local_draft.remove(field),
        };
    }
    config.module_details = Some(stored);
    write_descriptor(dir, &access, &config).await?;

    let fields: Vec<String> = written.into_iter().collect();
    tracing::info!(module = %identity, ?fields, ?reverted, "persisted draft fields");
    Ok(PersistOutcome::Written { fields })
}

/// Fields whose persisted `localDraft` still holds an edit that the
/// in-memory draft has since reverted to the baseline.
fn reverted_fields(
    registry: &FieldRegistry,
    details: &ModuleDetailsDraft,
    stored: Option<&ModuleDetails>,
) -> BTreeSet<String> {
    let Some(stored) = stored else {
        return BTreeSet::new();
    };
    stored
        .local_draft
        .keys()
        .chain(stored.portal_baseline.keys())
        .filter(|field| registry.is_managed(field) && !details.dirty_fields.contains(*field))
        .filter(|field| {
            let edited = !registry.equal(
                field,
                stored.portal_baseline.get(*field),
                stored.local_draft.get(*field),
            );
            let stale = !registry.equal(
                field,
                stored.local_draft.get(*field),
                details.draft.get(*field),
            );
            edited && stale
        })
        .cloned()
        .collect()
}

/// First export of a module into `dir`.
///
/// Refuses a directory already bound to another module. A corrupt
/// `module.json` is replaced. Scripts are written before the descriptor; if
/// the descriptor write fails the scripts stay on disk and running the export
/// again brings the directory back in sync.
pub async fn export_module<D: DirectoryStore, P: PortalClient>(
    dir: &D,
    session: &PortalSession,
    portal: &P,
    fields: &FieldRegistry,
    binding: &ModuleBinding,
    scripts: &[ScriptExport],
) -> Result<ModuleDirectoryConfig, SyncError> {
    require_active(binding, session.active())?;
    let identity = binding.identity();
    match load_descriptor(dir).await {
        Ok(existing) => ensure_same_module(dir, &existing, &identity)?,
        Err(SyncError::NotFound { .. }) => {}
        Err(SyncError::ConfigCorrupt { source, .. }) => {
            tracing::warn!(directory = dir.name(), error = %source, "replacing corrupt module.json");
        }
        Err(err) => return Err(err),
    }

    let record = fetch_record(portal, &identity).await?;
    let mut contents = Vec::with_capacity(scripts.len());
    for script in scripts {
        let content = fetch_script(portal, &identity, script.role).await?;
        contents.push((script, content));
    }

    let access = ensure_write_access(dir).await?;
    let mut config = ModuleDirectoryConfig::new(binding.clone());
    for (script, content) in contents {
        let file_name = script.role.default_file_name(&script.language);
        let checksum = fingerprint(&content);
        dir.write_file(&access, &file_name, &content).await?;
        config.scripts.insert(
            script.role,
            ScriptDescriptor {
                file_name,
                language: script.language.clone(),
                mode: script.mode.clone(),
                portal_checksum: checksum.clone(),
                disk_checksum: checksum,
            },
        );
    }
    let projection = fields.project(&record.fields);
    config.module_details = Some(ModuleDetails {
        portal_version: record.version,
        last_pulled_at: Utc::now(),
        portal_baseline: projection.clone(),
        local_draft: projection,
    });
    write_descriptor(dir, &access, &config).await?;
    tracing::info!(
        directory = dir.name(),
        module = %identity,
        version = record.version,
        scripts = config.scripts.len(),
        "exported module",
    );
    Ok(config)
}

/// Refresh the stored portal baseline.
///
/// Fields the user never changed locally follow the new baseline; locally
/// edited fields keep their value.
pub async fn pull_details<D: DirectoryStore, P: PortalClient>(
    dir: &D,
    session: &PortalSession,
    portal: &P,
    fields: &FieldRegistry,
) -> Result<ModuleDetails, SyncError> {
    let mut config = load_descriptor(dir).await?;
    require_active(&config.portal_binding, session.active())?;
    let identity = config.portal_binding.identity();

    let record = fetch_record(portal, &identity).await?;
    let fresh = fields.project(&record.fields);
    let previous = config.module_details.take();

    let mut local_draft = fresh.clone();
    if let Some(previous) = &previous {
        for field in fields.fields() {
            let local = previous
                .local_draft
                .get(field)
                .or_else(|| previous.portal_baseline.get(field));
            if fields.equal(field, local, previous.portal_baseline.get(field)) {
                continue;
            }
            match local {
                Some(value) => local_draft.insert(field.to_string(), value.clone()),
                None => local_draft.remove(field),
            };
        }
    }

    let access = ensure_write_access(dir).await?;
    let details = ModuleDetails {
        portal_version: record.version,
        last_pulled_at: Utc::now(),
        portal_baseline: fresh,
        local_draft,
    };
    config.module_details = Some(details.clone());
    write_descriptor(dir, &access, &config).await?;
    tracing::info!(module = %identity, version = record.version, "pulled module details");
    Ok(details)
}

/// Re-apply locally persisted field edits onto the in-memory draft.
///
/// Returns the fields that were applied. The draft must already be loaded.
pub async fn restore_local_draft<D: DirectoryStore>(
    dir: &D,
    drafts: &DraftManager,
    identity: &ModuleIdentity,
) -> Result<Vec<String>, SyncError> {
    let config = load_descriptor(dir).await?;
    ensure_same_module(dir, &config, identity)?;
    let Some(stored) = config.module_details else {
        tracing::debug!(module = %identity, "no stored details to restore");
        return Ok(Vec::new());
    };

    let mut applied = Vec::new();
    for (field, value) in &stored.local_draft {
        if !drafts.fields().is_managed(field) {
            continue;
        }
        if drafts
            .fields()
            .equal(field, Some(value), stored.portal_baseline.get(field))
        {
            continue;
        }
        drafts.update_field(identity, field, value.clone()).await?;
        applied.push(field.clone());
    }
    if !applied.is_empty() {
        tracing::info!(module = %identity, fields = ?applied, "restored local draft");
    }
    Ok(applied)
}

/// Unified diff from the portal's script to the file on disk, or `None`
/// when they match.
pub async fn diff_script<D: DirectoryStore, P: PortalClient>(
    dir: &D,
    session: &PortalSession,
    portal: &P,
    role: ScriptRole,
) -> Result<Option<String>, SyncError> {
    let config = load_descriptor(dir).await?;
    require_active(&config.portal_binding, session.active())?;
    let identity = config.portal_binding.identity();
    let file_name = config
        .scripts
        .get(&role)
        .map(|descriptor| descriptor.file_name.clone())
        .unwrap_or_else(|| role.default_file_name(DEFAULT_LANGUAGE));

    let remote = normalize_line_endings(&fetch_script(portal, &identity, role).await?);
    let local = dir.read_bytes(&file_name).await?.unwrap_or_default();
    let local = normalize_line_endings(&String::from_utf8_lossy(&local));
    if remote == local {
        return Ok(None);
    }

    let old_header = format!("a/{file_name}");
    let new_header = format!("b/{file_name}");
    let unified = TextDiff::from_lines(&remote, &local)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();
    Ok(Some(unified))
}
