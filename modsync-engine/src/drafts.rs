//! Shared per-module drafts with field-level dirty tracking.
//!
//! One [`ModuleDetailsDraft`] exists per [`ModuleIdentity`], however many
//! views show that module. Views hold the identity, never a copy, so an edit
//! made through one view is what every other view reads next. A view count
//! per identity decides when the draft is dropped.
//!
//! Invariant: `dirty_fields` is exactly the set of managed fields whose
//! `draft` value differs from `original` under the field's rule.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use modsync_core::types::{FieldMap, ModuleIdentity};

use crate::conflict::ConflictState;
use crate::error::SyncError;
use crate::fields::FieldRegistry;
use crate::portal::{fetch_record, ModuleRecord, PortalClient};

/// Baseline and working copy of one module's managed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetailsDraft {
    /// Managed fields as of the last successful load.
    pub original: FieldMap,
    pub draft: FieldMap,
    pub dirty_fields: BTreeSet<String>,
    /// Portal version at load time.
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl ModuleDetailsDraft {
    pub fn is_dirty(&self) -> bool {
        !self.dirty_fields.is_empty()
    }
}

#[derive(Debug)]
struct DraftEntry {
    details: ModuleDetailsDraft,
    conflict: Option<ConflictState>,
}

#[derive(Debug, Default)]
struct DraftTable {
    drafts: HashMap<ModuleIdentity, DraftEntry>,
    views: HashMap<ModuleIdentity, usize>,
}

/// Owner of every module draft.
#[derive(Debug)]
pub struct DraftManager {
    fields: Arc<FieldRegistry>,
    table: RwLock<DraftTable>,
}

impl Default for DraftManager {
    fn default() -> Self {
        Self::new(FieldRegistry::standard())
    }
}

impl DraftManager {
    pub fn new(fields: FieldRegistry) -> Self {
        Self {
            fields: Arc::new(fields),
            table: RwLock::new(DraftTable::default()),
        }
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load the module's draft, reusing an existing one unless
    /// `force_refresh` is set.
    ///
    /// A failed fetch leaves any existing draft untouched.
    pub async fn load_details<P: PortalClient>(
        &self,
        portal: &P,
        identity: &ModuleIdentity,
        force_refresh: bool,
    ) -> Result<ModuleDetailsDraft, SyncError> {
        if !force_refresh {
            if let Some(entry) = self.table.read().await.drafts.get(identity) {
                tracing::debug!(module = %identity, "reusing loaded draft");
                return Ok(entry.details.clone());
            }
        }

        // No lock is held across the fetch.
        let record = fetch_record(portal, identity).await?;
        Ok(self.install(identity, &record).await)
    }

    /// Replace the module's draft with a fresh baseline from `record`.
    pub(crate) async fn install(
        &self,
        identity: &ModuleIdentity,
        record: &ModuleRecord,
    ) -> ModuleDetailsDraft {
        let projection = self.fields.project(&record.fields);
        let details = ModuleDetailsDraft {
            original: projection.clone(),
            draft: projection,
            dirty_fields: BTreeSet::new(),
            version: record.version,
            loaded_at: Utc::now(),
        };
        self.table.write().await.drafts.insert(
            identity.clone(),
            DraftEntry {
                details: details.clone(),
                conflict: None,
            },
        );
        tracing::info!(module = %identity, version = record.version, "loaded module details");
        details
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    /// Write `value` into the draft and recompute whether `field` is dirty.
    ///
    /// Returns `true` when the field differs from the baseline afterwards.
    pub async fn update_field(
        &self,
        identity: &ModuleIdentity,
        field: &str,
        value: Value,
    ) -> Result<bool, SyncError> {
        let Some(rule) = self.fields.rule(field) else {
            return Err(SyncError::UnmanagedField {
                field: field.to_string(),
            });
        };
        let mut table = self.table.write().await;
        let entry = table
            .drafts
            .get_mut(identity)
            .ok_or_else(|| SyncError::NoDraft {
                module: identity.clone(),
            })?;
        let details = &mut entry.details;

        let value = rule.normalize(value);
        let dirty = !rule.equal(
            details.original.get(field).unwrap_or(&Value::Null),
            &value,
        );
        details.draft.insert(field.to_string(), value);
        if dirty {
            details.dirty_fields.insert(field.to_string());
        } else {
            details.dirty_fields.remove(field);
        }
        tracing::debug!(module = %identity, field, dirty, "field updated");
        Ok(dirty)
    }

    /// Discard local edits: `draft = original`, nothing dirty.
    pub async fn reset_draft(&self, identity: &ModuleIdentity) -> Result<(), SyncError> {
        let mut table = self.table.write().await;
        let entry = table
            .drafts
            .get_mut(identity)
            .ok_or_else(|| SyncError::NoDraft {
                module: identity.clone(),
            })?;
        entry.details.draft = entry.details.original.clone();
        entry.details.dirty_fields.clear();
        tracing::debug!(module = %identity, "draft reset to baseline");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self, identity: &ModuleIdentity) -> Option<ModuleDetailsDraft> {
        self.table
            .read()
            .await
            .drafts
            .get(identity)
            .map(|entry| entry.details.clone())
    }

    pub async fn dirty_fields(&self, identity: &ModuleIdentity) -> Option<BTreeSet<String>> {
        self.table
            .read()
            .await
            .drafts
            .get(identity)
            .map(|entry| entry.details.dirty_fields.clone())
    }

    pub async fn is_loaded(&self, identity: &ModuleIdentity) -> bool {
        self.table.read().await.drafts.contains_key(identity)
    }

    // -----------------------------------------------------------------------
    // Conflict state
    // -----------------------------------------------------------------------

    pub async fn conflict(&self, identity: &ModuleIdentity) -> Option<ConflictState> {
        self.table
            .read()
            .await
            .drafts
            .get(identity)
            .and_then(|entry| entry.conflict.clone())
    }

    /// Store the latest conflict check result; a clean result clears it.
    pub(crate) async fn set_conflict(&self, identity: &ModuleIdentity, state: &ConflictState) {
        if let Some(entry) = self.table.write().await.drafts.get_mut(identity) {
            entry.conflict = state.has_conflict.then(|| state.clone());
        }
    }

    pub(crate) async fn clear_conflict(&self, identity: &ModuleIdentity) {
        if let Some(entry) = self.table.write().await.drafts.get_mut(identity) {
            entry.conflict = None;
        }
    }

    // -----------------------------------------------------------------------
    // View lifecycle
    // -----------------------------------------------------------------------

    /// Register a view of the module. Returns the new view count.
    pub async fn attach_view(&self, identity: &ModuleIdentity) -> usize {
        let mut table = self.table.write().await;
        let count = table.views.entry(identity.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Unregister a view; the last one out drops the draft.
    ///
    /// Returns the remaining view count.
    pub async fn detach_view(&self, identity: &ModuleIdentity) -> usize {
        let mut table = self.table.write().await;
        let remaining = match table.views.get_mut(identity) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            table.views.remove(identity);
            if table.drafts.remove(identity).is_some() {
                tracing::debug!(module = %identity, "last view closed, draft dropped");
            }
        }
        remaining
    }

    pub async fn view_count(&self, identity: &ModuleIdentity) -> usize {
        self.table
            .read()
            .await
            .views
            .get(identity)
            .copied()
            .unwrap_or(0)
    }
}
