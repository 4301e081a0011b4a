//! Remote-version conflict detection and resolution.
//!
//! A version bump alone is not a conflict: the draft's baseline is diffed
//! against the fresh remote values and only managed fields that actually
//! changed are reported. Checks never touch the draft itself.

use serde::{Deserialize, Serialize};

use modsync_core::types::ModuleIdentity;

use crate::drafts::{DraftManager, ModuleDetailsDraft};
use crate::error::SyncError;
use crate::events::{EngineEvent, EventBus};
use crate::portal::{fetch_record, PortalClient};

/// Result of the latest conflict check for a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictState {
    pub has_conflict: bool,
    /// Version the portal reported at check time.
    pub portal_version: u64,
    pub conflicting_fields: Vec<String>,
}

impl ConflictState {
    pub fn clean(portal_version: u64) -> Self {
        Self {
            has_conflict: false,
            portal_version,
            conflicting_fields: Vec::new(),
        }
    }
}

/// The user's answer to a surfaced conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Keep the draft as it is; only the conflict notice goes away.
    KeepLocal,
    /// Reload from the portal, discarding unsaved edits.
    UsePortal,
}

/// Compare the draft's version with the portal's and report diverged fields.
pub async fn check_for_conflict<P: PortalClient>(
    drafts: &DraftManager,
    portal: &P,
    identity: &ModuleIdentity,
    events: Option<&EventBus>,
) -> Result<ConflictState, SyncError> {
    let Some(details) = drafts.snapshot(identity).await else {
        return Err(SyncError::NoDraft {
            module: identity.clone(),
        });
    };

    let record = fetch_record(portal, identity).await?;
    if record.version == details.version {
        drafts.clear_conflict(identity).await;
        return Ok(ConflictState::clean(record.version));
    }

    let fresh = drafts.fields().project(&record.fields);
    let conflicting_fields = drafts.fields().changed_fields(&details.original, &fresh);
    if conflicting_fields.is_empty() {
        tracing::info!(
            module = %identity,
            local_version = details.version,
            portal_version = record.version,
            "portal version advanced without managed field changes",
        );
        drafts.clear_conflict(identity).await;
        return Ok(ConflictState::clean(record.version));
    }

    let state = ConflictState {
        has_conflict: true,
        portal_version: record.version,
        conflicting_fields,
    };
    tracing::info!(
        module = %identity,
        portal_version = state.portal_version,
        fields = ?state.conflicting_fields,
        "conflict detected",
    );
    drafts.set_conflict(identity, &state).await;
    if let Some(events) = events {
        events.emit(EngineEvent::ConflictSurfaced {
            module: identity.clone(),
            state: state.clone(),
        });
    }
    Ok(state)
}

/// Apply the user's resolution. Returns the draft as it stands afterwards.
pub async fn resolve_conflict<P: PortalClient>(
    drafts: &DraftManager,
    portal: &P,
    identity: &ModuleIdentity,
    resolution: Resolution,
) -> Result<ModuleDetailsDraft, SyncError> {
    match resolution {
        Resolution::KeepLocal => {
            let Some(details) = drafts.snapshot(identity).await else {
                return Err(SyncError::NoDraft {
                    module: identity.clone(),
                });
            };
            drafts.clear_conflict(identity).await;
            tracing::info!(module = %identity, "conflict resolved: keeping local draft");
            Ok(details)
        }
        Resolution::UsePortal => {
            let details = drafts.load_details(portal, identity, true).await?;
            tracing::info!(
                module = %identity,
                version = details.version,
                "conflict resolved: adopted portal version",
            );
            Ok(details)
        }
    }
}
