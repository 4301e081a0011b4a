//! The remote store a module is fetched from.

use std::future::Future;

use modsync_core::types::{FieldMap, ModuleId, ModuleIdentity, ModuleType, PortalId, ScriptRole};

use crate::error::SyncError;

/// A module as the portal returns it: its version plus every field,
/// managed or not.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub version: u64,
    pub fields: FieldMap,
}

/// Read access to a portal. Implementations report transport failures as
/// [`SyncError::RemoteUnreachable`].
pub trait PortalClient: Send + Sync {
    fn fetch_module_record(
        &self,
        portal: &PortalId,
        module_type: ModuleType,
        module_id: ModuleId,
    ) -> impl Future<Output = Result<ModuleRecord, SyncError>> + Send;

    fn fetch_script_content(
        &self,
        portal: &PortalId,
        module_type: ModuleType,
        module_id: ModuleId,
        role: ScriptRole,
    ) -> impl Future<Output = Result<String, SyncError>> + Send;
}

/// Fetch the record for `identity`.
pub(crate) async fn fetch_record<P: PortalClient>(
    portal: &P,
    identity: &ModuleIdentity,
) -> Result<ModuleRecord, SyncError> {
    portal
        .fetch_module_record(&identity.portal_id, identity.module_type, identity.module_id)
        .await
        .inspect_err(|err| {
            tracing::warn!(module = %identity, error = %err, "module fetch failed");
        })
}

/// Fetch one script of `identity`.
pub(crate) async fn fetch_script<P: PortalClient>(
    portal: &P,
    identity: &ModuleIdentity,
    role: ScriptRole,
) -> Result<String, SyncError> {
    portal
        .fetch_script_content(
            &identity.portal_id,
            identity.module_type,
            identity.module_id,
            role,
        )
        .await
        .inspect_err(|err| {
            tracing::warn!(module = %identity, %role, error = %err, "script fetch failed");
        })
}
