//! Error types for modsync-engine.

use std::path::PathBuf;

use thiserror::Error;

use modsync_core::types::{ModuleIdentity, PortalId, ScriptRole};

use crate::binding::ViewId;

/// All errors that can arise from engine operations.
///
/// A failed operation leaves drafts, dirty sets and conflict state exactly
/// as they were before the call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The portal could not be reached or refused the fetch.
    #[error("portal '{portal}' unreachable: {reason}")]
    RemoteUnreachable { portal: PortalId, reason: String },

    /// Read or write access to the directory was not granted.
    #[error("permission denied for directory '{directory}'")]
    PermissionDenied { directory: String },

    /// The directory is bound to a portal that is not the active connection.
    #[error(
        "directory is bound to portal '{required}' ({required_hostname}); active portal is {}",
        active.as_ref().map_or_else(|| "none".to_string(), |p| format!("'{p}'"))
    )]
    BindingMismatch {
        required: PortalId,
        required_hostname: String,
        active: Option<PortalId>,
    },

    /// `module.json` exists but cannot be parsed.
    #[error("module.json in '{directory}' is corrupt: {source}")]
    ConfigCorrupt {
        directory: String,
        #[source]
        source: serde_json::Error,
    },

    /// The directory or its descriptor can no longer be resolved.
    #[error("{what} not found in '{directory}'")]
    NotFound { directory: String, what: String },

    /// No draft is loaded for the module.
    #[error("no draft loaded for module {module}")]
    NoDraft { module: ModuleIdentity },

    /// The field is not part of the managed allow-list.
    #[error("field '{field}' is not a managed module field")]
    UnmanagedField { field: String },

    /// The directory mirrors a different module than the one requested.
    #[error("directory '{directory}' mirrors module {found}, not {expected}")]
    ModuleMismatch {
        directory: String,
        expected: ModuleIdentity,
        found: ModuleIdentity,
    },

    /// The default file name for a role is already used by another role.
    #[error("file '{file_name}' for {role} script is already used by the {other} script")]
    FileNameCollision {
        file_name: String,
        role: ScriptRole,
        other: ScriptRole,
    },

    /// No open view has this id.
    #[error("no open view {view}")]
    UnknownView { view: ViewId },

    /// The operation needs a module binding but the view is a local copy.
    #[error("{view} is a local copy with no module binding")]
    ViewNotBound { view: ViewId },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (descriptor render path).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
