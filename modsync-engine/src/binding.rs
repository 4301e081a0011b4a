//! Portal-binding guard.
//!
//! A view or directory bound to a module is only editable while its portal
//! is the active connection. When it is not, the view goes read-only and the
//! user is told which portal to switch to.

use serde::Serialize;

use modsync_core::settings::Settings;
use modsync_core::types::{ExecutionContext, ModuleBinding, PortalConnection, ScriptRole};

use crate::error::SyncError;

/// Handle of an open view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ViewId(pub u64);

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BindingStatus {
    pub fn active() -> Self {
        Self {
            is_active: true,
            reason: None,
        }
    }

    fn inactive(reason: String) -> Self {
        Self {
            is_active: false,
            reason: Some(reason),
        }
    }
}

/// Decide whether `binding` is usable under the `active` connection.
pub fn resolve_binding(
    binding: &ModuleBinding,
    active: Option<&PortalConnection>,
) -> BindingStatus {
    match active {
        None => BindingStatus::inactive(format!(
            "no portal is connected; connect to '{}' ({}) to edit {}",
            binding.portal_id, binding.portal_hostname, binding.module_name
        )),
        Some(conn) if conn.portal_id != binding.portal_id => BindingStatus::inactive(format!(
            "{} belongs to portal '{}' ({}) but the active portal is '{}' ({})",
            binding.module_name,
            binding.portal_id,
            binding.portal_hostname,
            conn.portal_id,
            conn.hostname
        )),
        Some(_) => BindingStatus::active(),
    }
}

/// Like [`resolve_binding`], but as an error for write paths.
pub fn require_active(
    binding: &ModuleBinding,
    active: Option<&PortalConnection>,
) -> Result<(), SyncError> {
    if resolve_binding(binding, active).is_active {
        return Ok(());
    }
    Err(SyncError::BindingMismatch {
        required: binding.portal_id.clone(),
        required_hostname: binding.portal_hostname.clone(),
        active: active.map(|conn| conn.portal_id.clone()),
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The user's current connection and execution target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalSession {
    active: Option<PortalConnection>,
    context: Option<ExecutionContext>,
}

impl PortalSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(conn: PortalConnection) -> Self {
        Self {
            active: Some(conn),
            context: None,
        }
    }

    /// Session reflecting the active portal saved in user settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            active: settings.active_portal.clone(),
            context: None,
        }
    }

    pub fn active(&self) -> Option<&PortalConnection> {
        self.active.as_ref()
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    /// Connect to another portal. The execution context belongs to the old
    /// portal and is dropped.
    pub fn connect(&mut self, conn: PortalConnection) {
        if self.active.as_ref() != Some(&conn) {
            self.context = None;
        }
        self.active = Some(conn);
    }

    pub fn disconnect(&mut self) {
        self.active = None;
        self.context = None;
    }

    pub fn set_context(&mut self, context: Option<ExecutionContext>) {
        self.context = context;
    }

    /// Make the view's bound portal active and restore its execution context.
    ///
    /// Returns `None` for local views, which have nothing to switch to.
    pub fn switch_to(&mut self, view: &View) -> Option<&PortalConnection> {
        let ViewSource::Bound { binding, context } = &view.source else {
            return None;
        };
        let conn = PortalConnection {
            portal_id: binding.portal_id.clone(),
            hostname: binding.portal_hostname.clone(),
        };
        tracing::info!(view = %view.id, portal = %conn.portal_id, "switched to bound portal");
        self.active = Some(conn);
        self.context = context.clone();
        self.active.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Where a view's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSource {
    Bound {
        binding: ModuleBinding,
        context: Option<ExecutionContext>,
    },
    /// Unbound copy; never guarded.
    Local,
}

/// One editing surface over a module (or over a local copy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    id: ViewId,
    source: ViewSource,
    role: Option<ScriptRole>,
    status: BindingStatus,
}

impl View {
    pub fn bound(
        id: ViewId,
        binding: ModuleBinding,
        role: Option<ScriptRole>,
        context: Option<ExecutionContext>,
    ) -> Self {
        Self {
            id,
            source: ViewSource::Bound { binding, context },
            role,
            // Guarded until the first refresh says otherwise.
            status: BindingStatus::inactive("binding not yet resolved".to_string()),
        }
    }

    pub fn local(id: ViewId) -> Self {
        Self {
            id,
            source: ViewSource::Local,
            role: None,
            status: BindingStatus::active(),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn source(&self) -> &ViewSource {
        &self.source
    }

    pub fn binding(&self) -> Option<&ModuleBinding> {
        match &self.source {
            ViewSource::Bound { binding, .. } => Some(binding),
            ViewSource::Local => None,
        }
    }

    pub fn role(&self) -> Option<ScriptRole> {
        self.role
    }

    pub fn status(&self) -> &BindingStatus {
        &self.status
    }

    pub fn is_read_only(&self) -> bool {
        !self.status.is_active
    }

    /// Re-run the binding guard against the session.
    pub fn refresh(&mut self, session: &PortalSession) -> &BindingStatus {
        self.status = match &self.source {
            ViewSource::Bound { binding, .. } => resolve_binding(binding, session.active()),
            ViewSource::Local => BindingStatus::active(),
        };
        if let Some(reason) = &self.status.reason {
            tracing::debug!(view = %self.id, reason = %reason, "view is read-only");
        }
        &self.status
    }

    /// Break the binding for good. Returns the binding that was dropped.
    pub fn convert_to_local(&mut self) -> Option<ModuleBinding> {
        let previous = std::mem::replace(&mut self.source, ViewSource::Local);
        self.status = BindingStatus::active();
        match previous {
            ViewSource::Bound { binding, .. } => {
                tracing::info!(view = %self.id, module = %binding.identity(), "view converted to local");
                Some(binding)
            }
            ViewSource::Local => None,
        }
    }
}
