//! Open views over modules, sharing one draft per module.

use std::collections::BTreeMap;

use serde_json::Value;

use modsync_core::types::{ExecutionContext, ModuleBinding, ModuleIdentity, ScriptRole};

use crate::binding::{require_active, BindingStatus, PortalSession, View, ViewId};
use crate::conflict::{check_for_conflict, resolve_conflict, ConflictState, Resolution};
use crate::drafts::{DraftManager, ModuleDetailsDraft};
use crate::error::SyncError;
use crate::events::{EngineEvent, EventBus};
use crate::fields::FieldRegistry;
use crate::portal::PortalClient;

/// What focusing a view found out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusOutcome {
    pub status: BindingStatus,
    /// `None` when no check ran (inactive or local view, or portal offline).
    pub conflict: Option<ConflictState>,
}

/// The set of open views for one user session.
pub struct Workspace<P> {
    portal: P,
    drafts: DraftManager,
    session: PortalSession,
    events: EventBus,
    views: BTreeMap<ViewId, View>,
    next_view: u64,
}

impl<P: PortalClient> Workspace<P> {
    pub fn new(portal: P, session: PortalSession) -> Self {
        Self::with_fields(portal, session, FieldRegistry::standard())
    }

    pub fn with_fields(portal: P, session: PortalSession, fields: FieldRegistry) -> Self {
        Self {
            portal,
            drafts: DraftManager::new(fields),
            session,
            events: EventBus::default(),
            views: BTreeMap::new(),
            next_view: 1,
        }
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }

    pub fn drafts(&self) -> &DraftManager {
        &self.drafts
    }

    pub fn session(&self) -> &PortalSession {
        &self.session
    }

    /// Changing the session does not refresh views; focus them afterwards.
    pub fn session_mut(&mut self) -> &mut PortalSession {
        &mut self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    pub fn view_ids(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.views.keys().copied()
    }

    fn allocate_id(&mut self) -> ViewId {
        let id = ViewId(self.next_view);
        self.next_view += 1;
        id
    }

    fn view_mut(&mut self, id: ViewId) -> Result<&mut View, SyncError> {
        self.views
            .get_mut(&id)
            .ok_or(SyncError::UnknownView { view: id })
    }

    fn bound_identity(&self, id: ViewId) -> Result<ModuleIdentity, SyncError> {
        let view = self.views.get(&id).ok_or(SyncError::UnknownView { view: id })?;
        view.binding()
            .map(ModuleBinding::identity)
            .ok_or(SyncError::ViewNotBound { view: id })
    }

    fn announce_inactive(&self, id: ViewId, status: &BindingStatus) {
        if let Some(reason) = &status.reason {
            self.events.emit(EngineEvent::BindingInactive {
                view: id,
                reason: reason.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // View lifecycle
    // -----------------------------------------------------------------------

    /// Open a view bound to `binding`.
    ///
    /// The draft is loaded (or reused) only when the binding is active; an
    /// inactive view opens read-only. A failed load opens nothing.
    pub async fn open_module_view(
        &mut self,
        binding: ModuleBinding,
        role: Option<ScriptRole>,
        context: Option<ExecutionContext>,
    ) -> Result<ViewId, SyncError> {
        let id = self.allocate_id();
        let identity = binding.identity();
        let mut view = View::bound(id, binding, role, context);
        let status = view.refresh(&self.session).clone();

        self.drafts.attach_view(&identity).await;
        if status.is_active {
            if let Err(err) = self.drafts.load_details(&self.portal, &identity, false).await {
                self.drafts.detach_view(&identity).await;
                return Err(err);
            }
            self.drafts.clear_conflict(&identity).await;
        } else {
            self.announce_inactive(id, &status);
        }

        tracing::info!(%id, module = %identity, active = status.is_active, "opened view");
        self.views.insert(id, view);
        Ok(id)
    }

    pub fn open_local_view(&mut self) -> ViewId {
        let id = self.allocate_id();
        self.views.insert(id, View::local(id));
        tracing::debug!(%id, "opened local view");
        id
    }

    /// Close a view; the last view of a module drops its draft.
    pub async fn close_view(&mut self, id: ViewId) -> Result<(), SyncError> {
        let view = self.views.remove(&id).ok_or(SyncError::UnknownView { view: id })?;
        if let Some(binding) = view.binding() {
            let remaining = self.drafts.detach_view(&binding.identity()).await;
            tracing::debug!(%id, remaining, "closed view");
        }
        Ok(())
    }

    /// Re-run the binding guard and, when active, check for a remote
    /// conflict. An unreachable portal only skips the check.
    pub async fn focus_view(&mut self, id: ViewId) -> Result<FocusOutcome, SyncError> {
        let session = &self.session;
        let view = self
            .views
            .get_mut(&id)
            .ok_or(SyncError::UnknownView { view: id })?;
        let status = view.refresh(session).clone();
        let identity = view.binding().map(ModuleBinding::identity);

        let Some(identity) = identity.filter(|_| status.is_active) else {
            self.announce_inactive(id, &status);
            return Ok(FocusOutcome {
                status,
                conflict: None,
            });
        };

        // Opened while inactive: nothing loaded yet.
        if !self.drafts.is_loaded(&identity).await {
            self.drafts.load_details(&self.portal, &identity, false).await?;
        }
        let conflict =
            match check_for_conflict(&self.drafts, &self.portal, &identity, Some(&self.events))
                .await
            {
                Ok(state) => Some(state),
                Err(SyncError::RemoteUnreachable { portal, reason }) => {
                    tracing::warn!(%id, %portal, reason = %reason, "skipped conflict check");
                    None
                }
                Err(err) => return Err(err),
            };
        Ok(FocusOutcome { status, conflict })
    }

    /// Activate the view's portal, restore its execution context and
    /// refresh every open view against the new connection.
    pub async fn switch_to_bound_portal(&mut self, id: ViewId) -> Result<BindingStatus, SyncError> {
        let view = self.views.get(&id).ok_or(SyncError::UnknownView { view: id })?;
        if self.session.switch_to(view).is_none() {
            return Err(SyncError::ViewNotBound { view: id });
        }
        for view in self.views.values_mut() {
            view.refresh(&self.session);
        }

        let identity = self.bound_identity(id)?;
        if !self.drafts.is_loaded(&identity).await {
            self.drafts.load_details(&self.portal, &identity, false).await?;
        }
        Ok(self.view_mut(id)?.status().clone())
    }

    /// Permanently unbind a view. Its share of the module draft is released.
    pub async fn convert_to_local(&mut self, id: ViewId) -> Result<(), SyncError> {
        if let Some(binding) = self.view_mut(id)?.convert_to_local() {
            self.drafts.detach_view(&binding.identity()).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Editing through a view
    // -----------------------------------------------------------------------

    fn writable_identity(&self, id: ViewId) -> Result<ModuleIdentity, SyncError> {
        let view = self.views.get(&id).ok_or(SyncError::UnknownView { view: id })?;
        let binding = view.binding().ok_or(SyncError::ViewNotBound { view: id })?;
        require_active(binding, self.session.active())?;
        Ok(binding.identity())
    }

    /// Edit a field of the view's module. Every view of the module sees it.
    pub async fn update_field(
        &self,
        id: ViewId,
        field: &str,
        value: Value,
    ) -> Result<bool, SyncError> {
        let identity = self.writable_identity(id)?;
        self.drafts.update_field(&identity, field, value).await
    }

    pub async fn reset_draft(&self, id: ViewId) -> Result<(), SyncError> {
        let identity = self.writable_identity(id)?;
        self.drafts.reset_draft(&identity).await
    }

    pub async fn resolve_conflict(
        &self,
        id: ViewId,
        resolution: Resolution,
    ) -> Result<ModuleDetailsDraft, SyncError> {
        let identity = self.writable_identity(id)?;
        resolve_conflict(&self.drafts, &self.portal, &identity, resolution).await
    }

    /// The draft shown by the view, if its module is loaded.
    pub async fn draft(&self, id: ViewId) -> Result<Option<ModuleDetailsDraft>, SyncError> {
        let identity = self.bound_identity(id)?;
        Ok(self.drafts.snapshot(&identity).await)
    }
}
