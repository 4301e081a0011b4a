//! In-memory [`PortalClient`] and [`DirectoryStore`] implementations.
//!
//! Used by the engine's own tests and by embedders that keep module state in
//! memory (previews, dry runs).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use modsync_core::types::{ModuleId, ModuleIdentity, ModuleType, PortalId, ScriptRole};

use crate::directory::{AccessMode, DirectoryStore, Permission, WriteAccess};
use crate::error::{io_err, SyncError};
use crate::portal::{ModuleRecord, PortalClient};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryPortal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredModule {
    record: ModuleRecord,
    scripts: BTreeMap<ScriptRole, String>,
}

/// Portal whose modules live in a map. Every mutation bumps the version.
#[derive(Debug, Default)]
pub struct MemoryPortal {
    modules: Mutex<HashMap<ModuleIdentity, StoredModule>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a module at an explicit version.
    pub fn insert_module(&self, identity: ModuleIdentity, record: ModuleRecord) {
        lock(&self.modules).insert(
            identity,
            StoredModule {
                record,
                scripts: BTreeMap::new(),
            },
        );
    }

    /// Change one field and bump the version. Returns the new version.
    pub fn set_field(&self, identity: &ModuleIdentity, field: &str, value: Value) -> Option<u64> {
        let mut modules = lock(&self.modules);
        let module = modules.get_mut(identity)?;
        module.record.fields.insert(field.to_string(), value);
        module.record.version += 1;
        Some(module.record.version)
    }

    /// Bump the version without touching any field.
    pub fn bump_version(&self, identity: &ModuleIdentity) -> Option<u64> {
        let mut modules = lock(&self.modules);
        let module = modules.get_mut(identity)?;
        module.record.version += 1;
        Some(module.record.version)
    }

    /// Set a script body and bump the version.
    pub fn set_script(&self, identity: &ModuleIdentity, role: ScriptRole, content: &str) -> Option<u64> {
        let mut modules = lock(&self.modules);
        let module = modules.get_mut(identity)?;
        module.scripts.insert(role, content.to_string());
        module.record.version += 1;
        Some(module.record.version)
    }

    pub fn version(&self, identity: &ModuleIdentity) -> Option<u64> {
        lock(&self.modules).get(identity).map(|m| m.record.version)
    }

    /// Make every fetch fail with [`SyncError::RemoteUnreachable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches served or refused so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lookup(
        &self,
        portal: &PortalId,
        module_type: ModuleType,
        module_id: ModuleId,
    ) -> Result<StoredModule, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteUnreachable {
                portal: portal.clone(),
                reason: "portal is offline".to_string(),
            });
        }
        let identity = ModuleIdentity {
            portal_id: portal.clone(),
            module_type,
            module_id,
        };
        lock(&self.modules)
            .get(&identity)
            .cloned()
            .ok_or_else(|| SyncError::RemoteUnreachable {
                portal: portal.clone(),
                reason: format!("{module_type} {module_id} does not exist"),
            })
    }
}

impl PortalClient for MemoryPortal {
    async fn fetch_module_record(
        &self,
        portal: &PortalId,
        module_type: ModuleType,
        module_id: ModuleId,
    ) -> Result<ModuleRecord, SyncError> {
        self.lookup(portal, module_type, module_id)
            .map(|module| module.record)
    }

    async fn fetch_script_content(
        &self,
        portal: &PortalId,
        module_type: ModuleType,
        module_id: ModuleId,
        role: ScriptRole,
    ) -> Result<String, SyncError> {
        let module = self.lookup(portal, module_type, module_id)?;
        Ok(module.scripts.get(&role).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// Directory whose files live in a map, with a scriptable permission state.
#[derive(Debug)]
pub struct MemoryDirectory {
    name: String,
    files: Mutex<BTreeMap<String, String>>,
    permission: Mutex<Permission>,
    grant_on_request: AtomicBool,
    writes: AtomicUsize,
    failing: Mutex<BTreeSet<String>>,
}

impl MemoryDirectory {
    /// A directory with write permission already granted.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Mutex::new(BTreeMap::new()),
            permission: Mutex::new(Permission::Granted),
            grant_on_request: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
            failing: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make every write to `name` fail with an I/O error, or succeed again.
    pub fn fail_writes_to(&self, name: &str, failing: bool) {
        let mut set = lock(&self.failing);
        if failing {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    /// Set the current permission and whether a request will grant it.
    pub fn set_permission(&self, permission: Permission, grant_on_request: bool) {
        *lock(&self.permission) = permission;
        self.grant_on_request.store(grant_on_request, Ordering::SeqCst);
    }

    /// Edit a file as an outside program would (no capability needed).
    pub fn put_external(&self, name: &str, content: &str) {
        lock(&self.files).insert(name.to_string(), content.to_string());
    }

    pub fn remove_external(&self, name: &str) -> Option<String> {
        lock(&self.files).remove(name)
    }

    pub fn get(&self, name: &str) -> Option<String> {
        lock(&self.files).get(name).cloned()
    }

    /// Number of successful `write_file` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl DirectoryStore for MemoryDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_file(&self, name: &str) -> Result<Option<String>, SyncError> {
        Ok(self.get(name))
    }

    async fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.get(name).map(String::into_bytes))
    }

    async fn write_file(
        &self,
        access: &WriteAccess,
        name: &str,
        content: &str,
    ) -> Result<(), SyncError> {
        access.check(self)?;
        if *lock(&self.permission) != Permission::Granted {
            return Err(SyncError::PermissionDenied {
                directory: self.name.clone(),
            });
        }
        if lock(&self.failing).contains(name) {
            return Err(io_err(name, std::io::Error::other("write refused")));
        }
        lock(&self.files).insert(name.to_string(), content.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn file_exists(&self, name: &str) -> Result<bool, SyncError> {
        Ok(lock(&self.files).contains_key(name))
    }

    async fn query_permission(&self, mode: AccessMode) -> Result<Permission, SyncError> {
        if mode == AccessMode::Read {
            return Ok(Permission::Granted);
        }
        Ok(*lock(&self.permission))
    }

    async fn request_permission(&self, mode: AccessMode) -> Result<Permission, SyncError> {
        if mode == AccessMode::Read {
            return Ok(Permission::Granted);
        }
        let mut permission = lock(&self.permission);
        if *permission == Permission::Prompt {
            *permission = if self.grant_on_request.load(Ordering::SeqCst) {
                Permission::Granted
            } else {
                Permission::Denied
            };
        }
        Ok(*permission)
    }
}
