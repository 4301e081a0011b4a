//! Scoped access to a user-granted directory.
//!
//! Reads go straight through the [`DirectoryStore`]. Writes require a
//! [`WriteAccess`] capability, which only [`ensure_write_access`] hands out
//! after querying (and if needed requesting) permission. A write path obtains
//! it once and threads it through every write of that operation.
//!
//! [`FsDirectory`] is the filesystem implementation. Files are written to a
//! `.modsync.tmp` sibling and renamed into place, so a file is either fully
//! written or left untouched.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

/// Answer to a permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    /// Not yet decided; a request may be granted.
    Prompt,
    Denied,
}

/// Access level a permission query or request is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// Proof that write permission was granted for one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAccess {
    directory: String,
}

impl WriteAccess {
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Fails unless this capability was issued for `store`.
    pub fn check<D: DirectoryStore + ?Sized>(&self, store: &D) -> Result<(), SyncError> {
        if self.directory == store.name() {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied {
                directory: store.name().to_string(),
            })
        }
    }
}

/// A directory the engine may read and, with a capability, write.
pub trait DirectoryStore: Send + Sync {
    /// Human-readable directory name used in errors and events.
    fn name(&self) -> &str;

    /// Read a text file; `None` when it does not exist.
    fn read_file(&self, name: &str) -> impl Future<Output = Result<Option<String>, SyncError>> + Send;

    /// Read a file's raw bytes, whatever its encoding; `None` when it does
    /// not exist.
    fn read_bytes(&self, name: &str) -> impl Future<Output = Result<Option<Vec<u8>>, SyncError>> + Send;

    /// Write a text file in full.
    fn write_file(
        &self,
        access: &WriteAccess,
        name: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn file_exists(&self, name: &str) -> impl Future<Output = Result<bool, SyncError>> + Send;

    fn query_permission(
        &self,
        mode: AccessMode,
    ) -> impl Future<Output = Result<Permission, SyncError>> + Send;

    /// Ask for permission. Never answers [`Permission::Prompt`].
    fn request_permission(
        &self,
        mode: AccessMode,
    ) -> impl Future<Output = Result<Permission, SyncError>> + Send;
}

/// Query write permission and request it when not yet granted.
pub async fn ensure_write_access<D: DirectoryStore + ?Sized>(
    store: &D,
) -> Result<WriteAccess, SyncError> {
    let mut permission = store.query_permission(AccessMode::ReadWrite).await?;
    if permission != Permission::Granted {
        tracing::debug!(directory = store.name(), "requesting write permission");
        permission = store.request_permission(AccessMode::ReadWrite).await?;
    }
    match permission {
        Permission::Granted => Ok(WriteAccess {
            directory: store.name().to_string(),
        }),
        Permission::Prompt | Permission::Denied => {
            tracing::warn!(directory = store.name(), "write permission denied");
            Err(SyncError::PermissionDenied {
                directory: store.name().to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// FsDirectory
// ---------------------------------------------------------------------------

/// [`DirectoryStore`] over a local filesystem directory.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
    name: String,
}

impl FsDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root.display().to_string();
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` inside the root; path separators and `..` are refused.
    fn path_of(&self, name: &str) -> Result<PathBuf, SyncError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(SyncError::NotFound {
                directory: self.name.clone(),
                what: format!("file '{name}'"),
            });
        }
        Ok(self.root.join(name))
    }

    fn map_io(&self, path: &Path, err: std::io::Error) -> SyncError {
        if err.kind() == ErrorKind::PermissionDenied {
            SyncError::PermissionDenied {
                directory: self.name.clone(),
            }
        } else {
            io_err(path, err)
        }
    }

    async fn root_permission(&self, mode: AccessMode) -> Result<Permission, SyncError> {
        let meta = match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SyncError::NotFound {
                    directory: self.name.clone(),
                    what: "directory".to_string(),
                })
            }
            Err(err) => return Err(self.map_io(&self.root, err)),
        };
        if !meta.is_dir() {
            return Err(SyncError::NotFound {
                directory: self.name.clone(),
                what: "directory".to_string(),
            });
        }
        if mode == AccessMode::ReadWrite && meta.permissions().readonly() {
            return Ok(Permission::Denied);
        }
        Ok(Permission::Granted)
    }
}

impl DirectoryStore for FsDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_file(&self, name: &str) -> Result<Option<String>, SyncError> {
        let path = self.path_of(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.map_io(&path, err)),
        }
    }

    async fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.path_of(name)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.map_io(&path, err)),
        }
    }

    async fn write_file(
        &self,
        access: &WriteAccess,
        name: &str,
        content: &str,
    ) -> Result<(), SyncError> {
        access.check(self)?;
        let path = self.path_of(name)?;
        let tmp = self.root.join(format!("{name}.modsync.tmp"));

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.map_io(&tmp, e))?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.map_io(&path, err));
        }
        tracing::debug!("wrote: {}", path.display());
        Ok(())
    }

    async fn file_exists(&self, name: &str) -> Result<bool, SyncError> {
        let path = self.path_of(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.map_io(&path, err)),
        }
    }

    async fn query_permission(&self, mode: AccessMode) -> Result<Permission, SyncError> {
        self.root_permission(mode).await
    }

    // A filesystem cannot prompt; the request reports the current state.
    async fn request_permission(&self, mode: AccessMode) -> Result<Permission, SyncError> {
        self.root_permission(mode).await
    }
}
