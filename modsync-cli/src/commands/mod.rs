pub mod binding;
pub mod draft;
pub mod portal;
pub mod status;

use std::path::Path;

use anyhow::{bail, Result};

use modsync_engine::FsDirectory;

/// Open `path` as a module directory, failing early when it is not one.
pub(crate) fn open_directory(path: &Path) -> Result<FsDirectory> {
    if !path.is_dir() {
        bail!("'{}' is not a directory", path.display());
    }
    tracing::debug!(path = %path.display(), "opening module directory");
    Ok(FsDirectory::new(path))
}
