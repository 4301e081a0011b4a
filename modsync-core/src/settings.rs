//! User settings: known portals, the active connection, script defaults.
//!
//! # Storage layout
//!
//! ```text
//! ~/.modsync/
//!   config.yaml   (mode 0600, directory mode 0700)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{PortalConnection, PortalId, DEFAULT_LANGUAGE, DEFAULT_MODE};

pub const SETTINGS_VERSION: u32 = 1;

/// Root of `~/.modsync/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: u32,
    /// The portal the user is currently connected to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_portal: Option<PortalConnection>,
    #[serde(default)]
    pub known_portals: Vec<PortalConnection>,
    /// Language recorded for scripts exported without an explicit one.
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_mode")]
    pub default_mode: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            active_portal: None,
            known_portals: Vec::new(),
            default_language: default_language(),
            default_mode: default_mode(),
        }
    }
}

impl Settings {
    /// Make `portal_id` the active connection, registering it when new.
    ///
    /// `hostname` is required the first time a portal is seen.
    pub fn use_portal(
        &mut self,
        portal_id: PortalId,
        hostname: Option<String>,
    ) -> Result<&PortalConnection, ConfigError> {
        let known = self
            .known_portals
            .iter()
            .position(|p| p.portal_id == portal_id);
        let connection = match (known, hostname) {
            (Some(index), Some(hostname)) => {
                self.known_portals[index].hostname = hostname;
                self.known_portals[index].clone()
            }
            (Some(index), None) => self.known_portals[index].clone(),
            (None, Some(hostname)) => {
                let connection = PortalConnection {
                    portal_id,
                    hostname,
                };
                self.known_portals.push(connection.clone());
                connection
            }
            (None, None) => {
                return Err(ConfigError::UnknownPortal {
                    portal: portal_id.0,
                })
            }
        };
        Ok(self.active_portal.insert(connection))
    }

    pub fn clear_active_portal(&mut self) -> Option<PortalConnection> {
        self.active_portal.take()
    }
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

// ---------------------------------------------------------------------------
// 1. Paths
// ---------------------------------------------------------------------------

/// `<home>/.modsync/`
pub fn settings_dir_at(home: &Path) -> PathBuf {
    home.join(".modsync")
}

/// `<home>/.modsync/config.yaml`: pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    settings_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.modsync/config.yaml`.
///
/// A missing file yields [`Settings::default`]; malformed YAML yields
/// [`ConfigError::Parse`] with the file path.
pub fn load_at(home: &Path) -> Result<Settings, ConfigError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save settings to `<home>/.modsync/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let dir = settings_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = settings_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(settings: &Settings) -> Result<(), ConfigError> {
    save_at(&home()?, settings)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
