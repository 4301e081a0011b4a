//! Domain types shared by the engine and the CLI.
//!
//! Everything that lands in `module.json` is defined here and serialized with
//! camelCase keys. Engine-only runtime state (drafts, conflicts) lives in
//! `modsync-engine`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Managed field values keyed by field name.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a portal (the remote store a module belongs to).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalId(pub String);

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PortalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PortalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Numeric identifier of a module inside its portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for ModuleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Content fingerprint (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Checksum {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of module a portal hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Datasource,
    ConfigSource,
    PropertySource,
    EventSource,
    LogSource,
    TopologySource,
    DiagnosticSource,
}

impl ModuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleType::Datasource => "datasource",
            ModuleType::ConfigSource => "configsource",
            ModuleType::PropertySource => "propertysource",
            ModuleType::EventSource => "eventsource",
            ModuleType::LogSource => "logsource",
            ModuleType::TopologySource => "topologysource",
            ModuleType::DiagnosticSource => "diagnosticsource",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a script plays inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptRole {
    Collection,
    Discovery,
}

impl ScriptRole {
    pub fn all() -> &'static [ScriptRole] {
        &[ScriptRole::Collection, ScriptRole::Discovery]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptRole::Collection => "collection",
            ScriptRole::Discovery => "discovery",
        }
    }

    /// Default file name for this role when no descriptor names one.
    pub fn default_file_name(self, language: &str) -> String {
        format!("{}.{}", self.as_str(), extension_for_language(language))
    }
}

impl fmt::Display for ScriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_LANGUAGE: &str = "groovy";
pub const DEFAULT_MODE: &str = "embed";

/// Script languages a portal module may use.
pub const SCRIPT_LANGUAGES: &[&str] = &["groovy", "powershell", "python", "batch"];

/// File extension used for a script language.
pub fn extension_for_language(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "groovy" => "groovy",
        "powershell" => "ps1",
        "python" => "py",
        "batch" => "bat",
        _ => "txt",
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Key of a module's shared draft: `(portalId, moduleType, moduleId)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleIdentity {
    pub portal_id: PortalId,
    pub module_type: ModuleType,
    pub module_id: ModuleId,
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.portal_id, self.module_type, self.module_id)
    }
}

/// The remote record a view or directory is attached to.
///
/// Never mutated after creation; only compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBinding {
    pub portal_id: PortalId,
    pub portal_hostname: String,
    pub module_id: ModuleId,
    pub module_type: ModuleType,
    pub module_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_id: Option<String>,
}

impl ModuleBinding {
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity {
            portal_id: self.portal_id.clone(),
            module_type: self.module_type,
            module_id: self.module_id,
        }
    }
}

/// A portal the user can be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConnection {
    pub portal_id: PortalId,
    pub hostname: String,
}

/// Collector / host a view executes scripts against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

// ---------------------------------------------------------------------------
// module.json
// ---------------------------------------------------------------------------

/// On-disk record of one script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDescriptor {
    pub file_name: String,
    pub language: String,
    pub mode: String,
    /// Fingerprint of the content as last pulled from the portal.
    pub portal_checksum: Checksum,
    /// Fingerprint of the content as last written to disk.
    pub disk_checksum: Checksum,
}

impl ScriptDescriptor {
    /// True when the last disk write matched the last portal pull.
    pub fn in_sync_with_portal(&self) -> bool {
        self.disk_checksum == self.portal_checksum
    }
}

/// Persisted metadata: the portal baseline and the local draft side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetails {
    pub portal_version: u64,
    pub last_pulled_at: DateTime<Utc>,
    #[serde(default)]
    pub portal_baseline: FieldMap,
    #[serde(default)]
    pub local_draft: FieldMap,
}

/// Root of `module.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDirectoryConfig {
    pub portal_binding: ModuleBinding,
    #[serde(default)]
    pub scripts: BTreeMap<ScriptRole, ScriptDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_details: Option<ModuleDetails>,
}

impl ModuleDirectoryConfig {
    pub fn new(portal_binding: ModuleBinding) -> Self {
        Self {
            portal_binding,
            scripts: BTreeMap::new(),
            module_details: None,
        }
    }

    /// Parse `module.json` text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Render `module.json` text (pretty, trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Role that already uses `file_name`, other than `except`.
    pub fn role_using_file(&self, file_name: &str, except: ScriptRole) -> Option<ScriptRole> {
        self.scripts
            .iter()
            .find(|(role, desc)| **role != except && desc.file_name == file_name)
            .map(|(role, _)| *role)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
