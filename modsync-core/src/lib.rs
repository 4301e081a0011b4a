//! modsync core library: domain types, `module.json` model, user settings.
//!
//! - [`types`]: bindings, identities, script descriptors, `module.json`
//! - [`settings`]: `~/.modsync/config.yaml` load / save
//! - [`error`]: [`ConfigError`]

pub mod error;
pub mod settings;
pub mod types;

pub use error::ConfigError;
pub use settings::Settings;
pub use types::{
    Checksum, ExecutionContext, FieldMap, ModuleBinding, ModuleDetails, ModuleDirectoryConfig,
    ModuleId, ModuleIdentity, ModuleType, PortalConnection, PortalId, ScriptDescriptor,
    ScriptRole,
};
