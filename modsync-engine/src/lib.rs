//! # modsync-engine
//!
//! Keeps a portal module, its shared in-memory draft and its mirrored
//! directory consistent.
//!
//! - [`drafts`]: one draft per module with field-level dirty tracking
//! - [`conflict`]: remote-version conflict detection and resolution
//! - [`binding`]: the portal-binding guard, sessions and views
//! - [`coordinator`]: `module.json` and script files on disk
//! - [`workspace`]: open views tied together over one portal client

pub mod binding;
pub mod checksum;
pub mod conflict;
pub mod coordinator;
pub mod directory;
pub mod drafts;
pub mod error;
pub mod events;
pub mod fields;
pub mod memory;
pub mod portal;
pub mod workspace;

pub use binding::{resolve_binding, BindingStatus, PortalSession, View, ViewId};
pub use checksum::{fingerprint, fingerprint_bytes};
pub use conflict::{check_for_conflict, resolve_conflict, ConflictState, Resolution};
pub use coordinator::{
    compute_script_status, diff_script, export_module, load_descriptor, persist_details,
    pull_details, re_export_script, restore_local_draft, scan_directory, DirectoryReport,
    MetadataHealth, PersistOutcome, ScriptExport, ScriptState, ScriptStatus, DESCRIPTOR_FILE,
};
pub use directory::{ensure_write_access, AccessMode, DirectoryStore, FsDirectory, Permission, WriteAccess};
pub use drafts::{DraftManager, ModuleDetailsDraft};
pub use error::SyncError;
pub use events::{EngineEvent, EventBus};
pub use fields::{FieldRegistry, FieldRule};
pub use memory::{MemoryDirectory, MemoryPortal};
pub use portal::{ModuleRecord, PortalClient};
pub use workspace::{FocusOutcome, Workspace};
