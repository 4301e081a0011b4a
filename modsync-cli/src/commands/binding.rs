//! `modsync binding`: is the directory's portal the active one?

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use modsync_core::settings;
use modsync_engine::{load_descriptor, resolve_binding, PortalSession};

use super::open_directory;

/// Arguments for `modsync binding`.
#[derive(Args, Debug)]
pub struct BindingArgs {
    /// Module directory containing `module.json`.
    pub dir: PathBuf,
}

impl BindingArgs {
    pub async fn run(self) -> Result<()> {
        let settings = settings::load().context("failed to load modsync settings")?;
        let session = PortalSession::from_settings(&settings);
        let dir = open_directory(&self.dir)?;
        let config = load_descriptor(&dir)
            .await
            .with_context(|| format!("failed to read module.json in '{}'", self.dir.display()))?;

        let binding = &config.portal_binding;
        println!(
            "{} {} bound to portal '{}' ({})",
            binding.module_type,
            binding.module_name.bold(),
            binding.portal_id,
            binding.portal_hostname,
        );

        let status = resolve_binding(binding, session.active());
        if status.is_active {
            println!("{}", "active".green().bold());
            return Ok(());
        }
        let reason = status.reason.unwrap_or_default();
        println!("{} {reason}", "inactive:".yellow().bold());
        bail!("binding is inactive; run `modsync portal use {}`", binding.portal_id)
    }
}
