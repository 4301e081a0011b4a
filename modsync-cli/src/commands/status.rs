//! `modsync status`: script drift and descriptor health.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use modsync_engine::{scan_directory, DirectoryReport, MetadataHealth, ScriptState};

use super::open_directory;

/// Arguments for `modsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Module directory containing `module.json`.
    pub dir: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ScriptRow {
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "checksum")]
    checksum: String,
}

impl StatusArgs {
    pub async fn run(self) -> Result<()> {
        let dir = open_directory(&self.dir)?;
        let report = scan_directory(&dir, None)
            .await
            .with_context(|| format!("failed to scan '{}'", self.dir.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(&report);
        Ok(())
    }
}

fn print_table(report: &DirectoryReport) {
    let module = report
        .binding
        .as_ref()
        .map(|b| format!("{} ({})", b.module_name, b.identity()))
        .unwrap_or_else(|| "unknown module".to_string());
    println!(
        "modsync v{} | {} | module.json {}",
        env!("CARGO_PKG_VERSION"),
        module,
        metadata_label(&report.metadata),
    );

    if report.scripts.is_empty() {
        println!("No scripts recorded.");
        return;
    }

    let rows: Vec<ScriptRow> = report
        .scripts
        .iter()
        .map(|status| ScriptRow {
            role: status.role.to_string(),
            file: status.file_name.clone(),
            state: state_label(status.state),
            checksum: status
                .checksum
                .as_ref()
                .map(|c| c.0.chars().take(12).collect())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.has_modified_scripts() {
        println!("Modified scripts differ from the last export; re-export to discard local edits.");
    }
}

fn metadata_label(health: &MetadataHealth) -> String {
    match health {
        MetadataHealth::Ok => "ok".green().to_string(),
        MetadataHealth::Missing => "missing".yellow().to_string(),
        MetadataHealth::Corrupt { reason } => format!("{} ({reason})", "corrupt".red().bold()),
    }
}

fn state_label(state: ScriptState) -> String {
    match state {
        ScriptState::Present => "PRESENT".green().to_string(),
        ScriptState::Modified => "MODIFIED".red().bold().to_string(),
        ScriptState::Missing => "MISSING".bright_black().to_string(),
    }
}
