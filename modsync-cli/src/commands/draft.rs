//! `modsync draft`: persisted local field edits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use modsync_engine::{load_descriptor, FieldRegistry};

use super::open_directory;

/// Arguments for `modsync draft`.
#[derive(Args, Debug)]
pub struct DraftArgs {
    /// Module directory containing `module.json`.
    pub dir: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftJson {
    portal_version: Option<u64>,
    last_pulled_at: Option<String>,
    fields: Vec<FieldJson>,
}

#[derive(Serialize)]
struct FieldJson {
    field: String,
    portal: Value,
    local: Value,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "field")]
    field: String,
    #[tabled(rename = "portal")]
    portal: String,
    #[tabled(rename = "local")]
    local: String,
}

impl DraftArgs {
    pub async fn run(self) -> Result<()> {
        let dir = open_directory(&self.dir)?;
        let config = load_descriptor(&dir)
            .await
            .with_context(|| format!("failed to read module.json in '{}'", self.dir.display()))?;

        let registry = FieldRegistry::standard();
        let payload = match &config.module_details {
            None => DraftJson {
                portal_version: None,
                last_pulled_at: None,
                fields: Vec::new(),
            },
            Some(details) => DraftJson {
                portal_version: Some(details.portal_version),
                last_pulled_at: Some(details.last_pulled_at.to_rfc3339()),
                fields: registry
                    .changed_fields(&details.portal_baseline, &details.local_draft)
                    .into_iter()
                    .map(|field| FieldJson {
                        portal: details
                            .portal_baseline
                            .get(&field)
                            .cloned()
                            .unwrap_or(Value::Null),
                        local: details.local_draft.get(&field).cloned().unwrap_or(Value::Null),
                        field,
                    })
                    .collect(),
            },
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize draft JSON")?
            );
            return Ok(());
        }

        let Some(version) = payload.portal_version else {
            println!("No module details stored for {}.", config.portal_binding.module_name);
            return Ok(());
        };
        println!(
            "{} | portal version {version} | pulled {}",
            config.portal_binding.module_name,
            payload.last_pulled_at.as_deref().unwrap_or("-"),
        );
        if payload.fields.is_empty() {
            println!("No local edits.");
            return Ok(());
        }
        let rows: Vec<FieldRow> = payload
            .fields
            .into_iter()
            .map(|f| FieldRow {
                field: f.field,
                portal: f.portal.to_string(),
                local: f.local.to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
