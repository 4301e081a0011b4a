//! `modsync portal`: the active portal connection.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use modsync_core::{settings, types::PortalId};

#[derive(Subcommand, Debug)]
pub enum PortalCommand {
    /// Make a portal the active connection.
    Use {
        /// Portal identifier.
        portal_id: String,
        /// Hostname; required the first time a portal is used.
        #[arg(long)]
        hostname: Option<String>,
    },

    /// Print the active portal.
    Show,

    /// Disconnect from the active portal.
    Clear,
}

pub fn run(command: PortalCommand) -> Result<()> {
    let mut settings = settings::load().context("failed to load modsync settings")?;
    match command {
        PortalCommand::Use {
            portal_id,
            hostname,
        } => {
            let conn = settings
                .use_portal(PortalId::from(portal_id), hostname)?
                .clone();
            settings::save(&settings).context("failed to save modsync settings")?;
            println!(
                "{} active portal '{}' ({})",
                "✓".green().bold(),
                conn.portal_id,
                conn.hostname
            );
        }
        PortalCommand::Show => match &settings.active_portal {
            Some(conn) => println!("{} ({})", conn.portal_id, conn.hostname),
            None => println!("No active portal."),
        },
        PortalCommand::Clear => {
            match settings.clear_active_portal() {
                Some(conn) => println!("Disconnected from '{}'.", conn.portal_id),
                None => println!("No active portal."),
            }
            settings::save(&settings).context("failed to save modsync settings")?;
        }
    }
    Ok(())
}
