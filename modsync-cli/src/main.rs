//! modsync: inspect mirrored portal module directories.
//!
//! # Usage
//!
//! ```text
//! modsync status <dir> [--json]
//! modsync binding <dir>
//! modsync draft <dir> [--json]
//! modsync portal use <portal-id> [--hostname <host>]
//! modsync portal show
//! modsync portal clear
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    binding::BindingArgs, draft::DraftArgs, portal::PortalCommand, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "modsync",
    version,
    about = "Keep portal modules and their local directories in sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show script drift and descriptor health for a module directory.
    Status(StatusArgs),

    /// Check the directory's portal binding against the active portal.
    Binding(BindingArgs),

    /// Show persisted field edits that differ from the portal baseline.
    Draft(DraftArgs),

    /// Manage the active portal connection.
    Portal {
        #[command(subcommand)]
        command: PortalCommand,
    },
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Status(args) => args.run().await,
        Commands::Binding(args) => args.run().await,
        Commands::Draft(args) => args.run().await,
        Commands::Portal { command } => commands::portal::run(command),
    }
}
