use anyhow::Result;
use clap::Parser;
use log::debug;

mod api;
mod cli;
mod config;
mod export;
mod transfer;

use cli::commands::{self, export::handle_export_command, migrate::handle_migrate_command};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("nc-migrate {} starting", env!("CARGO_PKG_VERSION"));

    let settings = commands::load_settings(cli.config.as_deref())?;
    match cli.command {
        Commands::Export(args) => handle_export_command(args, settings).await,
        Commands::Migrate(args) => handle_migrate_command(args, settings).await,
        Commands::Test(args) => commands::test::handle_test_command(args, settings).await,
        Commands::Profile { command } => {
            commands::profile::handle_profile_command(command, settings)
        }
        Commands::Types => commands::types::handle_types_command(),
    }
}

/// Warnings by default, debug output for this crate with `--verbose`.
/// `RUST_LOG` takes precedence over both.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "warn,nc_migrate=debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}
