//! Command-line interface

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::export::ExportFormat;
use crate::transfer::EntityType;

/// Export N-central configuration, or migrate it to another server
#[derive(Parser, Debug)]
#[command(name = "nc-migrate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to <config dir>/nc-migrate/config.toml)
    #[arg(long, global = true, env = "NC_MIGRATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export records from one server to CSV and/or JSON files
    Export(ExportArgs),

    /// Copy records from a source scope to a destination scope
    Migrate(MigrateArgs),

    /// Test the connection to a server
    Test(TestArgs),

    /// Manage connection profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// List the entity types and their processing order
    Types,
}

/// Where to connect when no profile is used
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Profile to use instead of the active one
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Server FQDN, overrides the profile
    #[arg(short, long)]
    pub server: Option<String>,

    /// Service organization id, overrides the profile
    #[arg(long)]
    pub service_org: Option<i64>,

    /// JWT for the source server
    #[arg(short, long, env = "NC_JWT", hide_env_values = true)]
    pub jwt: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Entity types to export, comma separated (default: all)
    #[arg(short, long, value_delimiter = ',')]
    pub types: Vec<EntityType>,

    /// Output formats, comma separated (default from settings)
    #[arg(short, long, value_delimiter = ',')]
    pub format: Vec<ExportFormat>,

    /// Output directory (default from settings)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Destination server FQDN, overrides the profile
    #[arg(long)]
    pub dest_server: Option<String>,

    /// Destination service organization id, overrides the profile
    #[arg(long)]
    pub dest_service_org: Option<i64>,

    /// JWT for the destination server
    #[arg(long, env = "NC_DEST_JWT", hide_env_values = true)]
    pub dest_jwt: Option<String>,

    /// Destination API user, needed to create users over SOAP
    #[arg(long, env = "NC_DEST_API_USER")]
    pub dest_api_user: Option<String>,

    /// Entity types to migrate, comma separated (default: all migratable)
    #[arg(short, long, value_delimiter = ',')]
    pub types: Vec<EntityType>,

    /// Match and report without creating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Test the profile's destination instead of its source
    #[arg(long)]
    pub destination: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// List saved profiles
    List,

    /// Add or replace a profile
    Add {
        name: String,
        /// Source server FQDN
        #[arg(short, long)]
        server: String,
        /// Source service organization id
        #[arg(long)]
        service_org: i64,
        /// Destination server FQDN, for migration profiles
        #[arg(long, requires = "dest_service_org")]
        dest_server: Option<String>,
        /// Destination service organization id
        #[arg(long, requires = "dest_server")]
        dest_service_org: Option<i64>,
        /// Destination API user, for creating users over SOAP
        #[arg(long, requires = "dest_server")]
        dest_api_user: Option<String>,
        /// Make this the active profile
        #[arg(long)]
        activate: bool,
    },

    /// Delete a profile
    Remove { name: String },

    /// Set the active profile
    Use { name: String },
}
