//! `nc-migrate migrate`

use anyhow::{Context, Result};
use colored::*;
use dialoguer::Confirm;
use is_terminal::IsTerminal;
use log::{debug, info};

use super::{Settings, connect, resolve_jwt, selected_types, source_connection, spawn_event_printer};
use crate::api::ScopedClient;
use crate::api::permissions::PermissionLookup;
use crate::api::soap::SoapCredentials;
use crate::cli::MigrateArgs;
use crate::cli::output::print_run_summary;
use crate::config::{Config, Connection};
use crate::transfer::{Catalog, EntityClient, EntityType, MigrationEngine, MigrationRequest, RunOutcome};

pub async fn handle_migrate_command(args: MigrateArgs, settings: Settings) -> Result<()> {
    let config = &settings.config;
    let catalog = Catalog::standard();

    let source = source_connection(config, &args.connection)?;
    let destination = destination_connection(config, &args)?;

    let types = selected_types(
        &args.types,
        catalog
            .types()
            .into_iter()
            .filter(|t| catalog.is_migratable(*t)),
    );
    let ordered = catalog.ordered_types(&types);

    println!(
        "{} {} {} {}",
        "Migrate".bold(),
        format!("{} (SO {})", source.server, source.service_org_id).cyan(),
        "->".dimmed(),
        format!("{} (SO {})", destination.server, destination.service_org_id).cyan()
    );
    let labels: Vec<_> = ordered.iter().map(|t| t.label()).collect();
    println!("Types: {}", labels.join(", "));
    if args.dry_run {
        println!("{}", "Dry run: nothing will be created".yellow());
    } else if !args.yes {
        confirm_run()?;
    }

    let source_jwt = resolve_jwt(args.connection.jwt.as_deref(), &source.server)?;
    let dest_jwt = resolve_jwt(args.dest_jwt.as_deref(), &destination.server)?;

    let permissions = match &config.migration.permission_map {
        Some(path) => PermissionLookup::load(path)
            .with_context(|| format!("Failed to read permission map {}", path.display()))?,
        None => PermissionLookup::default(),
    };
    if types.contains(&EntityType::User) && destination.api_user.is_none() {
        println!(
            "{}",
            "No destination API user set, user creation may be rejected".yellow()
        );
    }

    let options = config.client_options();
    let source_client = ScopedClient::new(
        connect(&source, &source_jwt, options.clone()).await?,
        source.service_org_id,
        catalog.clone(),
    );
    let dest_client = ScopedClient::new(
        connect(&destination, &dest_jwt, options).await?,
        destination.service_org_id,
        catalog.clone(),
    )
    .with_permissions(permissions)
    .with_soap(SoapCredentials {
        username: destination.api_user.clone(),
        jwt: dest_jwt.clone(),
    });

    let request = MigrationRequest {
        selected_types: types,
        source: source_client.scope().clone(),
        destination: Some(dest_client.scope().clone()),
        dry_run: args.dry_run,
    };
    info!(
        "Starting migration of {} types from {} to {}",
        request.selected_types.len(),
        request.source,
        dest_client.scope()
    );

    let engine = MigrationEngine::new(catalog, config.engine_options());
    let (tx, printer) = spawn_event_printer();
    let run = engine.start(request, &source_client, &dest_client, Some(tx));
    tokio::pin!(run);

    let mut cancelling = false;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                println!("{}", "Cancelling after the current record...".yellow());
                engine.cancel();
            }
        }
    }
    .context("Migration could not start")?;
    let _ = printer.await;
    debug!(
        "Requests: source {:?}, destination {:?}",
        source_client.client().request_stats(),
        dest_client.client().request_stats()
    );

    print_run_summary(&result, args.dry_run);
    match result.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Partial => anyhow::bail!("{} records failed", result.failures().count()),
        RunOutcome::Cancelled => anyhow::bail!("Migration cancelled"),
        RunOutcome::Failed => anyhow::bail!(
            "Migration failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Destination from flags, falling back to the profile's destination
fn destination_connection(config: &Config, args: &MigrateArgs) -> Result<Connection> {
    if let (Some(server), Some(so)) = (&args.dest_server, args.dest_service_org) {
        return Ok(Connection {
            api_user: args.dest_api_user.clone(),
            ..Connection::new(server.clone(), so)
        });
    }

    let (name, profile) = config
        .resolve_profile(args.connection.profile.as_deref())
        .context("Pass --dest-server and --dest-service-org, or select a migration profile")?;
    let mut dest = profile.destination.clone().with_context(|| {
        format!(
            "Profile '{}' has no destination. Add one with 'nc-migrate profile add {} --dest-server ... --dest-service-org ...'",
            name, name
        )
    })?;
    if let Some(server) = &args.dest_server {
        dest.server = server.clone();
    }
    if let Some(so) = args.dest_service_org {
        dest.service_org_id = so;
    }
    if let Some(user) = &args.dest_api_user {
        dest.api_user = Some(user.clone());
    }
    Ok(dest)
}

fn confirm_run() -> Result<()> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("Refusing to migrate without confirmation. Pass --yes to proceed");
    }
    let proceed = Confirm::new()
        .with_prompt("Create missing records on the destination?")
        .default(false)
        .interact()
        .context("Failed to read confirmation")?;
    if !proceed {
        anyhow::bail!("Migration aborted");
    }
    Ok(())
}
