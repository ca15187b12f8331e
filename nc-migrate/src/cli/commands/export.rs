//! `nc-migrate export`

use anyhow::{Context, Result};
use colored::*;
use log::{debug, info};

use super::{Settings, connect, resolve_jwt, selected_types, source_connection, spawn_event_printer};
use crate::api::ScopedClient;
use crate::cli::ExportArgs;
use crate::cli::output::print_export_summary;
use crate::export::{ExportEngine, ExportRequest};
use crate::transfer::{Catalog, EntityType, RunOutcome};

pub async fn handle_export_command(args: ExportArgs, settings: Settings) -> Result<()> {
    let config = &settings.config;
    let catalog = Catalog::standard();

    let source = source_connection(config, &args.connection)?;
    let jwt = resolve_jwt(args.connection.jwt.as_deref(), &source.server)?;
    let client = connect(&source, &jwt, config.client_options()).await?;
    let scoped = ScopedClient::new(client, source.service_org_id, catalog.clone());

    // device properties are fetched per device, so they are opt-in
    let types = selected_types(
        &args.types,
        catalog
            .types()
            .into_iter()
            .filter(|t| *t != EntityType::DeviceProperty),
    );
    let formats = if args.format.is_empty() {
        config.export_formats()
    } else {
        args.format.iter().copied().collect()
    };
    let output_dir = args
        .output
        .unwrap_or_else(|| config.export.output_dir.clone());

    let request = ExportRequest {
        selected_types: types,
        formats,
        output_dir,
    };
    info!(
        "Exporting {} types from {} to {}",
        request.selected_types.len(),
        source.server,
        request.output_dir.display()
    );

    let engine = ExportEngine::new(catalog);
    let (tx, printer) = spawn_event_printer();
    let run = engine.run(request, &scoped, Some(tx));
    tokio::pin!(run);

    let mut cancelling = false;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                println!("{}", "Cancelling, waiting for the current request...".yellow());
                engine.cancel();
            }
        }
    }
    .context("Export failed")?;
    let _ = printer.await;
    debug!("Requests: {:?}", scoped.client().request_stats());

    print_export_summary(&result);
    match result.outcome {
        RunOutcome::Cancelled => anyhow::bail!("Export cancelled"),
        RunOutcome::Partial => anyhow::bail!(
            "Export finished with {} warnings",
            result.warnings.len()
        ),
        _ => Ok(()),
    }
}
