//! Export of one server scope to local CSV/JSON files
//!
//! Shares the paged fetch of the migration engine but never touches a
//! destination: records are written exactly as the server returned them.

pub mod csv;
pub mod json;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::transfer::{
    CancelFlag, Catalog, EntityClient, EntityType, ProgressReporter, Record, RunEvent, RunOutcome,
    fetch_all, percent,
};

pub use self::csv::write_csv;
pub use self::json::write_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{}' (expected csv or json)", other)),
        }
    }
}

/// Result of writing one file
#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub selected_types: BTreeSet<EntityType>,
    pub formats: BTreeSet<ExportFormat>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub outcome: RunOutcome,
    pub counts: BTreeMap<EntityType, usize>,
    pub files: Vec<ExportedFile>,
    pub warnings: Vec<String>,
}

impl ExportResult {
    pub fn total_records(&self) -> usize {
        self.counts.values().sum()
    }
}

pub struct ExportEngine {
    catalog: Catalog,
    cancel: CancelFlag,
}

impl ExportEngine {
    pub fn new(catalog: Catalog) -> Self {
        ExportEngine {
            catalog,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Fetch every selected type and write one file per format
    ///
    /// A type whose listing fails is reported as a warning and left out, the
    /// run then ends `Partial`. When cancelled, nothing is written.
    pub async fn run(
        &self,
        request: ExportRequest,
        client: &dyn EntityClient,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<ExportResult> {
        if let Err(e) = client.scope().validate() {
            anyhow::bail!("Invalid export scope: {}", e);
        }
        if request.formats.is_empty() {
            anyhow::bail!("No export format selected");
        }

        self.cancel.reset();
        let reporter = ProgressReporter::new(events);
        let ordered = self.catalog.ordered_types(&request.selected_types);
        let mut result = ExportResult {
            outcome: RunOutcome::Completed,
            counts: BTreeMap::new(),
            files: Vec::new(),
            warnings: Vec::new(),
        };

        if ordered.is_empty() {
            reporter.info("No entity types selected, nothing to export");
            return Ok(result);
        }

        let mut records: Vec<Record> = Vec::new();
        for (index, entity_type) in ordered.iter().enumerate() {
            reporter.progress(
                "Discovery",
                format!("Fetching {}", entity_type.label()),
                percent(index, ordered.len()),
                index,
                ordered.len(),
            );

            match fetch_all(client, *entity_type, &self.cancel).await {
                Ok(Some(fetched)) => {
                    reporter.info(format!("Fetched {} {}", fetched.len(), entity_type.label()));
                    result.counts.insert(*entity_type, fetched.len());
                    records.extend(fetched);
                }
                Ok(None) => {
                    reporter.warn("Export cancelled, no files written");
                    result.outcome = RunOutcome::Cancelled;
                    return Ok(result);
                }
                Err(e) => {
                    let warning = format!("Failed to fetch {}: {}", entity_type.label(), e);
                    reporter.warn(warning.clone());
                    result.warnings.push(warning);
                }
            }
        }

        std::fs::create_dir_all(&request.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                request.output_dir.display()
            )
        })?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        for format in &request.formats {
            let path = export_path(&request.output_dir, &stamp, *format);
            reporter.progress(
                "Writing",
                format!("Writing {}", path.display()),
                100.0,
                records.len(),
                records.len(),
            );

            let report = match format {
                ExportFormat::Csv => write_csv(&records, &path)?,
                ExportFormat::Json => write_json(&records, &path)?,
            };
            for warning in &report.warnings {
                reporter.warn(warning.clone());
            }
            result.warnings.extend(report.warnings);
            result.files.push(ExportedFile {
                format: *format,
                path,
                records: report.written,
            });
        }

        if result.warnings.is_empty() {
            reporter.info(format!(
                "Export finished: {} records in {} files",
                result.total_records(),
                result.files.len()
            ));
        } else {
            result.outcome = RunOutcome::Partial;
            reporter.warn(format!(
                "Export finished with {} warnings: {} records in {} files",
                result.warnings.len(),
                result.total_records(),
                result.files.len()
            ));
        }
        Ok(result)
    }
}

fn export_path(dir: &Path, stamp: &str, format: ExportFormat) -> PathBuf {
    dir.join(format!("nc_export_{}.{}", stamp, format.extension()))
}
