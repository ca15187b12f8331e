//! CSV export of fetched records
//!
//! All entity types share one file. The header is `entityType`, `sourceId`
//! and then every top-level field seen in any record, in first-seen order.

use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;
use serde_json::Value as JsonValue;

use super::WriteReport;
use crate::transfer::Record;

const FIXED_COLUMNS: [&str; 2] = ["entityType", "sourceId"];

/// Write records to a CSV file
pub fn write_csv(records: &[Record], path: &Path) -> Result<WriteReport> {
    let columns = collect_columns(records);
    let mut report = WriteReport::default();

    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    let header: Vec<&str> = FIXED_COLUMNS
        .iter()
        .copied()
        .chain(columns.iter().map(String::as_str))
        .collect();
    wtr.write_record(&header)
        .context("Failed to write CSV header")?;

    for record in records {
        match render_row(record, &columns) {
            Ok(row) => {
                wtr.write_record(&row).with_context(|| {
                    format!("Failed to write {} {}", record.entity_type, record.source_id)
                })?;
                report.written += 1;
            }
            Err(e) => report.warnings.push(format!(
                "Skipped {} {} in CSV: {}",
                record.entity_type, record.source_id, e
            )),
        }
    }

    wtr.flush().context("Failed to flush CSV writer")?;

    log::info!("CSV file exported to: {}", path.display());
    Ok(report)
}

/// Union of field names in first-seen order
fn collect_columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.fields.keys() {
            if FIXED_COLUMNS.contains(&key.as_str()) || columns.contains(key) {
                continue;
            }
            columns.push(key.clone());
        }
    }
    columns
}

fn render_row(record: &Record, columns: &[String]) -> Result<Vec<String>, serde_json::Error> {
    let mut row = Vec::with_capacity(columns.len() + FIXED_COLUMNS.len());
    row.push(record.entity_type.key().to_string());
    row.push(record.source_id.clone());
    for column in columns {
        row.push(match record.fields.get(column) {
            Some(value) => render_cell(value)?,
            None => String::new(),
        });
    }
    Ok(row)
}

fn render_cell(value: &JsonValue) -> Result<String, serde_json::Error> {
    Ok(match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Array(items) if items.iter().all(is_scalar) => items
            .iter()
            .map(render_cell)
            .collect::<Result<Vec<_>, _>>()?
            .join("; "),
        nested => serde_json::to_string(nested)?,
    })
}

fn is_scalar(value: &JsonValue) -> bool {
    !matches!(value, JsonValue::Array(_) | JsonValue::Object(_))
}
