//! JSON export of fetched records

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value as JsonValue};

use super::WriteReport;
use crate::transfer::Record;

/// Write records as a pretty-printed object keyed by entity type
///
/// `{"customers": [...], "users": [...]}`
pub fn write_json(records: &[Record], path: &Path) -> Result<WriteReport> {
    let mut report = WriteReport::default();
    let mut grouped: Map<String, JsonValue> = Map::new();

    for record in records {
        let value = match serde_json::to_value(&record.fields) {
            Ok(value) => value,
            Err(e) => {
                report.warnings.push(format!(
                    "Skipped {} {} in JSON: {}",
                    record.entity_type, record.source_id, e
                ));
                continue;
            }
        };

        let bucket = grouped
            .entry(record.entity_type.key())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if let JsonValue::Array(items) = bucket {
            items.push(value);
            report.written += 1;
        }
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create JSON file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &grouped)
        .with_context(|| format!("Failed to write JSON file: {}", path.display()))?;
    writer.flush().context("Failed to flush JSON writer")?;

    log::info!("JSON file exported to: {}", path.display());
    Ok(report)
}
