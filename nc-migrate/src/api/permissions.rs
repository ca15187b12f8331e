//! Role permission names to permission ids
//!
//! Role listings report permissions by name while the create endpoint wants
//! ids. The table is a two-column CSV, `permissionName,permissionId`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value as JsonValue};

use crate::transfer::id_to_string;

/// Sent when nothing else maps (view active issues)
pub const FALLBACK_PERMISSION_ID: i64 = 1701;

#[derive(Debug, Clone, Default)]
pub struct PermissionLookup {
    by_name: HashMap<String, i64>,
}

impl PermissionLookup {
    pub fn load(path: &Path) -> Result<Self, csv::Error> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut by_name = HashMap::new();
        for row in rdr.records() {
            let row = row?;
            let (Some(name), Some(id)) = (row.get(0), row.get(1)) else {
                continue;
            };
            match id.parse::<i64>() {
                Ok(id) if !name.is_empty() => {
                    by_name.insert(name.to_lowercase(), id);
                }
                _ => log::debug!("Skipping permission row '{}', '{}'", name, id),
            }
        }
        log::debug!("Loaded {} permission ids", by_name.len());
        Ok(PermissionLookup { by_name })
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Ids for the names that are known, in input order without repeats
    pub fn ids_for(&self, names: &[String]) -> Vec<i64> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match self.by_name.get(&name.trim().to_lowercase()) {
                Some(id) if !ids.contains(id) => ids.push(*id),
                Some(_) => {}
                None => log::warn!("No permission id known for '{}'", name),
            }
        }
        ids
    }

    /// Set `permissionIds` on a role create body
    ///
    /// Permission names are translated when the table knows them, otherwise
    /// ids already on the record are kept. A role never goes out without a
    /// permission, it falls back to [`FALLBACK_PERMISSION_ID`].
    pub fn apply(&self, payload: &mut Map<String, JsonValue>) {
        let names = permission_names(payload.remove("permissions").as_ref());
        let mut ids = if self.is_empty() { Vec::new() } else { self.ids_for(&names) };

        if ids.is_empty() {
            ids = payload
                .get("permissionIds")
                .and_then(JsonValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| id_to_string(v).and_then(|s| s.parse().ok()))
                        .collect()
                })
                .unwrap_or_default();
        }
        if ids.is_empty() {
            log::warn!(
                "Role '{}' has no mappable permissions, using {}",
                payload
                    .get("roleName")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("?"),
                FALLBACK_PERMISSION_ID
            );
            ids.push(FALLBACK_PERMISSION_ID);
        }

        payload.insert(
            "permissionIds".to_string(),
            JsonValue::Array(ids.into_iter().map(JsonValue::from).collect()),
        );
    }
}

/// Permission names from a `permissions` field of strings or named objects
fn permission_names(value: Option<&JsonValue>) -> Vec<String> {
    let Some(JsonValue::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Object(map) => ["permissionName", "name"]
                .iter()
                .find_map(|f| map.get(*f).and_then(JsonValue::as_str))
                .map(str::to_string),
            _ => None,
        })
        .filter(|name| !name.trim().is_empty())
        .collect()
}
