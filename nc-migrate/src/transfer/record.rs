//! Opaque entity records as returned by the N-central API

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use super::catalog::{Catalog, EntityType};

/// One entity fetched from a server
///
/// Fields are kept as the raw JSON object so unknown attributes survive a
/// migration untouched. Only the fields named in the catalog are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub entity_type: EntityType,
    pub source_id: String,
    pub fields: Map<String, JsonValue>,
}

impl Record {
    pub fn new(entity_type: EntityType, source_id: impl Into<String>, fields: Map<String, JsonValue>) -> Self {
        Record {
            entity_type,
            source_id: source_id.into(),
            fields,
        }
    }

    /// Build a record from an API object, reading its id from the catalog's id fields
    ///
    /// Returns `None` for non-objects and for objects without a usable id.
    pub fn from_json(catalog: &Catalog, entity_type: EntityType, value: JsonValue) -> Option<Self> {
        let JsonValue::Object(fields) = value else {
            return None;
        };
        let descriptor = catalog.descriptor(entity_type);
        let source_id = descriptor
            .id_fields
            .iter()
            .find_map(|f| fields.get(*f).and_then(id_to_string))
            .or_else(|| fields.get("id").and_then(id_to_string))?;
        Some(Record::new(entity_type, source_id, fields))
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Name shown to the user, falls back to the id
    pub fn display_name(&self, catalog: &Catalog) -> String {
        let descriptor = catalog.descriptor(self.entity_type);
        match self.fields.get(descriptor.name_field) {
            Some(JsonValue::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => format!("{} {}", self.entity_type, self.source_id),
        }
    }

    /// Body for a create request: the fields minus ids and server-managed attributes
    pub fn create_payload(&self, catalog: &Catalog) -> Map<String, JsonValue> {
        let descriptor = catalog.descriptor(self.entity_type);
        self.fields
            .iter()
            .filter(|(k, _)| {
                !descriptor.id_fields.contains(&k.as_str())
                    && !descriptor.strip_on_create.contains(&k.as_str())
                    && k.as_str() != "id"
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Render an identifier value as a string
///
/// N-central returns ids as numbers on some endpoints and strings on others.
/// Empty strings and non-scalar values are not identifiers.
pub fn id_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
