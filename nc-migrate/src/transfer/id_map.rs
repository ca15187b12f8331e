//! Run-scoped translation of source identifiers to destination identifiers

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use super::catalog::{Cardinality, Catalog, EntityType, Target};
use super::record::{Record, id_to_string};

/// A foreign key whose referenced entity has no destination id yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub field: String,
    pub target: Target,
    pub source_id: String,
}

impl std::fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unresolved reference in '{}': {} {} has no destination mapping",
            self.field, self.target, self.source_id
        )
    }
}

impl std::error::Error for UnresolvedReference {}

/// Mapping `(type, source id) -> destination id` for one run
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    entries: HashMap<(EntityType, String), String>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map bound to a pair of service organisations
    ///
    /// The source service organisation is itself an org unit that customers,
    /// roles and properties hang off. It is never migrated, so it is mapped
    /// up front to the destination's service organisation.
    pub fn with_scope(source_service_org: i64, destination_service_org: i64) -> Self {
        let mut map = Self::new();
        map.put(
            EntityType::Customer,
            source_service_org.to_string(),
            destination_service_org.to_string(),
        );
        map
    }

    /// Record a mapping, replacing any previous one for the same key
    pub fn put(&mut self, entity_type: EntityType, source_id: impl Into<String>, dest_id: impl Into<String>) {
        self.entries
            .insert((entity_type, source_id.into()), dest_id.into());
    }

    pub fn resolve(&self, entity_type: EntityType, source_id: &str) -> Option<&str> {
        self.entries
            .get(&(entity_type, source_id.to_string()))
            .map(String::as_str)
    }

    /// Resolve a reference, trying each entity type the target may hold
    pub fn resolve_target(&self, target: Target, source_id: &str) -> Option<&str> {
        target
            .candidates()
            .into_iter()
            .find_map(|entity_type| self.resolve(entity_type, source_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the record with every declared foreign key translated
    ///
    /// Absent and null fields are left as they are. List fields are rewritten
    /// element by element. Numeric ids stay numeric when the destination id
    /// is numeric.
    ///
    /// # Errors
    /// Returns the first reference that has no mapping.
    pub fn rewrite(&self, record: &Record, catalog: &Catalog) -> Result<Record, UnresolvedReference> {
        let mut rewritten = record.clone();

        for fk in catalog.foreign_keys(record.entity_type) {
            let Some(value) = rewritten.fields.get_mut(fk.field) else {
                continue;
            };

            match (fk.cardinality, value) {
                (_, JsonValue::Null) => {}
                (Cardinality::Many, JsonValue::Array(items)) => {
                    for item in items.iter_mut() {
                        *item = self.translate(fk.field, fk.references, item)?;
                    }
                }
                (_, value) => {
                    *value = self.translate(fk.field, fk.references, value)?;
                }
            }
        }

        Ok(rewritten)
    }

    fn translate(
        &self,
        field: &str,
        target: Target,
        value: &JsonValue,
    ) -> Result<JsonValue, UnresolvedReference> {
        let source_id = id_to_string(value).ok_or_else(|| UnresolvedReference {
            field: field.to_string(),
            target,
            source_id: value.to_string(),
        })?;

        let dest_id = self
            .resolve_target(target, &source_id)
            .ok_or_else(|| UnresolvedReference {
                field: field.to_string(),
                target,
                source_id: source_id.clone(),
            })?;

        Ok(match (value, dest_id.parse::<i64>()) {
            (JsonValue::Number(_), Ok(n)) => JsonValue::from(n),
            _ => JsonValue::String(dest_id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(fields: JsonValue) -> Record {
        Record::new(EntityType::User, "u1", fields.as_object().cloned().unwrap())
    }

    #[test]
    fn test_put_and_resolve() {
        let mut map = IdentifierMap::new();
        map.put(EntityType::UserRole, "1", "100");
        assert_eq!(map.resolve(EntityType::UserRole, "1"), Some("100"));
        assert_eq!(map.resolve(EntityType::AccessGroup, "1"), None);

        map.put(EntityType::UserRole, "1", "200");
        assert_eq!(map.resolve(EntityType::UserRole, "1"), Some("200"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_with_scope_maps_service_org() {
        let map = IdentifierMap::with_scope(50, 900);
        assert_eq!(map.resolve(EntityType::Customer, "50"), Some("900"));
    }

    #[test]
    fn test_rewrite_single_and_list_references() {
        let catalog = Catalog::standard();
        let mut map = IdentifierMap::with_scope(50, 900);
        map.put(EntityType::UserRole, "1", "101");
        map.put(EntityType::UserRole, "2", "102");
        map.put(EntityType::AccessGroup, "7", "abc");

        let record = user(json!({
            "userName": "jane",
            "orgUnitId": 50,
            "roleIds": [1, 2],
            "accessGroupIds": ["7"],
            "email": "jane@example.com"
        }));

        let rewritten = map.rewrite(&record, &catalog).unwrap();
        assert_eq!(rewritten.get("orgUnitId"), Some(&json!(900)));
        assert_eq!(rewritten.get("roleIds"), Some(&json!([101, 102])));
        assert_eq!(rewritten.get("accessGroupIds"), Some(&json!(["abc"])));
        assert_eq!(rewritten.get("email"), Some(&json!("jane@example.com")));
        // source record untouched
        assert_eq!(record.get("roleIds"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_rewrite_skips_absent_and_null() {
        let catalog = Catalog::standard();
        let map = IdentifierMap::new();
        let record = user(json!({"userName": "bob", "orgUnitId": null}));

        let rewritten = map.rewrite(&record, &catalog).unwrap();
        assert_eq!(rewritten, record);
    }

    #[test]
    fn test_rewrite_unresolved() {
        let catalog = Catalog::standard();
        let mut map = IdentifierMap::new();
        map.put(EntityType::UserRole, "1", "101");

        let record = user(json!({"userName": "bob", "roleIds": [1, 3]}));
        let err = map.rewrite(&record, &catalog).unwrap_err();

        assert_eq!(
            err,
            UnresolvedReference {
                field: "roleIds".to_string(),
                target: Target::Type(EntityType::UserRole),
                source_id: "3".to_string(),
            }
        );
        assert!(err.to_string().contains("roleIds"));
    }

    #[test]
    fn test_org_unit_reference_resolves_through_sites() {
        let catalog = Catalog::standard();
        let mut map = IdentifierMap::with_scope(50, 900);
        map.put(EntityType::Customer, "1", "555");
        map.put(EntityType::Site, "5", "777");

        assert_eq!(map.resolve_target(Target::OrgUnit, "50"), Some("900"));
        assert_eq!(map.resolve_target(Target::OrgUnit, "1"), Some("555"));
        assert_eq!(map.resolve_target(Target::OrgUnit, "5"), Some("777"));
        assert_eq!(map.resolve_target(Target::Type(EntityType::Customer), "5"), None);

        let record = user(json!({"userName": "jane", "orgUnitId": 5, "serviceOrgId": 1}));
        let rewritten = map.rewrite(&record, &catalog).unwrap();
        assert_eq!(rewritten.get("orgUnitId"), Some(&json!(777)));
        assert_eq!(rewritten.get("serviceOrgId"), Some(&json!(555)));

        let orphan = user(json!({"userName": "joe", "orgUnitId": 6}));
        let err = map.rewrite(&orphan, &catalog).unwrap_err();
        assert_eq!(err.target, Target::OrgUnit);
        assert!(err.to_string().contains("OrgUnit 6"));
    }

    #[test]
    fn test_rewrite_type_without_references() {
        let catalog = Catalog::standard();
        let map = IdentifierMap::new();
        let record = Record::new(
            EntityType::DeviceProperty,
            "9",
            json!({"label": "Asset Tag"}).as_object().cloned().unwrap(),
        );
        assert_eq!(map.rewrite(&record, &catalog).unwrap(), record);
    }
}
