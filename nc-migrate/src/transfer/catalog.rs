//! Entity catalog
//!
//! Static declaration of every entity type the tool knows how to move:
//! which field carries the record id, how a record is recognised on another
//! server (natural key), which fields point at other entities (foreign keys)
//! and where the type sits in the dependency order.
//!
//! The catalog is configuration data. Adding a type means adding an entry to
//! [`Catalog::standard`], not touching the engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::record::{Record, id_to_string};

/// Separator between natural key parts (ASCII unit separator)
const KEY_SEPARATOR: char = '\u{1f}';

/// Every entity type the catalog can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customer,
    Site,
    Device,
    AccessGroup,
    UserRole,
    User,
    OrgProperty,
    DeviceProperty,
}

impl EntityType {
    /// All entity types in declaration order
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Customer,
            EntityType::Site,
            EntityType::Device,
            EntityType::AccessGroup,
            EntityType::UserRole,
            EntityType::User,
            EntityType::OrgProperty,
            EntityType::DeviceProperty,
        ]
    }

    /// Machine name used on the command line, in config files and exports
    pub fn key(&self) -> &'static str {
        match self {
            EntityType::Customer => "customers",
            EntityType::Site => "sites",
            EntityType::Device => "devices",
            EntityType::AccessGroup => "access_groups",
            EntityType::UserRole => "user_roles",
            EntityType::User => "users",
            EntityType::OrgProperty => "org_properties",
            EntityType::DeviceProperty => "device_properties",
        }
    }

    /// Human readable plural label, used as progress phase name
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Customer => "Customers",
            EntityType::Site => "Sites",
            EntityType::Device => "Devices",
            EntityType::AccessGroup => "Access Groups",
            EntityType::UserRole => "User Roles",
            EntityType::User => "Users",
            EntityType::OrgProperty => "Organization Properties",
            EntityType::DeviceProperty => "Device Properties",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Customer => "Customer",
            EntityType::Site => "Site",
            EntityType::Device => "Device",
            EntityType::AccessGroup => "AccessGroup",
            EntityType::UserRole => "UserRole",
            EntityType::User => "User",
            EntityType::OrgProperty => "OrgProperty",
            EntityType::DeviceProperty => "DeviceProperty",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts the machine key (`user_roles`), dashed keys (`user-roles`)
    /// and the singular type name (`UserRole`), case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        EntityType::all()
            .iter()
            .copied()
            .find(|t| {
                t.key() == wanted || t.to_string().to_lowercase() == wanted.replace('_', "")
            })
            .ok_or_else(|| {
                let known: Vec<_> = EntityType::all().iter().map(|t| t.key()).collect();
                format!("unknown entity type '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Whether a foreign key field holds one identifier or a list of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// What a foreign key points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Type(EntityType),
    /// Any org unit: the service organisation, a customer or a site
    OrgUnit,
}

impl Target {
    /// Entity types whose identifiers the reference may hold, in lookup order
    pub fn candidates(&self) -> Vec<EntityType> {
        match self {
            Target::Type(t) => vec![*t],
            Target::OrgUnit => vec![EntityType::Customer, EntityType::Site],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Type(t) => fmt::Display::fmt(t, f),
            Target::OrgUnit => f.write_str("OrgUnit"),
        }
    }
}

/// A field whose value is a source-side identifier of another entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: &'static str,
    pub references: Target,
    pub cardinality: Cardinality,
}

impl ForeignKey {
    const fn one(field: &'static str, references: EntityType) -> Self {
        ForeignKey {
            field,
            references: Target::Type(references),
            cardinality: Cardinality::One,
        }
    }

    const fn many(field: &'static str, references: EntityType) -> Self {
        ForeignKey {
            field,
            references: Target::Type(references),
            cardinality: Cardinality::Many,
        }
    }

    const fn org_unit(field: &'static str) -> Self {
        ForeignKey {
            field,
            references: Target::OrgUnit,
            cardinality: Cardinality::One,
        }
    }

    const fn org_units(field: &'static str) -> Self {
        ForeignKey {
            field,
            references: Target::OrgUnit,
            cardinality: Cardinality::Many,
        }
    }
}

// parentId of a customer is the service organisation itself
const CUSTOMER_KEYS: &[ForeignKey] = &[ForeignKey::one("parentId", EntityType::Customer)];

const SITE_KEYS: &[ForeignKey] = &[
    ForeignKey::one("parentId", EntityType::Customer),
    ForeignKey::one("customerId", EntityType::Customer),
];

const ACCESS_GROUP_KEYS: &[ForeignKey] = &[
    ForeignKey::org_unit("orgUnitId"),
    ForeignKey::org_units("orgUnitIds"),
];

const USER_ROLE_KEYS: &[ForeignKey] = &[ForeignKey::org_unit("orgUnitId")];

const USER_KEYS: &[ForeignKey] = &[
    ForeignKey::org_unit("orgUnitId"),
    ForeignKey::org_unit("serviceOrgId"),
    ForeignKey::many("roleIds", EntityType::UserRole),
    ForeignKey::many("accessGroupIds", EntityType::AccessGroup),
];

const ORG_PROPERTY_KEYS: &[ForeignKey] = &[ForeignKey::org_unit("orgUnitId")];

/// One component of a natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPart {
    /// Text field, compared trimmed and case-insensitively
    Text(&'static str),
    /// Foreign key field, compared by its destination-side identifier
    Reference(&'static str),
}

/// Catalog entry for one entity type
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub entity_type: EntityType,
    /// Field names that may carry the record id; the first one is canonical
    pub id_fields: &'static [&'static str],
    /// Field used when showing a record to the user
    pub name_field: &'static str,
    pub natural_key: &'static [KeyPart],
    pub foreign_keys: &'static [ForeignKey],
    /// Server-managed fields that must not be sent on create
    pub strip_on_create: &'static [&'static str],
    /// Position in the dependency order (lower is processed first)
    pub rank: u8,
    /// Export-only types are never created on a destination
    pub migratable: bool,
}

/// Lookup table of [`EntityDescriptor`]s
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<EntityDescriptor>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl Catalog {
    /// Build a catalog from explicit entries
    pub fn new(entries: Vec<EntityDescriptor>) -> Self {
        Catalog { entries }
    }

    /// The N-central entity types
    pub fn standard() -> Self {
        Catalog::new(vec![
            EntityDescriptor {
                entity_type: EntityType::Customer,
                id_fields: &["customerId"],
                name_field: "customerName",
                natural_key: &[KeyPart::Text("customerName")],
                foreign_keys: CUSTOMER_KEYS,
                strip_on_create: &["orgUnitType", "isSystem", "isServiceOrg", "county"],
                rank: 0,
                migratable: true,
            },
            EntityDescriptor {
                entity_type: EntityType::Site,
                id_fields: &["siteId"],
                name_field: "siteName",
                natural_key: &[KeyPart::Reference("parentId"), KeyPart::Text("siteName")],
                foreign_keys: SITE_KEYS,
                strip_on_create: &[
                    "orgUnitType",
                    "isSystem",
                    "isServiceOrg",
                    "orgUnitId",
                    "serviceOrgId",
                    "county",
                ],
                rank: 1,
                migratable: true,
            },
            EntityDescriptor {
                entity_type: EntityType::Device,
                id_fields: &["deviceId"],
                name_field: "longName",
                natural_key: &[KeyPart::Reference("orgUnitId"), KeyPart::Text("longName")],
                foreign_keys: &[],
                strip_on_create: &[],
                rank: 2,
                migratable: false,
            },
            EntityDescriptor {
                entity_type: EntityType::AccessGroup,
                id_fields: &["groupId", "accessGroupId"],
                name_field: "groupName",
                natural_key: &[KeyPart::Text("groupName")],
                foreign_keys: ACCESS_GROUP_KEYS,
                // user membership is owned by the users, which come later
                strip_on_create: &["userIds"],
                rank: 3,
                migratable: true,
            },
            EntityDescriptor {
                entity_type: EntityType::UserRole,
                id_fields: &["roleId", "userRoleId"],
                name_field: "roleName",
                natural_key: &[KeyPart::Text("roleName")],
                foreign_keys: USER_ROLE_KEYS,
                strip_on_create: &["userIds"],
                rank: 4,
                migratable: true,
            },
            EntityDescriptor {
                entity_type: EntityType::User,
                id_fields: &["userId"],
                name_field: "userName",
                natural_key: &[KeyPart::Text("userName")],
                foreign_keys: USER_KEYS,
                strip_on_create: &[
                    "fullName",
                    "isLocked",
                    "loggedInUser",
                    "createdOn",
                    "customerTree",
                    "currentSsoProvider",
                ],
                rank: 5,
                migratable: true,
            },
            EntityDescriptor {
                entity_type: EntityType::OrgProperty,
                id_fields: &["propertyId"],
                name_field: "label",
                natural_key: &[KeyPart::Reference("orgUnitId"), KeyPart::Text("label")],
                foreign_keys: ORG_PROPERTY_KEYS,
                strip_on_create: &[],
                rank: 6,
                migratable: true,
            },
            EntityDescriptor {
                entity_type: EntityType::DeviceProperty,
                id_fields: &["propertyId"],
                name_field: "label",
                natural_key: &[KeyPart::Text("label")],
                foreign_keys: &[],
                // device bindings do not carry over, devices are export-only
                strip_on_create: &["deviceId", "deviceName", "value"],
                rank: 6,
                migratable: true,
            },
        ])
    }

    /// Descriptor for a type
    ///
    /// # Panics
    /// Panics if the type has no catalog entry. Every type the engine is asked
    /// to handle must be declared, so a miss is a programming error.
    pub fn descriptor(&self, entity_type: EntityType) -> &EntityDescriptor {
        self.entries
            .iter()
            .find(|e| e.entity_type == entity_type)
            .unwrap_or_else(|| panic!("entity type {} is not declared in the catalog", entity_type))
    }

    /// Whether the catalog declares this type
    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.entries.iter().any(|e| e.entity_type == entity_type)
    }

    /// Declared types in dependency order
    pub fn types(&self) -> Vec<EntityType> {
        let all: BTreeSet<_> = self.entries.iter().map(|e| e.entity_type).collect();
        self.ordered_types(&all)
    }

    /// The selected types sorted ascending by dependency rank, stable on ties
    pub fn ordered_types(&self, selected: &BTreeSet<EntityType>) -> Vec<EntityType> {
        let mut ordered: Vec<EntityType> = selected.iter().copied().collect();
        ordered.sort_by_key(|t| self.descriptor(*t).rank);
        ordered
    }

    pub fn rank(&self, entity_type: EntityType) -> u8 {
        self.descriptor(entity_type).rank
    }

    pub fn foreign_keys(&self, entity_type: EntityType) -> &'static [ForeignKey] {
        self.descriptor(entity_type).foreign_keys
    }

    pub fn is_migratable(&self, entity_type: EntityType) -> bool {
        self.descriptor(entity_type).migratable
    }

    /// Compute the natural key of a record
    ///
    /// `resolve` translates the identifier held by a reference part into the
    /// identifier space the key is compared in. Destination records pass
    /// their references through unchanged; source records go through the
    /// identifier map so both sides end up keyed by destination ids.
    ///
    /// Returns `None` when every text part is empty, such records cannot be
    /// recognised on the other server.
    pub fn natural_key<F>(&self, record: &Record, resolve: F) -> Option<String>
    where
        F: Fn(Target, &str) -> Option<String>,
    {
        let descriptor = self.descriptor(record.entity_type);
        let mut parts = Vec::with_capacity(descriptor.natural_key.len());
        let mut has_text = false;

        for part in descriptor.natural_key {
            match part {
                KeyPart::Text(field) => {
                    let text = record.get(field).map(normalize_text).unwrap_or_default();
                    has_text |= !text.is_empty();
                    parts.push(text);
                }
                KeyPart::Reference(field) => {
                    let Some(source_id) = record.get(field).and_then(id_to_string) else {
                        parts.push(String::new());
                        continue;
                    };
                    let references = descriptor
                        .foreign_keys
                        .iter()
                        .find(|fk| fk.field == *field)
                        .map(|fk| fk.references);
                    let resolved = match references {
                        Some(target) => resolve(target, &source_id),
                        None => Some(source_id.clone()),
                    };
                    // unresolved references can never match a destination record
                    parts.push(match resolved {
                        Some(id) => format!("#{}", id),
                        None => format!("?{}", source_id),
                    });
                }
            }
        }

        if !has_text {
            return None;
        }
        Some(parts.join(&KEY_SEPARATOR.to_string()))
    }
}

fn normalize_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.trim().to_lowercase(),
        JsonValue::Null => String::new(),
        other => other.to_string().to_lowercase(),
    }
}
