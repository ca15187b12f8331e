//! `EntityClient` implementation bound to one service organisation

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::OnceCell;

use super::client::NcClient;
use super::endpoints::{self, paths};
use super::error::{ClientError, ClientErrorKind};
use super::models::PaginatedResponse;
use super::permissions::PermissionLookup;
use super::soap::{self, NewUser, SoapCredentials};
use crate::transfer::{Catalog, EntityClient, EntityType, Page, Record, Scope, id_to_string};

pub struct ScopedClient {
    client: NcClient,
    scope: Scope,
    catalog: Catalog,
    /// Ids of the service organisation and its customers, for site filtering
    org_units: OnceCell<HashSet<String>>,
    permissions: PermissionLookup,
    /// Needed to create users, which only the SOAP service can do
    soap: Option<SoapCredentials>,
}

impl ScopedClient {
    pub fn new(client: NcClient, service_org_id: i64, catalog: Catalog) -> Self {
        let scope = Scope::new(client.base_url(), service_org_id);
        ScopedClient {
            client,
            scope,
            catalog,
            org_units: OnceCell::new(),
            permissions: PermissionLookup::default(),
            soap: None,
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionLookup) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_soap(mut self, credentials: SoapCredentials) -> Self {
        self.soap = Some(credentials);
        self
    }

    pub fn client(&self) -> &NcClient {
        &self.client
    }

    fn so_id(&self) -> i64 {
        self.scope.service_org_id
    }

    fn to_page(&self, entity_type: EntityType, page: u32, response: PaginatedResponse<JsonValue>) -> Page {
        let has_more = response.has_more(page, self.client.page_size());
        let records = response
            .data
            .into_iter()
            .filter_map(|value| {
                let record = Record::from_json(&self.catalog, entity_type, value);
                if record.is_none() {
                    log::warn!("Dropping {} without an id from {}", entity_type, self.scope);
                }
                record
            })
            .collect();
        Page { records, has_more }
    }

    async fn list_path(&self, entity_type: EntityType, path: &str, page: u32) -> Result<Page, ClientError> {
        let response = self.client.get_page::<JsonValue>(path, page).await?;
        Ok(self.to_page(entity_type, page, response))
    }

    async fn org_units(&self) -> Result<&HashSet<String>, ClientError> {
        self.org_units
            .get_or_try_init(|| async {
                let mut ids = HashSet::new();
                ids.insert(self.so_id().to_string());
                let path = endpoints::service_org_customers(self.so_id());
                let mut page = 1;
                loop {
                    let customers = self.list_path(EntityType::Customer, &path, page).await?;
                    ids.extend(customers.records.into_iter().map(|r| r.source_id));
                    if !customers.has_more {
                        break;
                    }
                    page += 1;
                }
                log::debug!("{} org units in scope {}", ids.len(), self.scope);
                Ok::<_, ClientError>(ids)
            })
            .await
    }

    /// Sites are only listable server-wide, keep the ones under this scope
    async fn list_sites(&self, page: u32) -> Result<Page, ClientError> {
        let mut sites = self.list_path(EntityType::Site, paths::SITES, page).await?;
        let org_units = self.org_units().await?;
        let so = self.so_id().to_string();
        sites
            .records
            .retain(|site| site_in_scope(site, org_units, &so));
        Ok(sites)
    }

    /// Custom properties of every device on one device page
    async fn list_device_properties(&self, page: u32) -> Result<Page, ClientError> {
        let devices = self
            .list_path(EntityType::Device, &endpoints::org_unit_devices(self.so_id()), page)
            .await?;

        let mut records = Vec::new();
        for device in &devices.records {
            let Ok(device_id) = device.source_id.parse::<i64>() else {
                continue;
            };
            let response: PaginatedResponse<JsonValue> = self
                .client
                .get(&endpoints::device_custom_properties(device_id))
                .await?;

            for value in response.data {
                let Some(mut record) = Record::from_json(&self.catalog, EntityType::DeviceProperty, value) else {
                    continue;
                };
                // one property definition shows up once per device
                record.source_id = format!("{}:{}", device.source_id, record.source_id);
                record
                    .fields
                    .entry("deviceId")
                    .or_insert_with(|| JsonValue::from(device_id));
                if let Some(name) = device.get("longName") {
                    record
                        .fields
                        .entry("deviceName")
                        .or_insert_with(|| name.clone());
                }
                records.push(record);
            }
        }

        Ok(Page {
            records,
            has_more: devices.has_more,
        })
    }

    async fn create_user(&self, record: &Record) -> Result<String, ClientError> {
        let credentials = self.soap.as_ref().ok_or_else(|| {
            ClientError::new(
                ClientErrorKind::Validation,
                "N-central has no REST endpoint for creating users, set a destination API user",
            )
        })?;
        if credentials.username.is_none() {
            log::warn!("No destination API user, sending userAdd with a bearer token");
        }

        let user = NewUser::from_record(record, self.so_id())?;
        let envelope = soap::user_add_envelope(credentials, &user, &soap::generate_password())?;

        log::debug!("Creating user '{}' via SOAP userAdd", user.login);
        let (status, body) = self
            .client
            .post_soap(paths::SOAP, &envelope, credentials.bearer())
            .await?;
        soap::parse_user_add_response(status, &body)
    }
}

#[async_trait]
impl EntityClient for ScopedClient {
    fn scope(&self) -> &Scope {
        &self.scope
    }

    async fn list(&self, entity_type: EntityType, page: u32) -> Result<Page, ClientError> {
        let so = self.so_id();
        match entity_type {
            EntityType::Site => self.list_sites(page).await,
            EntityType::DeviceProperty => self.list_device_properties(page).await,
            EntityType::Customer => {
                self.list_path(entity_type, &endpoints::service_org_customers(so), page)
                    .await
            }
            EntityType::Device => {
                self.list_path(entity_type, &endpoints::org_unit_devices(so), page)
                    .await
            }
            EntityType::AccessGroup => {
                self.list_path(entity_type, &endpoints::org_unit_access_groups(so), page)
                    .await
            }
            EntityType::UserRole => {
                self.list_path(entity_type, &endpoints::org_unit_user_roles(so), page)
                    .await
            }
            EntityType::User => {
                self.list_path(entity_type, &endpoints::org_unit_users(so), page)
                    .await
            }
            EntityType::OrgProperty => {
                self.list_path(entity_type, &endpoints::org_unit_custom_properties(so), page)
                    .await
            }
        }
    }

    async fn create(&self, entity_type: EntityType, record: &Record) -> Result<String, ClientError> {
        if entity_type == EntityType::User {
            return self.create_user(record).await;
        }

        let path = create_path(entity_type, record, self.so_id())?;
        let payload = create_body(
            entity_type,
            record.create_payload(&self.catalog),
            &self.permissions,
        );

        log::debug!("Creating {} '{}' via {}", entity_type, record.display_name(&self.catalog), path);
        let response = self.client.post(&path, &JsonValue::Object(payload)).await?;

        created_id(&self.catalog, entity_type, &response).ok_or_else(|| {
            ClientError::new(
                ClientErrorKind::InvalidResponse,
                format!("No {} id in create response", entity_type),
            )
        })
    }
}

fn site_in_scope(site: &Record, org_units: &HashSet<String>, so: &str) -> bool {
    ["parentId", "customerId", "customerid", "orgUnitId"]
        .iter()
        .filter_map(|f| site.get(f).and_then(id_to_string))
        .any(|id| org_units.contains(&id))
        || site
            .get("serviceOrgId")
            .and_then(id_to_string)
            .is_some_and(|id| id == so)
}

/// Org unit a record should be created under, defaulting to the service org
fn org_unit_of(record: &Record, so: i64) -> i64 {
    record
        .get("orgUnitId")
        .and_then(id_to_string)
        .and_then(|id| id.parse().ok())
        .unwrap_or(so)
}

fn create_path(entity_type: EntityType, record: &Record, so: i64) -> Result<String, ClientError> {
    Ok(match entity_type {
        EntityType::Customer => endpoints::service_org_customers(so),
        EntityType::Site => {
            let parent = ["parentId", "customerId"]
                .iter()
                .filter_map(|f| record.get(f).and_then(id_to_string))
                .find_map(|id| id.parse::<i64>().ok())
                .ok_or_else(|| {
                    ClientError::new(ClientErrorKind::Validation, "Site has no parent customer")
                })?;
            endpoints::customer_sites(parent)
        }
        EntityType::AccessGroup => {
            let is_device_group = record
                .get("groupType")
                .and_then(JsonValue::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case("DEVICE"));
            if is_device_group {
                endpoints::device_access_groups_create(so)
            } else {
                endpoints::org_unit_access_groups_create(so)
            }
        }
        EntityType::UserRole => endpoints::org_unit_user_roles(org_unit_of(record, so)),
        EntityType::OrgProperty => endpoints::org_unit_custom_properties(org_unit_of(record, so)),
        EntityType::DeviceProperty => endpoints::org_unit_custom_properties(so),
        EntityType::Device => {
            return Err(ClientError::new(
                ClientErrorKind::Validation,
                "Devices cannot be created through the API",
            ));
        }
        EntityType::User => {
            return Err(ClientError::new(
                ClientErrorKind::Validation,
                "Users are created through SOAP userAdd",
            ));
        }
    })
}

/// Field renames the create endpoints expect
fn create_body(
    entity_type: EntityType,
    mut payload: Map<String, JsonValue>,
    permissions: &PermissionLookup,
) -> Map<String, JsonValue> {
    match entity_type {
        EntityType::UserRole => {
            if let Some(description) = payload.remove("roleDescription") {
                payload.entry("description").or_insert(description);
            }
            permissions.apply(&mut payload);
            payload
                .entry("userIds")
                .or_insert_with(|| JsonValue::Array(Vec::new()));
        }
        EntityType::AccessGroup => {
            payload
                .entry("userIds")
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            let is_org_unit_group = payload.contains_key("orgUnitIds");
            if is_org_unit_group {
                payload
                    .entry("autoIncludeNewOrgUnits")
                    .or_insert_with(|| JsonValue::String("true".to_string()));
            }
        }
        _ => {}
    }
    payload
}

/// Read the new id from a create response
///
/// Accepts the object itself, an object wrapped in `data`, or a bare id.
fn created_id(catalog: &Catalog, entity_type: EntityType, response: &JsonValue) -> Option<String> {
    let descriptor = catalog.descriptor(entity_type);
    match response {
        JsonValue::Object(map) => descriptor
            .id_fields
            .iter()
            .chain(std::iter::once(&"id"))
            .find_map(|f| map.get(*f).and_then(id_to_string))
            .or_else(|| {
                map.get("data")
                    .and_then(|inner| created_id(catalog, entity_type, inner))
            }),
        other => id_to_string(other),
    }
}
