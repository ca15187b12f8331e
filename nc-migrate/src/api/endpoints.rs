//! REST paths of the N-central API

use serde::Serialize;

pub mod paths {
    pub const AUTH_AUTHENTICATE: &str = "/api/auth/authenticate";
    pub const AUTH_REFRESH: &str = "/api/auth/refresh";
    pub const SERVER_INFO: &str = "/api/server-info";
    pub const SITES: &str = "/api/sites";
    /// SOAP service, for operations REST does not offer
    pub const SOAP: &str = "/dms2/services2/ServerEI2";
}

pub fn service_org(so_id: i64) -> String {
    format!("/api/service-orgs/{}", so_id)
}

pub fn service_org_customers(so_id: i64) -> String {
    format!("/api/service-orgs/{}/customers", so_id)
}

pub fn customer_sites(customer_id: i64) -> String {
    format!("/api/customers/{}/sites", customer_id)
}

/// Listing of access groups of both kinds
pub fn org_unit_access_groups(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/access-groups", org_unit_id)
}

pub fn org_unit_access_groups_create(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/org-unit-access-groups", org_unit_id)
}

pub fn device_access_groups_create(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/device-access-groups", org_unit_id)
}

pub fn org_unit_user_roles(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/user-roles", org_unit_id)
}

pub fn org_unit_users(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/users", org_unit_id)
}

pub fn org_unit_devices(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/devices", org_unit_id)
}

pub fn org_unit_custom_properties(org_unit_id: i64) -> String {
    format!("/api/org-units/{}/custom-properties", org_unit_id)
}

pub fn device_custom_properties(device_id: i64) -> String {
    format!("/api/devices/{}/custom-properties", device_id)
}

/// Collapse numeric path segments so that every org unit shares one limit
///
/// `/api/org-units/123/users` becomes `/api/org-units/{id}/users`.
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    path.split('/')
        .map(|part| {
            if !part.is_empty() && part.parse::<i64>().is_ok() {
                "{id}"
            } else {
                part
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Query parameters of paged listings
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaginationParams {
    #[serde(rename = "pageNumber", skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(rename = "pageSize", skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl PaginationParams {
    pub fn new(page: u32, page_size: u32) -> Self {
        PaginationParams {
            page: Some(page),
            page_size: Some(page_size),
        }
    }
}
