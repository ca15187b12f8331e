//! Wire types for the N-central REST API

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Access tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 30;

/// Response from `/api/auth/authenticate`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokens {
    pub access: TokenInfo,
    pub refresh: TokenInfo,
}

/// Response from `/api/auth/refresh`
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub tokens: RefreshTokens,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokens {
    pub access: TokenInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub token: String,
    /// Not always sent; one hour when missing
    #[serde(default = "default_expiry")]
    pub expires_in_seconds: i64,
    #[serde(rename = "type", default)]
    pub token_type: Option<String>,
}

fn default_expiry() -> i64 {
    3600
}

/// Tokens held for one server
#[derive(Debug, Clone)]
pub struct AuthState {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl AuthState {
    pub fn from_response(response: AuthResponse, now: DateTime<Utc>) -> Self {
        AuthState {
            access_token: response.tokens.access.token,
            refresh_token: response.tokens.refresh.token,
            access_expires_at: now + Duration::seconds(response.tokens.access.expires_in_seconds),
            refresh_expires_at: now + Duration::seconds(response.tokens.refresh.expires_in_seconds),
        }
    }

    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }
}

/// Paging metadata, flattened into list responses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default, alias = "pageNumber")]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_items: Option<u32>,
}

/// Standard list wrapper: `{"data": [...], "totalPages": n, ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(flatten)]
    pub page_info: PageInfo,
}

impl<T> PaginatedResponse<T> {
    /// Whether another page follows the one numbered `page`
    ///
    /// The server's page count wins when present. Otherwise an empty or
    /// short page is taken as the last one.
    pub fn has_more(&self, page: u32, requested_size: u32) -> bool {
        if self.data.is_empty() {
            return false;
        }
        if let Some(total_pages) = self.page_info.total_pages {
            return page < total_pages;
        }
        self.data.len() as u32 >= requested_size
    }
}

/// `/api/server-info`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default, alias = "ncentral", alias = "ncentralVersion")]
    pub product_version: Option<String>,
    #[serde(default, alias = "api_version")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, JsonValue>,
}

impl ServerInfo {
    pub fn version(&self) -> &str {
        self.product_version
            .as_deref()
            .or(self.build.as_deref())
            .unwrap_or("unknown")
    }
}

/// `/api/service-orgs/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOrg {
    pub so_id: JsonValue,
    #[serde(default)]
    pub so_name: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, JsonValue>,
}
