//! N-central REST API client
//!
//! Authenticated JSON requests with per-endpoint concurrency limiting,
//! retry with backoff and paged listings.

use std::time::Duration;

use log::{debug, error};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::auth::AuthManager;
use super::endpoints::{self, PaginationParams, paths};
use super::error::{ClientError, ClientErrorKind};
use super::models::{PaginatedResponse, ServerInfo, ServiceOrg};
use super::resilience::{ConcurrencyLimiter, ConcurrencyStats, ResilienceConfig, RetryPolicy};

/// Connection settings that are not part of resilience
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub page_size: u32,
    pub resilience: ResilienceConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            timeout: Duration::from_secs(60),
            page_size: 100,
            resilience: ResilienceConfig::default(),
        }
    }
}

pub struct NcClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthManager,
    retry: RetryPolicy,
    limiter: ConcurrencyLimiter,
    page_size: u32,
}

impl NcClient {
    pub fn new(server: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(server);
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ClientError::new(
                    ClientErrorKind::Network,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(NcClient {
            auth: AuthManager::new(&base_url, http.clone()),
            http,
            base_url,
            retry: RetryPolicy::new(options.resilience.retry),
            limiter: ConcurrencyLimiter::new(options.resilience.concurrency),
            page_size: options.page_size.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Counters of the per-endpoint request limiter
    pub fn request_stats(&self) -> ConcurrencyStats {
        self.limiter.stats()
    }

    pub async fn authenticate(&self, jwt: &str) -> Result<(), ClientError> {
        self.retry
            .execute("Authenticate", false, || self.auth.authenticate(jwt))
            .await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated().await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::GET, path, None, None).await
    }

    /// One page of a paged listing, numbered from 1
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
    ) -> Result<PaginatedResponse<T>, ClientError> {
        let params = PaginationParams::new(page, self.page_size);
        let response: PaginatedResponse<T> =
            self.request(Method::GET, path, Some(&params), None).await?;
        debug!(
            "GET {} page {}: {} items ({:?})",
            path,
            page,
            response.data.len(),
            response.page_info
        );
        Ok(response)
    }

    pub async fn post(&self, path: &str, body: &JsonValue) -> Result<JsonValue, ClientError> {
        self.request(Method::POST, path, None, Some(body)).await
    }

    pub async fn server_info(&self) -> Result<ServerInfo, ClientError> {
        self.get(paths::SERVER_INFO).await
    }

    pub async fn service_org(&self, so_id: i64) -> Result<ServiceOrg, ClientError> {
        let value: JsonValue = self.get(&endpoints::service_org(so_id)).await?;
        // some versions wrap single objects in {"data": ...}
        let inner = match value {
            JsonValue::Object(mut map) if map.contains_key("data") && !map.contains_key("soId") => {
                map.remove("data").unwrap_or(JsonValue::Null)
            }
            other => other,
        };
        Ok(serde_json::from_value(inner)?)
    }

    /// POST a SOAP envelope and return the status with the raw body
    ///
    /// Only transport failures and 429 are errors here. SOAP faults arrive
    /// as 500 responses whose body the caller has to read.
    pub async fn post_soap(
        &self,
        path: &str,
        envelope: &str,
        bearer: Option<&str>,
    ) -> Result<(u16, String), ClientError> {
        let label = format!("SOAP {}", path);
        self.retry
            .execute(&label, false, || async {
                let _permit = self.limiter.acquire(path).await;
                let url = format!("{}{}", self.base_url, path);
                let mut request = self
                    .http
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
                    .header("SOAPAction", "\"\"")
                    .body(envelope.to_string());
                if let Some(token) = bearer {
                    request = request.bearer_auth(token);
                }

                let response = request.send().await?;
                let status = response.status().as_u16();
                let text = response.text().await?;
                if status == 429 {
                    return Err(ClientError::from_status(status, &text));
                }
                Ok::<_, ClientError>((status, text))
            })
            .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&PaginationParams>,
        body: Option<&JsonValue>,
    ) -> Result<T, ClientError> {
        let label = format!("{} {}", method, path);
        let idempotent = method == Method::GET;
        self.retry
            .execute(&label, idempotent, || {
                self.send_once(method.clone(), path, query, body)
            })
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&PaginationParams>,
        body: Option<&JsonValue>,
    ) -> Result<T, ClientError> {
        let _permit = self.limiter.acquire(path).await;
        let token = self.auth.token().await?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::from_status(status.as_u16(), &text).with_retry_after(retry_after));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            let preview: String = text.chars().take(1000).collect();
            error!("JSON parse error for {} {}: {}. Body: {}", method, path, e, preview);
            ClientError::new(
                ClientErrorKind::InvalidResponse,
                format!("Failed to parse response from {}: {}", path, e),
            )
        })
    }
}

/// `https://host` without trailing slash, scheme added when missing
pub fn normalize_base_url(server: &str) -> String {
    let trimmed = server.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
