//! Errors returned by the N-central API client

use std::time::Duration;

/// Broad category of a client failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Connection, DNS or TLS failure
    Network,
    /// Bad or expired credentials (401, expired refresh token)
    Authentication,
    /// 429 after retries ran out
    RateLimited,
    NotFound,
    /// The server rejected the request body (400, 409, 422)
    Validation,
    /// Authenticated but not allowed (403)
    Permission,
    /// 5xx and anything else unexpected
    Server,
    Timeout,
    /// The body could not be read or parsed
    InvalidResponse,
}

impl ClientErrorKind {
    /// Map a non-success HTTP status to a kind
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ClientErrorKind::Authentication,
            403 => ClientErrorKind::Permission,
            404 => ClientErrorKind::NotFound,
            408 | 504 => ClientErrorKind::Timeout,
            429 => ClientErrorKind::RateLimited,
            400 | 409 | 422 => ClientErrorKind::Validation,
            _ => ClientErrorKind::Server,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ClientErrorKind::Network => "Network error",
            ClientErrorKind::Authentication => "Authentication failed",
            ClientErrorKind::RateLimited => "Rate limited",
            ClientErrorKind::NotFound => "Not found",
            ClientErrorKind::Validation => "Rejected by server",
            ClientErrorKind::Permission => "Permission denied",
            ClientErrorKind::Server => "Server error",
            ClientErrorKind::Timeout => "Request timed out",
            ClientErrorKind::InvalidResponse => "Invalid response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub detail: String,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Server-requested wait before retrying (`Retry-After`)
    pub retry_after: Option<Duration>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, detail: impl Into<String>) -> Self {
        ClientError {
            kind,
            detail: detail.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Error for a non-success response
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let detail = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            // error bodies can be whole HTML pages
            let snippet: String = body.chars().take(500).collect();
            format!("HTTP {}: {}", status, snippet)
        };
        ClientError {
            kind: ClientErrorKind::from_status(status),
            detail,
            status: Some(status),
            retry_after: None,
        }
    }

    /// Whether sending the same request again may succeed
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ClientErrorKind::RateLimited | ClientErrorKind::Timeout | ClientErrorKind::Network => true,
            ClientErrorKind::Server => self.status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.detail)
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ClientErrorKind::Timeout
        } else if e.is_decode() {
            ClientErrorKind::InvalidResponse
        } else if let Some(status) = e.status() {
            ClientErrorKind::from_status(status.as_u16())
        } else {
            ClientErrorKind::Network
        };
        ClientError {
            kind,
            detail: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
            retry_after: None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::new(ClientErrorKind::InvalidResponse, e.to_string())
    }
}
