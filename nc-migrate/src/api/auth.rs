//! Token handling for the N-central API
//!
//! A user-generated JWT is exchanged once for an access/refresh token pair.
//! The access token is refreshed shortly before it expires.

use chrono::{Duration, Utc};
use log::debug;
use tokio::sync::RwLock;

use super::endpoints::paths;
use super::error::{ClientError, ClientErrorKind};
use super::models::{AuthResponse, AuthState, RefreshResponse};

pub struct AuthManager {
    base_url: String,
    http: reqwest::Client,
    state: RwLock<Option<AuthState>>,
}

impl AuthManager {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        AuthManager {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            state: RwLock::new(None),
        }
    }

    /// Exchange a JWT for API tokens
    pub async fn authenticate(&self, jwt: &str) -> Result<(), ClientError> {
        let url = format!("{}{}", self.base_url, paths::AUTH_AUTHENTICATE);
        let response = self.http.post(&url).bearer_auth(jwt.trim()).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let mut err = ClientError::from_status(status.as_u16(), &body);
            if status.as_u16() == 403 {
                // a rejected JWT comes back as 403 here
                err.kind = ClientErrorKind::Authentication;
            }
            return Err(err);
        }

        debug!("Auth response received, length: {}", body.len());
        let auth: AuthResponse = serde_json::from_str(&body).map_err(|e| {
            ClientError::new(
                ClientErrorKind::InvalidResponse,
                format!("Unexpected authentication response: {}", e),
            )
        })?;

        *self.state.write().await = Some(AuthState::from_response(auth, Utc::now()));
        Ok(())
    }

    /// A valid access token, refreshed if it is about to expire
    pub async fn token(&self) -> Result<String, ClientError> {
        let refresh_token = {
            let state = self.state.read().await;
            let now = Utc::now();
            match &*state {
                None => {
                    return Err(ClientError::new(
                        ClientErrorKind::Authentication,
                        "Not authenticated",
                    ));
                }
                Some(s) if s.is_refresh_expired(now) => {
                    return Err(ClientError::new(
                        ClientErrorKind::Authentication,
                        "Session expired, authenticate again",
                    ));
                }
                Some(s) if s.is_access_expired(now) => s.refresh_token.clone(),
                Some(s) => return Ok(s.access_token.clone()),
            }
        };

        self.refresh(&refresh_token).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, ClientError> {
        debug!("Refreshing access token for {}", self.base_url);
        let url = format!("{}{}", self.base_url, paths::AUTH_REFRESH);
        let response = self.http.post(&url).bearer_auth(refresh_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut err = ClientError::from_status(status.as_u16(), &body);
            if matches!(status.as_u16(), 401 | 403) {
                err.kind = ClientErrorKind::Authentication;
            }
            return Err(err);
        }

        let refreshed: RefreshResponse = response.json().await?;
        let access = refreshed.tokens.access;

        let mut state = self.state.write().await;
        if let Some(s) = state.as_mut() {
            s.access_token = access.token.clone();
            s.access_expires_at = Utc::now() + Duration::seconds(access.expires_in_seconds);
        }
        Ok(access.token)
    }

    pub async fn is_authenticated(&self) -> bool {
        match &*self.state.read().await {
            Some(s) => !s.is_refresh_expired(Utc::now()),
            None => false,
        }
    }
}
