//! Credential provider.
//!
//! Two kinds of bearer tokens reach the vendor APIs:
//! - the signed-in user's token, read from session state on each request
//! - a service token from the client-credentials grant, for calls made while
//!   handling the automation callback, where no user session exists

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ForgeError, ForgeHttp};
use crate::error::{Result, ServerError};

/// Cookie carrying the user's access token, set by the session layer
pub const SESSION_COOKIE: &str = "forge_session";

/// Scopes requested for the service token
pub const SERVICE_SCOPES: &str = "data:read data:write data:create bucket:create bucket:read code:all";

/// Tokens are refreshed this long before they actually expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token for the vendor APIs
#[derive(Clone)]
pub struct AccessToken {
    secret: SecretString,
    expires_at: Option<Instant>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(value.into()),
            expires_at: None,
        }
    }

    pub fn with_lifetime(value: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            secret: SecretString::from(value.into()),
            expires_at: Some(Instant::now() + lifetime),
        }
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.expose())
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + EXPIRY_MARGIN >= at,
            None => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Extract the session token from request headers.
///
/// An explicit `Authorization: Bearer` header wins over the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<AccessToken> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(AccessToken::new(token));
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| AccessToken::new(value))
}

/// Like [`token_from_headers`] but fails the request when no session exists
pub fn require_session_token(headers: &HeaderMap) -> Result<AccessToken> {
    token_from_headers(headers).ok_or(ServerError::AuthRequired)
}

/// Source of app-level tokens
#[async_trait]
pub trait ServiceCredentials: Send + Sync {
    async fn service_token(&self) -> std::result::Result<AccessToken, ForgeError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Client-credentials grant with an in-memory cache
pub struct ClientCredentials {
    http: Arc<ForgeHttp>,
    client_id: String,
    client_secret: SecretString,
    cached: RwLock<Option<AccessToken>>,
}

impl ClientCredentials {
    pub fn new(http: Arc<ForgeHttp>, client_id: String, client_secret: SecretString) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            cached: RwLock::new(None),
        }
    }

    fn cached_token(&self) -> Option<AccessToken> {
        self.cached
            .read()
            .as_ref()
            .filter(|t| !t.is_expired())
            .cloned()
    }
}

#[async_trait]
impl ServiceCredentials for ClientCredentials {
    async fn service_token(&self) -> std::result::Result<AccessToken, ForgeError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let request = self
            .http
            .client()
            .post(self.http.url("authentication/v2/token"))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials"), ("scope", SERVICE_SCOPES)]);

        let response: TokenResponse = self.http.send_json("POST token", request).await?;
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3599));
        let token = AccessToken::with_lifetime(response.access_token, lifetime);

        tracing::debug!("Obtained service token valid for {:?}", lifetime);
        *self.cached.write() = Some(token.clone());
        Ok(token)
    }
}
