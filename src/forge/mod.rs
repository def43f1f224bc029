//! Clients for the vendor REST APIs.
//!
//! Every response is read as text and decoded into a typed record, so a shape
//! mismatch fails at the call site with the endpoint name instead of somewhere
//! deep inside the caller.

pub mod auth;
pub mod data_management;
pub mod design_automation;
pub mod user;

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use auth::{AccessToken, ClientCredentials, ServiceCredentials};
pub use data_management::{DataManagementClient, DocumentVersions};
pub use design_automation::{AutomationService, DesignAutomationClient};
pub use user::{UserProfileClient, UserProfiles};

/// Maximum length of an error body kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors talking to the vendor APIs
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed identifier: {0}")]
    Identifier(String),
}

impl ForgeError {
    /// HTTP status returned by the API, if the call got that far
    pub fn status(&self) -> Option<u16> {
        match self {
            ForgeError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

/// Shared HTTP plumbing for all vendor clients.
#[derive(Clone)]
pub struct ForgeHttp {
    client: Client,
    base: String,
}

impl ForgeHttp {
    pub fn new(base: &str) -> Result<Self, ForgeError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ForgeError::Http {
                endpoint: "client setup".to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Absolute URL for a path below the API base
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<reqwest::Response, ForgeError> {
        let response = request.send().await.map_err(|source| ForgeError::Http {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(endpoint, %status, "vendor call failed");
            return Err(ForgeError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(response)
    }

    /// Send a request and decode the JSON body into `T`
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ForgeError> {
        let response = self.send(endpoint, request).await?;
        let text = response.text().await.map_err(|source| ForgeError::Http {
            endpoint: endpoint.to_string(),
            source,
        })?;

        decode(endpoint, &text)
    }

    /// Send a request whose response body is irrelevant
    pub async fn send_empty(&self, endpoint: &str, request: RequestBuilder) -> Result<(), ForgeError> {
        self.send(endpoint, request).await.map(|_| ())
    }

    /// Send a request and return the raw body
    pub async fn send_bytes(&self, endpoint: &str, request: RequestBuilder) -> Result<Bytes, ForgeError> {
        let response = self.send(endpoint, request).await?;
        response.bytes().await.map_err(|source| ForgeError::Http {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

/// Decode a JSON body, naming the endpoint on failure
pub fn decode<T: DeserializeOwned>(endpoint: &str, text: &str) -> Result<T, ForgeError> {
    serde_json::from_str(text).map_err(|source| ForgeError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// A paginated list of ids, as returned by the automation API
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination_token: Option<String>,
}
