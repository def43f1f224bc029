//! Server configuration.
//!
//! Everything comes from environment variables; `Settings::from_lookup` takes
//! any key lookup so tests never touch the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::{Result, ServerError};

/// Default base URL of the vendor REST APIs
pub const DEFAULT_API_BASE: &str = "https://developer.api.autodesk.com";

/// Default alias every provisioned definition points at
pub const DEFAULT_ALIAS: &str = "dev";

/// Activity used by the document (re-version) flow
pub const UPDATE_FAMILY_ACTIVITY: &str = "UpdateFamilyActivity";

/// Server settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Application client id
    pub client_id: String,
    /// Application client secret, used for service (two-legged) tokens
    pub client_secret: SecretString,
    /// Prefix for bundles and activities; falls back to the client id
    pub nickname: String,
    /// Alias for provisioned definitions (e.g. dev, stg, prod)
    pub alias: String,
    /// Public base URL the automation service calls back on
    pub webhook_url: String,
    /// Base URL of the vendor APIs
    pub api_base: String,
    /// Region segment of the automation API
    pub da_region: String,
    /// Local folder holding `<name>.zip` bundle packages
    pub bundles_path: PathBuf,
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Lifetime of signed download URLs handed to the browser
    pub signed_url_minutes: u32,
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| ServerError::Config(format!("{} is not set", key)))
        };

        let client_id = require("FORGE_CLIENT_ID")?;
        let client_secret = SecretString::from(require("FORGE_CLIENT_SECRET")?);
        let webhook_url = require("FORGE_WEBHOOK_URL")?
            .trim_end_matches('/')
            .to_string();
        let nickname = get("FORGE_DESIGN_AUTOMATION_NICKNAME").unwrap_or_else(|| client_id.clone());

        let bind_addr = match get("DA_BIND_ADDR") {
            Some(addr) => addr
                .parse()
                .map_err(|e| ServerError::Config(format!("DA_BIND_ADDR '{}': {}", addr, e)))?,
            None => SocketAddr::from(([127, 0, 0, 1], 3000)),
        };

        let signed_url_minutes = match get("DA_SIGNED_URL_MINUTES") {
            Some(v) => v
                .parse()
                .map_err(|e| ServerError::Config(format!("DA_SIGNED_URL_MINUTES '{}': {}", v, e)))?,
            None => 10,
        };

        Ok(Self {
            client_id,
            client_secret,
            nickname,
            alias: get("DA_ALIAS").unwrap_or_else(|| DEFAULT_ALIAS.to_string()),
            webhook_url,
            api_base: get("FORGE_API_BASE")
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            da_region: get("DA_REGION").unwrap_or_else(|| "us-east".to_string()),
            bundles_path: get("DA_BUNDLES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("wwwroot").join("bundles")),
            bind_addr,
            signed_url_minutes,
        })
    }

    /// `<nickname>.<name>+<alias>`
    pub fn qualified_id(&self, name: &str) -> String {
        format!("{}.{}+{}", self.nickname, name, self.alias)
    }

    /// Fully qualified id of the activity used by the document flow
    pub fn update_family_activity(&self) -> String {
        self.qualified_id(UPDATE_FAMILY_ACTIVITY)
    }

    /// Transient bucket that stages uploaded inputs and outputs
    pub fn staging_bucket(&self) -> String {
        format!("{}_designautomation", self.nickname.to_lowercase())
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings::from_lookup(|key| match key {
        "FORGE_CLIENT_ID" => Some("ClientId".to_string()),
        "FORGE_CLIENT_SECRET" => Some("secret".to_string()),
        "FORGE_DESIGN_AUTOMATION_NICKNAME" => Some("Sample".to_string()),
        "FORGE_WEBHOOK_URL" => Some("https://hooks.example.com/".to_string()),
        _ => None,
    })
    .unwrap()
}
