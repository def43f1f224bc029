//! Signed-in user profile.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AccessToken, ForgeError, ForgeHttp};

/// Profile summary returned to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub name: String,
    pub picture: Option<String>,
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileImages {
    #[serde(default, rename = "sizeX40")]
    size_x40: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    user_id: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    profile_images: Option<ProfileImages>,
}

impl From<RawProfile> for UserProfile {
    fn from(raw: RawProfile) -> Self {
        Self {
            name: format!("{} {}", raw.first_name, raw.last_name).trim().to_string(),
            picture: raw.profile_images.and_then(|p| p.size_x40),
            id: raw.user_id,
        }
    }
}

#[async_trait]
pub trait UserProfiles: Send + Sync {
    async fn current_user(&self, token: &AccessToken) -> Result<UserProfile, ForgeError>;
}

pub struct UserProfileClient {
    http: Arc<ForgeHttp>,
}

impl UserProfileClient {
    pub fn new(http: Arc<ForgeHttp>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl UserProfiles for UserProfileClient {
    async fn current_user(&self, token: &AccessToken) -> Result<UserProfile, ForgeError> {
        let request = self
            .http
            .client()
            .get(self.http.url("userprofile/v1/users/@me"))
            .header("Authorization", token.bearer());
        let raw: RawProfile = self.http.send_json("GET users/@me", request).await?;
        Ok(raw.into())
    }
}
