//! Document version client.
//!
//! Resolves documents (items) in the document-management backend to their
//! current version and storage object, allocates storage slots for new
//! content and registers new versions.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AccessToken, ForgeError, ForgeHttp};

const JSON_API: &str = "application/vnd.api+json";

/// Extension type recorded on versions created by this server
const VERSION_EXTENSION: &str = "versions:autodesk.bim360:File";

/// A document addressed by project and item id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub project_id: String,
    pub item_id: String,
}

impl DocumentRef {
    /// Parse a document href such as
    /// `https://host/data/v1/projects/<project>/items/<item>`.
    ///
    /// The item is the last path segment and the project the third from last.
    pub fn parse_href(href: &str) -> Result<Self, ForgeError> {
        let parts: Vec<&str> = href.trim_end_matches('/').split('/').collect();
        if parts.len() < 3 {
            return Err(ForgeError::Identifier(format!("document href '{}'", href)));
        }

        let item_id = parts[parts.len() - 1];
        let project_id = parts[parts.len() - 3];
        if item_id.is_empty() || project_id.is_empty() {
            return Err(ForgeError::Identifier(format!("document href '{}'", href)));
        }

        Ok(Self {
            project_id: project_id.to_string(),
            item_id: item_id.to_string(),
        })
    }
}

/// Bucket/object pair behind a storage id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRef {
    pub bucket_key: String,
    pub object_name: String,
}

impl StorageRef {
    /// Parse `urn:adsk.objects:os.object:<bucket>/<object>`
    pub fn parse(storage_id: &str) -> Result<Self, ForgeError> {
        let parts: Vec<&str> = storage_id.split('/').collect();
        if parts.len() < 2 {
            return Err(ForgeError::Identifier(format!("storage id '{}'", storage_id)));
        }

        let object_name = parts[parts.len() - 1];
        let bucket_key = parts[parts.len() - 2].rsplit(':').next().unwrap_or_default();
        if object_name.is_empty() || bucket_key.is_empty() {
            return Err(ForgeError::Identifier(format!("storage id '{}'", storage_id)));
        }

        Ok(Self {
            bucket_key: bucket_key.to_string(),
            object_name: object_name.to_string(),
        })
    }
}

/// Item attributes needed to version it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub item_id: String,
    pub folder_id: String,
    pub display_name: String,
}

/// A version record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersion {
    pub item_id: String,
    pub version_id: String,
    pub version_number: Option<u32>,
    pub storage_id: Option<String>,
    pub last_modified_time: Option<String>,
    pub last_modified_user: Option<String>,
}

impl DocumentVersion {
    /// Storage object holding this version's content
    pub fn storage(&self) -> Result<StorageRef, ForgeError> {
        let id = self
            .storage_id
            .as_deref()
            .ok_or_else(|| ForgeError::Identifier(format!("version '{}' has no storage", self.version_id)))?;
        StorageRef::parse(id)
    }
}

/// A pre-allocated write target bound to a document's parent folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSlot {
    pub storage_id: String,
    pub storage: StorageRef,
    pub item_id: String,
    pub file_name: String,
}

// ---- wire shapes ----

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Relation {
    data: RelationData,
}

#[derive(Debug, Deserialize)]
struct RelationData {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemAttributes {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct ItemRelationships {
    parent: Relation,
}

#[derive(Debug, Deserialize)]
struct ItemData {
    id: String,
    attributes: ItemAttributes,
    relationships: ItemRelationships,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionAttributes {
    #[serde(default)]
    version_number: Option<u32>,
    #[serde(default)]
    last_modified_time: Option<String>,
    #[serde(default)]
    last_modified_user_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionRelationships {
    #[serde(default)]
    item: Option<Relation>,
    #[serde(default)]
    storage: Option<Relation>,
}

#[derive(Debug, Deserialize)]
struct VersionData {
    id: String,
    #[serde(default)]
    attributes: VersionAttributes,
    #[serde(default)]
    relationships: VersionRelationships,
}

impl VersionData {
    fn into_version(self, fallback_item: &str) -> DocumentVersion {
        DocumentVersion {
            item_id: self
                .relationships
                .item
                .map(|r| r.data.id)
                .unwrap_or_else(|| fallback_item.to_string()),
            version_id: self.id,
            version_number: self.attributes.version_number,
            storage_id: self.relationships.storage.map(|r| r.data.id),
            last_modified_time: self.attributes.last_modified_time,
            last_modified_user: self.attributes.last_modified_user_name,
        }
    }
}

/// Document-management backend operations used by the orchestrator
#[async_trait]
pub trait DocumentVersions: Send + Sync {
    /// Item display name and parent folder
    async fn get_item(&self, token: &AccessToken, doc: &DocumentRef) -> Result<ItemInfo, ForgeError>;

    /// Versions of an item, newest first
    async fn list_versions(&self, token: &AccessToken, doc: &DocumentRef) -> Result<Vec<DocumentVersion>, ForgeError>;

    /// Allocate a storage object in the item's parent folder under its display name
    async fn allocate_storage(
        &self,
        token: &AccessToken,
        project_id: &str,
        item: &ItemInfo,
    ) -> Result<StorageSlot, ForgeError>;

    /// Register the slot's content as a new version of its item
    async fn create_version(
        &self,
        token: &AccessToken,
        project_id: &str,
        slot: &StorageSlot,
        acting_user: Option<&str>,
    ) -> Result<DocumentVersion, ForgeError>;

    /// The tip version of an item
    async fn current_version(&self, token: &AccessToken, doc: &DocumentRef) -> Result<DocumentVersion, ForgeError> {
        self.list_versions(token, doc)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ForgeError::Identifier(format!("item '{}' has no versions", doc.item_id)))
    }
}

/// Data management REST client
pub struct DataManagementClient {
    http: Arc<ForgeHttp>,
}

impl DataManagementClient {
    pub fn new(http: Arc<ForgeHttp>) -> Self {
        Self { http }
    }

    fn project_url(&self, project_id: &str, rest: &[&str]) -> Result<Url, ForgeError> {
        let mut url = Url::parse(&self.http.url("data/v1/projects"))
            .map_err(|e| ForgeError::Identifier(format!("API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ForgeError::Identifier("API base cannot carry a path".to_string()))?
            .push(project_id)
            .extend(rest);
        Ok(url)
    }
}

#[async_trait]
impl DocumentVersions for DataManagementClient {
    async fn get_item(&self, token: &AccessToken, doc: &DocumentRef) -> Result<ItemInfo, ForgeError> {
        let url = self.project_url(&doc.project_id, &["items", &doc.item_id])?;
        let request = self.http.client().get(url).header("Authorization", token.bearer());
        let item: Envelope<ItemData> = self.http.send_json("GET item", request).await?;

        Ok(ItemInfo {
            item_id: item.data.id,
            folder_id: item.data.relationships.parent.data.id,
            display_name: item.data.attributes.display_name,
        })
    }

    async fn list_versions(&self, token: &AccessToken, doc: &DocumentRef) -> Result<Vec<DocumentVersion>, ForgeError> {
        let url = self.project_url(&doc.project_id, &["items", &doc.item_id, "versions"])?;
        let request = self.http.client().get(url).header("Authorization", token.bearer());
        let versions: Envelope<Vec<VersionData>> = self.http.send_json("GET item versions", request).await?;

        Ok(versions
            .data
            .into_iter()
            .map(|v| v.into_version(&doc.item_id))
            .collect())
    }

    async fn allocate_storage(
        &self,
        token: &AccessToken,
        project_id: &str,
        item: &ItemInfo,
    ) -> Result<StorageSlot, ForgeError> {
        let body = json!({
            "jsonapi": { "version": "1.0" },
            "data": {
                "type": "objects",
                "attributes": { "name": item.display_name },
                "relationships": {
                    "target": { "data": { "type": "folders", "id": item.folder_id } }
                }
            }
        });

        let url = self.project_url(project_id, &["storage"])?;
        let request = self
            .http
            .client()
            .post(url)
            .header("Authorization", token.bearer())
            .header("Content-Type", JSON_API)
            .body(body.to_string());
        let created: Envelope<RelationData> = self.http.send_json("POST storage", request).await?;

        let storage = StorageRef::parse(&created.data.id)?;
        tracing::debug!("Allocated storage {} for {}", created.data.id, item.display_name);

        Ok(StorageSlot {
            storage_id: created.data.id,
            storage,
            item_id: item.item_id.clone(),
            file_name: item.display_name.clone(),
        })
    }

    async fn create_version(
        &self,
        token: &AccessToken,
        project_id: &str,
        slot: &StorageSlot,
        acting_user: Option<&str>,
    ) -> Result<DocumentVersion, ForgeError> {
        let body = json!({
            "jsonapi": { "version": "1.0" },
            "data": {
                "type": "versions",
                "attributes": {
                    "name": slot.file_name,
                    "extension": { "type": VERSION_EXTENSION, "version": "1.0" }
                },
                "relationships": {
                    "item": { "data": { "type": "items", "id": slot.item_id } },
                    "storage": { "data": { "type": "objects", "id": slot.storage_id } }
                }
            }
        });

        let url = self.project_url(project_id, &["versions"])?;
        let mut request = self
            .http
            .client()
            .post(url)
            .header("Authorization", token.bearer())
            .header("Content-Type", JSON_API)
            .body(body.to_string());
        if let Some(user) = acting_user {
            request = request.header("x-user-id", user);
        }

        let created: Envelope<VersionData> = self.http.send_json("POST version", request).await?;
        Ok(created.data.into_version(&slot.item_id))
    }
}
