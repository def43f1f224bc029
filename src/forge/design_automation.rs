//! Design automation (v3) client.
//!
//! Typed records for bundles, aliases, activities and work items, and the
//! `AutomationService` trait the registry and orchestrator are written
//! against. All calls run under the app's service token.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ForgeError, ForgeHttp, Page, ServiceCredentials};

/// HTTP verb the service uses for an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Head,
    Put,
    Post,
    Patch,
    Read,
}

/// Where and how to upload a bundle package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadParameters {
    #[serde(rename = "endpointURL")]
    pub endpoint_url: String,
    #[serde(rename = "formData", default)]
    pub form_data: BTreeMap<String, String>,
}

/// Request body for a bundle or bundle version
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppBundleSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub engine: String,
    pub description: String,
}

/// A created bundle version
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppBundle {
    pub version: u32,
    pub upload_parameters: UploadParameters,
}

/// A mutable alias pointing at a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub id: String,
    pub version: u32,
}

/// A declared activity parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityParameter {
    pub verb: Verb,
    pub local_name: String,
    pub required: bool,
    #[serde(default)]
    pub ondemand: bool,
    #[serde(default)]
    pub zip: bool,
    #[serde(default)]
    pub description: String,
}

/// A string setting made available to the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringSetting {
    pub value: String,
}

/// Activity definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub command_line: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ActivityParameter>,
    pub engine: String,
    #[serde(rename = "appbundles", default)]
    pub app_bundles: Vec<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, StringSetting>,
    #[serde(default)]
    pub description: String,
}

/// One named work item argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemArgument {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<Verb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl WorkItemArgument {
    /// An argument read or written with the given bearer header
    pub fn with_bearer(url: String, verb: Verb, bearer: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), bearer);
        Self {
            url,
            verb: Some(verb),
            headers: Some(headers),
        }
    }

    /// An inline argument (e.g. a `data:` URL)
    pub fn inline(url: String) -> Self {
        Self {
            url,
            verb: None,
            headers: None,
        }
    }

    /// Completion callback
    pub fn callback(url: String) -> Self {
        Self {
            url,
            verb: Some(Verb::Post),
            headers: None,
        }
    }
}

/// A job request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub activity_id: String,
    pub arguments: BTreeMap<String, WorkItemArgument>,
}

/// Work item status as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkItemStatus {
    Pending,
    Inprogress,
    Cancelled,
    FailedLimitDataSize,
    FailedLimitProcessingTime,
    FailedDownload,
    FailedInstructions,
    FailedUpload,
    FailedUploadOptional,
    Success,
    /// Any status this client does not know by name
    #[serde(other)]
    Unknown,
}

impl WorkItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkItemStatus::Success)
    }
}

/// Response to a work item submission
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemSubmission {
    pub id: String,
    pub status: WorkItemStatus,
}

/// Body of the completion callback
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemCallback {
    pub id: String,
    pub status: WorkItemStatus,
    #[serde(default)]
    pub report_url: Option<String>,
}

/// The design automation service
#[async_trait]
pub trait AutomationService: Send + Sync {
    /// Ids of all available engines
    async fn engines(&self) -> Result<Vec<String>, ForgeError>;

    /// Qualified ids of all bundles visible to the app
    async fn app_bundles(&self) -> Result<Vec<String>, ForgeError>;

    async fn create_app_bundle(&self, spec: &AppBundleSpec) -> Result<AppBundle, ForgeError>;

    async fn create_app_bundle_version(&self, name: &str, spec: &AppBundleSpec) -> Result<AppBundle, ForgeError>;

    async fn create_app_bundle_alias(&self, name: &str, alias: &Alias) -> Result<Alias, ForgeError>;

    async fn modify_app_bundle_alias(&self, name: &str, alias_id: &str, version: u32) -> Result<Alias, ForgeError>;

    /// Upload a bundle package to the location handed out with its version
    async fn upload_app_bundle(
        &self,
        params: &UploadParameters,
        file_name: &str,
        package: Bytes,
    ) -> Result<(), ForgeError>;

    /// Qualified ids of all activities visible to the app
    async fn activities(&self) -> Result<Vec<String>, ForgeError>;

    async fn create_activity(&self, spec: &Activity) -> Result<Activity, ForgeError>;

    async fn create_activity_alias(&self, name: &str, alias: &Alias) -> Result<Alias, ForgeError>;

    async fn create_work_item(&self, item: &WorkItem) -> Result<WorkItemSubmission, ForgeError>;

    /// Delete every bundle and activity owned by the app
    async fn delete_app(&self) -> Result<(), ForgeError>;
}

/// REST client for the automation service
pub struct DesignAutomationClient {
    http: Arc<ForgeHttp>,
    credentials: Arc<dyn ServiceCredentials>,
    region: String,
}

impl DesignAutomationClient {
    pub fn new(http: Arc<ForgeHttp>, credentials: Arc<dyn ServiceCredentials>, region: &str) -> Self {
        Self {
            http,
            credentials,
            region: region.to_string(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ForgeError> {
        let mut url = Url::parse(&self.http.url(&format!("da/{}/v3", self.region)))
            .map_err(|e| ForgeError::Identifier(format!("API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ForgeError::Identifier("API base cannot carry a path".to_string()))?
            .extend(segments);
        Ok(url)
    }

    async fn bearer(&self) -> Result<String, ForgeError> {
        Ok(self.credentials.service_token().await?.bearer())
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, url: Url) -> Result<T, ForgeError> {
        let request = self.http.client().get(url).header("Authorization", self.bearer().await?);
        self.http.send_json(endpoint, request).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        url: Url,
        body: &B,
    ) -> Result<T, ForgeError> {
        let request = self
            .http
            .client()
            .post(url)
            .header("Authorization", self.bearer().await?)
            .json(body);
        self.http.send_json(endpoint, request).await
    }

    /// Follow pagination tokens until the listing is exhausted
    async fn list_all(&self, endpoint: &str, collection: &str) -> Result<Vec<String>, ForgeError> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut url = self.url(&[collection])?;
            if let Some(page) = &token {
                url.query_pairs_mut().append_pair("page", page);
            }

            let page: Page<String> = self.get_json(endpoint, url).await?;
            ids.extend(page.data);

            match page.pagination_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl AutomationService for DesignAutomationClient {
    async fn engines(&self) -> Result<Vec<String>, ForgeError> {
        self.list_all("GET engines", "engines").await
    }

    async fn app_bundles(&self) -> Result<Vec<String>, ForgeError> {
        self.list_all("GET appbundles", "appbundles").await
    }

    async fn create_app_bundle(&self, spec: &AppBundleSpec) -> Result<AppBundle, ForgeError> {
        self.post_json("POST appbundles", self.url(&["appbundles"])?, spec).await
    }

    async fn create_app_bundle_version(&self, name: &str, spec: &AppBundleSpec) -> Result<AppBundle, ForgeError> {
        self.post_json(
            "POST appbundle version",
            self.url(&["appbundles", name, "versions"])?,
            spec,
        )
        .await
    }

    async fn create_app_bundle_alias(&self, name: &str, alias: &Alias) -> Result<Alias, ForgeError> {
        self.post_json(
            "POST appbundle alias",
            self.url(&["appbundles", name, "aliases"])?,
            alias,
        )
        .await
    }

    async fn modify_app_bundle_alias(&self, name: &str, alias_id: &str, version: u32) -> Result<Alias, ForgeError> {
        let request = self
            .http
            .client()
            .patch(self.url(&["appbundles", name, "aliases", alias_id])?)
            .header("Authorization", self.bearer().await?)
            .json(&serde_json::json!({ "version": version }));
        self.http.send_json("PATCH appbundle alias", request).await
    }

    async fn upload_app_bundle(
        &self,
        params: &UploadParameters,
        file_name: &str,
        package: Bytes,
    ) -> Result<(), ForgeError> {
        // The storage endpoint expects the policy fields before the file part.
        let mut form = Form::new();
        for (key, value) in &params.form_data {
            form = form.text(key.clone(), value.clone());
        }
        form = form.part("file", Part::bytes(package.to_vec()).file_name(file_name.to_string()));

        let request = self
            .http
            .client()
            .post(&params.endpoint_url)
            .header("Cache-Control", "no-cache")
            .multipart(form);
        self.http.send_empty("POST appbundle upload", request).await
    }

    async fn activities(&self) -> Result<Vec<String>, ForgeError> {
        self.list_all("GET activities", "activities").await
    }

    async fn create_activity(&self, spec: &Activity) -> Result<Activity, ForgeError> {
        self.post_json("POST activities", self.url(&["activities"])?, spec).await
    }

    async fn create_activity_alias(&self, name: &str, alias: &Alias) -> Result<Alias, ForgeError> {
        self.post_json(
            "POST activity alias",
            self.url(&["activities", name, "aliases"])?,
            alias,
        )
        .await
    }

    async fn create_work_item(&self, item: &WorkItem) -> Result<WorkItemSubmission, ForgeError> {
        self.post_json("POST workitems", self.url(&["workitems"])?, item).await
    }

    async fn delete_app(&self) -> Result<(), ForgeError> {
        let request = self
            .http
            .client()
            .delete(self.url(&["forgeapps", "me"])?)
            .header("Authorization", self.bearer().await?);
        self.http.send_empty("DELETE forgeapps/me", request).await
    }
}
