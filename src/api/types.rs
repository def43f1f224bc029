//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::automation::JobParameters;
use crate::error::{Result, ServerError};

// ============================================================================
// Request Types
// ============================================================================

/// Body of the bundle and activity provisioning endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRequest {
    pub zip_file_name: String,
    pub engine: String,
}

/// A dimension sent either as a number or as numeric text
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Dimension {
    Number(f64),
    Text(String),
}

impl Dimension {
    fn value(&self, name: &str) -> Result<f64> {
        match self {
            Dimension::Number(n) => Ok(*n),
            Dimension::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| ServerError::InvalidRequest(format!("{} is not a number: '{}'", name, s))),
        }
    }
}

/// The `data` field of `startworkitem`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkItemData {
    pub activity_name: String,
    #[serde(default)]
    pub width: Option<Dimension>,
    #[serde(default)]
    pub height: Option<Dimension>,
    #[serde(default)]
    pub brower_connection_id: Option<String>,
}

impl StartWorkItemData {
    pub fn parameters(&self) -> Result<Option<JobParameters>> {
        job_parameters(
            self.width.as_ref().map(|w| w.value("width")).transpose()?,
            self.height.as_ref().map(|h| h.value("height")).transpose()?,
        )
    }
}

/// Query of the document job endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentJobQuery {
    /// Document href
    pub id: String,
    #[serde(default)]
    pub brower_connection_id: Option<String>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

impl DocumentJobQuery {
    pub fn parameters(&self) -> Result<Option<JobParameters>> {
        job_parameters(self.width, self.height)
    }
}

fn job_parameters(width: Option<f64>, height: Option<f64>) -> Result<Option<JobParameters>> {
    match (width, height) {
        (Some(width), Some(height)) => Ok(Some(JobParameters { width, height })),
        (None, None) => Ok(None),
        _ => Err(ServerError::InvalidRequest(
            "width and height must be given together".to_string(),
        )),
    }
}

/// Query of the object job callback
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackQuery {
    /// Browser session
    pub id: Option<String>,
    pub bucket_key: Option<String>,
    pub output_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBucketRequest {
    pub bucket_key: String,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct WorkItemResponse {
    #[serde(rename = "WorkItemId")]
    pub work_item_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    #[serde(rename = "Activity")]
    pub activity: String,
}

/// Node of the browser's bucket tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub children: bool,
}

impl TreeNode {
    pub fn bucket(bucket_key: &str) -> Self {
        Self {
            id: bucket_key.to_string(),
            text: bucket_key.to_string(),
            node_type: "bucket".to_string(),
            children: true,
        }
    }

    pub fn object(urn: String, object_key: &str) -> Self {
        Self {
            id: urn,
            text: object_key.to_string(),
            node_type: "object".to_string(),
            children: false,
        }
    }
}
