//! Bucket and object browsing.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::HeaderMap,
    Json,
};

use super::handlers::{form_field, read_form};
use super::types::{CreateBucketRequest, TreeNode, TreeQuery};
use super::AppState;
use crate::encoding::encode_urn;
use crate::error::{Result, ServerError};
use crate::forge::auth::require_session_token;
use crate::storage::{object_base_name, BucketInfo, ObjectInfo, RetentionPolicy};

/// Tree id of the root node
const ROOT_ID: &str = "#";

/// GET /api/forge/oss/buckets?id=# lists buckets, ?id=<bucketKey> lists the
/// bucket's objects
pub async fn tree(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<TreeNode>>> {
    let token = require_session_token(&headers)?;

    let nodes = if query.id == ROOT_ID {
        state
            .blobs
            .list_buckets(&token)
            .await?
            .iter()
            .map(|b| TreeNode::bucket(&b.bucket_key))
            .collect()
    } else {
        state
            .blobs
            .list_objects(&token, &query.id)
            .await?
            .iter()
            .map(|o| TreeNode::object(encode_urn(&o.object_id), &o.object_key))
            .collect()
    };

    Ok(Json(nodes))
}

/// POST /api/forge/oss/buckets
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateBucketRequest>,
) -> Result<Json<BucketInfo>> {
    let token = require_session_token(&headers)?;
    let bucket = state
        .blobs
        .create_bucket(&token, &request.bucket_key, RetentionPolicy::Transient)
        .await?;
    Ok(Json(bucket))
}

/// POST /api/forge/oss/objects - Upload one file into a bucket
pub async fn upload_object(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<ObjectInfo>> {
    let token = require_session_token(&headers)?;
    let (fields, file) = read_form(multipart).await?;

    let bucket_key = form_field(&fields, "bucketKey")
        .ok_or_else(|| ServerError::InvalidRequest("BucketKey parameter was not provided.".to_string()))?;
    let file = file.ok_or_else(|| ServerError::InvalidRequest("Missing file to upload".to_string()))?;

    let object_name = object_base_name(&file.file_name)
        .ok_or_else(|| ServerError::InvalidRequest(format!("file name '{}'", file.file_name)))?
        .to_string();

    let object = state.blobs.put(&token, bucket_key, &object_name, file.content).await?;
    tracing::info!("Uploaded {} to {}", object_name, bucket_key);
    Ok(Json(object))
}
