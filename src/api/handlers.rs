//! Provisioning, job and callback handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::types::*;
use super::AppState;
use crate::automation::{BundleRef, CallbackTarget, JobSource, SubmitRequest};
use crate::encoding::decode_segment;
use crate::error::{Result, ServerError};
use crate::forge::auth::require_session_token;

// ============================================================================
// Helper Functions
// ============================================================================

/// An uploaded file part
pub(crate) struct UploadedFile {
    pub file_name: String,
    pub content: Bytes,
}

/// Collect the named text fields and the `inputFile` part of a multipart form
pub(crate) async fn read_form(mut multipart: Multipart) -> Result<(Vec<(String, String)>, Option<UploadedFile>)> {
    let mut fields = Vec::new();
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(format!("Malformed form: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "inputFile" {
            let file_name = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| ServerError::InvalidRequest("inputFile has no file name".to_string()))?;
            let content = field
                .bytes()
                .await
                .map_err(|e| ServerError::InvalidRequest(format!("Reading inputFile: {}", e)))?;
            file = Some(UploadedFile { file_name, content });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ServerError::InvalidRequest(format!("Reading {}: {}", name, e)))?;
            fields.push((name, value));
        }
    }

    Ok((fields, file))
}

pub(crate) fn form_field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty())
}

/// Rebuild a document target from encoded callback path segments
fn document_target(user: &str, project: &str, item: &str, storage: &str, file: &str) -> Result<CallbackTarget> {
    CallbackTarget::document(
        decode_segment(user)?,
        decode_segment(project)?,
        decode_segment(item)?,
        decode_segment(storage)?,
        decode_segment(file)?,
    )
}

// ============================================================================
// Provisioning Handlers
// ============================================================================

/// GET /api/appbundles - Names of the local bundle packages
pub async fn local_bundles(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.registry.bundles().list().await?))
}

/// GET /api/forge/designautomation/engines
pub async fn engines(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.registry.engines().await?))
}

/// POST /api/forge/designautomation/appbundles
pub async fn create_app_bundle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DefinitionRequest>,
) -> Result<Json<BundleRef>> {
    let bundle = state
        .registry
        .ensure_bundle(&request.zip_file_name, &request.engine)
        .await?;
    Ok(Json(bundle))
}

/// POST /api/forge/designautomation/activities
pub async fn create_activity(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DefinitionRequest>,
) -> Result<Json<ActivityResponse>> {
    let activity = state
        .registry
        .ensure_activity(&request.zip_file_name, &request.engine)
        .await?;
    Ok(Json(ActivityResponse {
        activity: activity.label().to_string(),
    }))
}

/// GET /api/forge/designautomation/activities
pub async fn defined_activities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.registry.defined_activities().await?))
}

/// DELETE /api/forge/designautomation/account
pub async fn clear_account(State(state): State<Arc<AppState>>) -> Result<StatusCode> {
    state.registry.clear_account().await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Job Handlers
// ============================================================================

/// POST /api/forge/designautomation/startworkitem - Run an activity on an
/// uploaded file
pub async fn start_work_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<WorkItemResponse>> {
    let token = require_session_token(&headers)?;
    let (fields, file) = read_form(multipart).await?;

    let file = file.ok_or_else(|| ServerError::InvalidRequest("Missing inputFile".to_string()))?;
    let data = form_field(&fields, "data")
        .ok_or_else(|| ServerError::InvalidRequest("Missing data".to_string()))?;
    let data: StartWorkItemData = serde_json::from_str(data)
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid data: {}", e)))?;

    let request = SubmitRequest {
        activity_id: format!("{}.{}", state.settings.nickname, data.activity_name),
        parameters: data.parameters()?,
        source: JobSource::Upload {
            file_name: file.file_name,
            content: file.content,
        },
        session_id: data.brower_connection_id,
    };

    let job = state.orchestrator.submit(&token, request).await?;
    Ok(Json(WorkItemResponse {
        work_item_id: job.work_item_id,
    }))
}

/// GET /api/forge/designautomation/testing - Resize the tip version of a
/// document and store the result as a new version
pub async fn start_document_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DocumentJobQuery>,
) -> Result<Json<WorkItemResponse>> {
    let token = require_session_token(&headers)?;

    let request = SubmitRequest {
        activity_id: state.settings.update_family_activity(),
        parameters: query.parameters()?,
        source: JobSource::Document { href: query.id },
        session_id: query.brower_connection_id,
    };

    let job = state.orchestrator.submit(&token, request).await?;
    Ok(Json(WorkItemResponse {
        work_item_id: job.work_item_id,
    }))
}

// ============================================================================
// Callback Handlers
// ============================================================================
//
// The automation service only needs to know the callback arrived; whatever
// happens afterwards is reported to the browser and the log, and the
// response is always 200.

/// POST /api/forge/callback/designautomation - Upload job finished
pub async fn on_object_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    body: String,
) -> StatusCode {
    let Some(object_name) = query.output_file_name.filter(|n| !n.is_empty()) else {
        tracing::warn!("Ignoring callback without an output file name");
        return StatusCode::OK;
    };
    let target = CallbackTarget::Object {
        bucket_key: query
            .bucket_key
            .unwrap_or_else(|| state.settings.staging_bucket()),
        object_name,
    };
    let session = query.id.unwrap_or_default();

    let report = state.orchestrator.on_callback(&target, &session, &body).await;
    tracing::info!(
        work_item = ?report.work_item_id,
        status = ?report.status,
        state = ?report.state,
        failed = ?report.failed_steps(),
        delivered = report.delivered,
        "handled callback"
    );
    StatusCode::OK
}

/// POST /api/forge/callback/designautomation/revit/:session/:user/:project/:item/:storage/:file
/// - Document job finished
pub async fn on_document_callback(
    State(state): State<Arc<AppState>>,
    Path((session, user, project, item, storage, file)): Path<(String, String, String, String, String, String)>,
    body: String,
) -> StatusCode {
    let target = match document_target(&user, &project, &item, &storage, &file) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!("Ignoring callback with malformed identifiers: {}", e);
            return StatusCode::OK;
        }
    };

    let report = state.orchestrator.on_callback(&target, &session, &body).await;
    tracing::info!(
        work_item = ?report.work_item_id,
        status = ?report.status,
        state = ?report.state,
        failed = ?report.failed_steps(),
        delivered = report.delivered,
        "handled document callback"
    );
    StatusCode::OK
}

/// Health check endpoint
pub async fn health() -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
    .into_response()
}
