//! Signed-in user.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};

use super::AppState;
use crate::error::Result;
use crate::forge::auth::require_session_token;
use crate::forge::user::UserProfile;

/// GET /api/forge/user/profile
pub async fn profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<UserProfile>> {
    let token = require_session_token(&headers)?;
    Ok(Json(state.profiles.current_user(&token).await?))
}
