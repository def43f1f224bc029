use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::forge::ForgeError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid engine: {0}")]
    UnknownEngine(String),

    #[error("Appbundle not found at {0}")]
    BundleNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication required")]
    AuthRequired,

    /// The vendor accepted a call but returned nothing usable
    #[error("{0}")]
    External(String),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::UnknownEngine(_) => StatusCode::BAD_REQUEST,
            ServerError::BundleNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::AuthRequired => StatusCode::UNAUTHORIZED,
            ServerError::External(_) | ServerError::Forge(_) => StatusCode::BAD_GATEWAY,
            ServerError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Storage(StorageError::AlreadyExists(_)) => StatusCode::CONFLICT,
            ServerError::Storage(_) => StatusCode::BAD_GATEWAY,
            ServerError::Io(_) => {
                tracing::error!("{}", self);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                    .into_response();
            }
        };

        tracing::warn!(%status, "request failed: {}", self);
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
