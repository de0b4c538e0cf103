//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::error::CatalogError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A write reached the artefact repo but failed
    #[error("failed to update artefacts: {0}")]
    UpdateFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Map a failed write; anything but a path problem is an update failure
    pub fn from_write(err: CatalogError) -> Self {
        match err {
            CatalogError::PathNotFound { .. }
            | CatalogError::EmptyRepository
            | CatalogError::InvalidPath { .. } => err.into(),
            other => {
                tracing::error!("Artefact write failed: {}", other);
                Self::UpdateFailed(other.to_string())
            }
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpdateFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::PathNotFound { path } => Self::NotFound(path),
            CatalogError::EmptyRepository => Self::NotFound(String::new()),
            CatalogError::InvalidPath { segment } => {
                Self::BadRequest(format!("invalid path segment {:?}", segment))
            }
            other => {
                tracing::error!("Request failed: {}", other);
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // details go to the log, not the client
        let body = match &self {
            Self::NotFound(_) => "not found".to_string(),
            Self::BadRequest(message) => message.clone(),
            Self::UpdateFailed(_) => "failed to update artefacts".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        };

        (self.status_code(), body).into_response()
    }
}
