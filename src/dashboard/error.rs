//! Dashboard error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::api::CommandResponse;
use crate::supervisor::RegistryError;

/// Errors that can occur while running the dashboard server.
#[derive(thiserror::Error, Debug)]
pub enum DashboardError {
    /// Failed to bind to address.
    #[error("Failed to bind to {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Server error.
    #[error("Server error: {0}")]
    ServerError(#[from] std::io::Error),
}

/// A registry error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self(err)
    }
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.0 {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::NotTerminal { .. } => StatusCode::CONFLICT,
            RegistryError::InvalidSource { .. } | RegistryError::InvalidDestination { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = CommandResponse::error("Request failed", self.0.to_string());
        (status, Json(body)).into_response()
    }
}
