//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parlor_core::{AuthError, RouterError, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// JSON body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Both username and password are required")]
    MissingCredentials,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Username already registered: {0}")]
    Conflict(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingCredentials => StatusCode::BAD_REQUEST,
            ApiError::InvalidPassword | ApiError::InvalidSession => StatusCode::UNAUTHORIZED,
            ApiError::NotLoggedIn => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingCredentials => "MISSING_CREDENTIALS",
            ApiError::InvalidPassword => "INVALID_PASSWORD",
            ApiError::InvalidSession => "INVALID_SESSION",
            ApiError::NotLoggedIn => "NOT_LOGGED_IN",
            ApiError::Conflict(_) => "REGISTRATION_CONFLICT",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredentials => ApiError::MissingCredentials,
            AuthError::InvalidPassword => ApiError::InvalidPassword,
            AuthError::RegistrationConflict(name) => ApiError::Conflict(name),
            AuthError::Hashing(message) => ApiError::Internal(message),
            AuthError::Storage(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ApiError::Storage(error.to_string())
    }
}

impl From<RouterError> for ApiError {
    fn from(error: RouterError) -> Self {
        match error {
            RouterError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            crate::metrics::record_error("http");
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
