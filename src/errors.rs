use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::TokenError;
use crate::proxy::RelayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("oauth error: {0}")]
    OAuth(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Timeout => AppError::UpstreamTimeout,
            RelayError::Unreachable | RelayError::InvalidJson => AppError::Upstream(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists => AppError::Conflict("username already exists".into()),
            StoreError::InvalidCredentials => AppError::InvalidCredentials,
            StoreError::Database(e) => AppError::Database(e),
            other => AppError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Validation(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                m.clone(),
            ),
            AppError::Unauthorized(m) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                m.clone(),
            ),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credentials",
                "invalid username or password".to_string(),
            ),
            // Existing clients expect 400 for a taken username.
            AppError::Conflict(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "conflict",
                m.clone(),
            ),
            AppError::NotFound(m) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "not_found",
                m.clone(),
            ),
            AppError::OAuth(m) => (
                StatusCode::BAD_REQUEST,
                "oauth_error",
                "oauth_failed",
                m.clone(),
            ),
            AppError::Upstream(m) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                m.clone(),
            ),
            AppError::UpstreamTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "upstream_error",
                "upstream_timeout",
                "upstream timed out".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::Unauthorized(_) | AppError::InvalidCredentials) {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
