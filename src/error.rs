#![cfg(feature = "web")]
//! Mapping from domain failures to HTTP responses.
//!
//! Every handler returns [`ApiResult`]; the error half is rendered as a JSON
//! body of the form `{"error": "<message>"}` with a matching status code.
//! Internal failures are logged and replaced by a generic message so that
//! file paths and I/O details never reach the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::graph::ChartError;
use crate::loader::LoadError;
use crate::login::AuthError;
use crate::report::RenderError;
use crate::saving::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error, PartialEq)]
pub enum ApiError {
    /// The request itself is malformed (400)
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid or expired credentials (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Unknown session or resource (404)
    #[error("{0}")]
    NotFound(String),

    /// Username or email already in use (409)
    #[error("{0}")]
    Conflict(String),

    /// The resource exists but cannot be rendered (422)
    #[error("{0}")]
    Render(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                error!("internal error: {detail}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

impl From<LoadError> for ApiError {
    fn from(e: LoadError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            // Authenticated names are validated at registration, so this only
            // happens for accounts edited by hand.
            StoreError::InvalidUser(_) => ApiError::NotFound("Session not found".to_string()),
            StoreError::Io(_) | StoreError::Corrupt { .. } | StoreError::Poisoned => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::EmptySession => ApiError::Render(e.to_string()),
            RenderError::Pdf(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ChartError> for ApiError {
    fn from(e: ChartError) -> Self {
        match e {
            ChartError::UnknownKind(_) => ApiError::NotFound(e.to_string()),
            ChartError::NoData => ApiError::Render(e.to_string()),
            ChartError::Draw(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::MissingToken | AuthError::InvalidToken => {
                ApiError::Unauthorized(e.to_string())
            }
            AuthError::InvalidInput(_) => ApiError::Validation(e.to_string()),
            AuthError::UsernameTaken | AuthError::EmailTaken => ApiError::Conflict(e.to_string()),
            AuthError::Storage(_) | AuthError::Hashing => ApiError::Internal(e.to_string()),
        }
    }
}
