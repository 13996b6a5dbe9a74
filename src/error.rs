//! Error taxonomy for the ingestion pipeline.
//!
//! Classification drives behavior: transient errors are retried and may fall
//! back to stale cache entries, permanent errors fail fast, and per-field
//! errors are recorded in the batch result without stopping siblings.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failure classes a feed client can produce.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Network error, 5xx, 429 or timeout. Eligible for retry and for
    /// stale-cache fallback.
    #[error("transient feed failure: {0}")]
    Transient(String),
    /// Upstream has not published data for the requested window. Clients
    /// normally map this to an empty result set instead of returning it.
    #[error("no data published for the requested window")]
    NotFound,
    /// Malformed request, bad credentials, unparseable body. Never retried.
    #[error("permanent feed failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Stable label for logs and metrics.
    pub fn class(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::NotFound => "not_found",
            FetchError::Permanent(_) => "permanent",
        }
    }

    /// Classifies an HTTP status: 429 and 5xx are transient, 404 means the
    /// window is not published yet, other 4xx are permanent.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            FetchError::NotFound
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            FetchError::Transient(format!("{context}: upstream returned {status}"))
        } else {
            FetchError::Permanent(format!("{context}: upstream returned {status}"))
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            FetchError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::from_status(status, "request")
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

/// Terminal classification of one field within a batch run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldRunError {
    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("field has no usable boundary")]
    NoBoundary,
}

impl FieldRunError {
    pub fn class(&self) -> &'static str {
        match self {
            FieldRunError::Transient { .. } => "transient",
            FieldRunError::Permanent(_) => "permanent",
            FieldRunError::NoBoundary => "no_boundary",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Error surface for the HTTP trigger endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => ApiError::NotFound(format!("{kind} {id} not found")),
            StorageError::Backend(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": detail }))).into_response()
    }
}
