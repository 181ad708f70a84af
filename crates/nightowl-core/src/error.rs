use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure, surfaced to clients in
/// `bad_request` and `validation_error` responses.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDetail {
    pub field: String,
    pub message: String,
}

impl FieldDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The error taxonomy from the error handling design: one variant per row,
/// mapped to its HTTP status exactly once, at the edge.
#[derive(Debug, Error)]
pub enum NightOwlError {
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        details: Vec<FieldDetail>,
    },
    #[error("validation failed")]
    Validation { details: Vec<FieldDetail> },
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl NightOwlError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn validation(details: Vec<FieldDetail>) -> Self {
        Self::Validation { details }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::Validation { .. } => "validation_error",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for NightOwlError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let (message, details, retry_after) = match &self {
            Self::BadRequest { message, details } => (message.clone(), details.clone(), None),
            Self::Validation { details } => ("validation failed".to_string(), details.clone(), None),
            Self::RateLimited { retry_after_secs } => (
                self.to_string(),
                Vec::new(),
                Some(*retry_after_secs),
            ),
            Self::Internal(_) => ("internal server error".to_string(), Vec::new(), None),
            other => (other.to_string(), Vec::new(), None),
        };
        let body = ErrorBody {
            kind,
            message,
            details,
            retry_after,
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, NightOwlError>;
