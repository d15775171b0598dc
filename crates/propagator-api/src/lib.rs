use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use propagator_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Failure body returned by every API error, shaped after the API-server
/// `Status` object.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusBody {
    pub kind: &'static str, // always "Status"
    pub status: &'static str, // always "Failure"
    pub reason: &'static str,
    pub message: String,
    pub code: u16,
}

impl StatusBody {
    pub fn failure(reason: &'static str, message: impl Into<String>, code: StatusCode) -> Self {
        Self {
            kind: "Status",
            status: "Failure",
            reason,
            message: message.into(),
            code: code.as_u16(),
        }
    }
}

/// High-level API errors mapped to HTTP responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn unprocessable_entity(msg: impl Into<String>) -> Self {
        Self::UnprocessableEntity(msg.into())
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::UnprocessableEntity(_) => "Invalid",
            ApiError::Unavailable(_) => "ServiceUnavailable",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn to_status_body(&self) -> StatusBody {
        let message = match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::UnprocessableEntity(m)
            | ApiError::Unavailable(m)
            | ApiError::Internal(m) => m.clone(),
        };
        StatusBody::failure(self.reason(), message, self.status_code())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::NotFound { .. } => ApiError::not_found(err.to_string()),
            StorageError::AlreadyExists { .. } | StorageError::VersionConflict { .. } => {
                ApiError::conflict(err.to_string())
            }
            StorageError::InvalidObject { .. } => ApiError::unprocessable_entity(err.to_string()),
            StorageError::Internal { .. } => ApiError::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::to_vec(&self.to_status_body()).unwrap_or_else(|_| b"{}".to_vec());

        axum::http::Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(axum::body::Body::from(body))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(axum::body::Body::from("{}"));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
