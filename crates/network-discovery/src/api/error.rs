//! API error handling.
//!
//! Every failure is rendered as `{"detail": "<message>"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::DiscoveryError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                msg
            }
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => msg,
        };

        (status, Json(Detail::new(message))).into_response()
    }
}

/// Policy-lifecycle failures as seen by a control-plane caller.
impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::AlreadyExists { .. } => ApiError::Conflict(err.to_string()),
            DiscoveryError::NoTargets { .. }
            | DiscoveryError::NoPoliciesFound
            | DiscoveryError::Malformed(_)
            | DiscoveryError::InvalidSchedule { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Body of every non-data response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Detail {
    pub detail: String,
}

impl Detail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
