//! Policy create/delete handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    Json,
};

use crate::api::error::{ApiError, ApiResult, Detail};
use crate::api::AppState;
use crate::policy::PolicyManager;

pub const YAML_CONTENT_TYPE: &str = "application/x-yaml";

fn is_yaml(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(YAML_CONTENT_TYPE))
}

/// POST /api/v1/policies
///
/// Starts every policy in the document, or none of them.
pub async fn create_policies(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Detail>)> {
    if !is_yaml(&headers) {
        return Err(ApiError::BadRequest(format!(
            "invalid Content-Type. Only '{YAML_CONTENT_TYPE}' is supported"
        )));
    }

    let policies = PolicyManager::parse_policies(&body)?;
    tracing::info!(policies = ?policies.keys().collect::<Vec<_>>(), "Creating policies");

    let started = state.manager.start_policies(policies).await?;

    Ok((
        StatusCode::CREATED,
        Json(Detail::new(format!(
            "policies [{}] were started",
            started.join(",")
        ))),
    ))
}

/// DELETE /api/v1/policies/{policy}
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(policy): Path<String>,
) -> ApiResult<Json<Detail>> {
    let removed = state
        .manager
        .stop_policy(&policy)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !removed {
        return Err(ApiError::NotFound("policy not found".to_string()));
    }

    Ok(Json(Detail::new(format!("policy '{policy}' was deleted"))))
}
