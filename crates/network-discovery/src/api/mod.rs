//! HTTP control plane.
//!
//! Routes live under `/api/v1`; handlers call straight into the
//! [`PolicyManager`].

pub mod error;
pub mod policies;
pub mod status;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::policy::PolicyManager;

pub use status::StatusInfo;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PolicyManager>,
    pub status: Arc<StatusInfo>,
}

impl AppState {
    pub fn new(manager: Arc<PolicyManager>, version: &str) -> Self {
        Self {
            manager,
            status: Arc::new(StatusInfo::new(version)),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/status", get(status::get_status))
        .route("/capabilities", get(status::get_capabilities))
        .route("/policies", post(policies::create_policies))
        .route("/policies/{policy}", delete(policies::delete_policy));

    Router::new()
        .nest("/api/v1", v1)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
