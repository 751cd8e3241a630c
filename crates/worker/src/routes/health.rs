use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use imagegen_comfyui::backend::BackendFactory;
use serde::Serialize;

use crate::handler::JobHandler;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall worker status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether ComfyUI answers `/system_stats`.
    pub backend_healthy: bool,
    /// Whether the default workflow loaded at startup.
    pub default_workflow_loaded: bool,
}

/// GET /health -- returns worker and backend health.
async fn health_check<F: BackendFactory>(
    State(handler): State<Arc<JobHandler<F>>>,
) -> Json<HealthResponse> {
    let backend_healthy = handler.backends().is_healthy().await;

    let status = if backend_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        backend_healthy,
        default_workflow_loaded: handler.default_workflow().is_loaded(),
    })
}

/// Mount health check routes.
pub fn router<F: BackendFactory>() -> Router<Arc<JobHandler<F>>> {
    Router::new().route("/health", get(health_check::<F>))
}
