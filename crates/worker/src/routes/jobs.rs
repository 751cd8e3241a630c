use std::sync::Arc;

use axum::extract::State;
use axum::{routing::post, Json, Router};
use imagegen_comfyui::backend::BackendFactory;

use crate::handler::{JobHandler, JobRequest};
use crate::response::JobResponse;

/// POST /runsync -- run one job and return its envelope.
///
/// Always answers 200; failures are reported inside the error envelope.
async fn run_sync<F: BackendFactory>(
    State(handler): State<Arc<JobHandler<F>>>,
    Json(request): Json<JobRequest>,
) -> Json<JobResponse> {
    Json(handler.handle(request).await)
}

pub fn router<F: BackendFactory>() -> Router<Arc<JobHandler<F>>> {
    Router::new().route("/runsync", post(run_sync::<F>))
}
