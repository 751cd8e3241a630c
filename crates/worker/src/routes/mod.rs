//! Local job intake over HTTP.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::http::HeaderName;
use axum::Router;
use imagegen_comfyui::backend::BackendFactory;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handler::JobHandler;

/// Build the intake router with its middleware stack.
pub fn app<F: BackendFactory>(handler: Arc<JobHandler<F>>) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(health::router::<F>())
        .merge(jobs::router::<F>())
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(handler)
}
