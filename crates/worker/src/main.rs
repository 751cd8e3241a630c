use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use imagegen_comfyui::backend::{BackendFactory, HttpBackendFactory};
use imagegen_core::workflow::DefaultWorkflow;

use imagegen_worker::config::WorkerConfig;
use imagegen_worker::handler::JobHandler;
use imagegen_worker::{logging, oneshot, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;

    // --- Tracing ---
    logging::init(&config.log_level, config.log_format)?;
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        timeout_secs = config.default_timeout.as_secs(),
        "Loaded worker configuration",
    );

    // --- Default workflow ---
    let default_workflow = DefaultWorkflow::load(&config.default_workflow_path);

    // --- Backend ---
    let backends = HttpBackendFactory::new(config.comfyui_url.clone());
    if backends.is_healthy().await {
        tracing::info!("ComfyUI health check passed");
    } else {
        tracing::warn!(
            comfyui_url = %config.comfyui_url,
            "ComfyUI is not reachable yet; jobs will fail until it is",
        );
    }

    let handler = Arc::new(JobHandler::new(
        backends,
        default_workflow,
        config.default_timeout,
    ));

    // --- One-shot mode ---
    if let Some(path) = &config.job_input_path {
        let response = oneshot::run_job_file(&handler, path).await?;
        println!("{}", serde_json::to_string(&response)?);
        if !response.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("HOST must be an IP address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting job intake");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, routes::app(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
