//! One-shot mode: run a single job file and report its envelope.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use imagegen_comfyui::backend::BackendFactory;

use crate::handler::{JobHandler, JobRequest};
use crate::response::JobResponse;

/// Read a `{id?, input}` job from `path` and run it.
///
/// Errors only when the file cannot be read or is not a job document; job
/// failures come back as an error envelope.
pub async fn run_job_file<F: BackendFactory>(
    handler: &Arc<JobHandler<F>>,
    path: &Path,
) -> anyhow::Result<JobResponse> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let request: JobRequest = serde_json::from_str(&text)
        .with_context(|| format!("Job file {} is not a valid job document", path.display()))?;

    tracing::info!(path = %path.display(), "Running job from file");
    Ok(handler.handle(request).await)
}
