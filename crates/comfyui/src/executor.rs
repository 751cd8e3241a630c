//! Drives one workflow through a ComfyUI backend.
//!
//! ```text
//! Idle ──submit──► Submitted ──poll──► Polling ──► Completed
//!                                         │  └───► Failed
//!                                         └──────► TimedOut ──► queue delete
//! ```
//!
//! Completion is detected by polling `/history/{prompt_id}` with the
//! backoff from [`crate::poll`]. The caller's deadline is checked before
//! every poll and also bounds each in-flight request.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::api::ComfyUIApiError;
use crate::backend::ComfyUIBackend;
use crate::history::{find_entry, HistoryEntry};
use crate::poll::{next_interval, PollConfig};

/// Upper bound on the best-effort queue delete after a timeout.
pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures while executing a workflow or collecting its images.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The backend could not be reached.
    #[error("Failed to connect to ComfyUI: {0}")]
    Connection(String),

    /// The backend refused or garbled the submission.
    #[error("{0}")]
    Submission(String),

    /// The workflow ran and failed, or its history could not be read.
    #[error("{0}")]
    Execution(String),

    #[error(
        "Workflow execution timed out after {:.1}s (limit {}s)",
        .elapsed.as_secs_f64(),
        .limit.as_secs_f64()
    )]
    Timeout { elapsed: Duration, limit: Duration },

    /// Produced images could not be fetched or encoded.
    #[error("Failed to extract images: {0}")]
    Extraction(String),
}

impl ExecutorError {
    /// Map a transport-level failure to [`ExecutorError::Connection`] and
    /// anything else through `other`.
    fn from_api(err: ComfyUIApiError, other: impl FnOnce(ComfyUIApiError) -> Self) -> Self {
        if err.is_connection() {
            Self::Connection(err.to_string())
        } else {
            other(err)
        }
    }
}

/// Executes a single workflow on a backend session.
///
/// Each executor carries its own client ID, so events and queue entries of
/// concurrent jobs never mix.
pub struct WorkflowExecutor<B> {
    backend: B,
    poll: PollConfig,
    client_id: String,
}

impl<B: ComfyUIBackend> WorkflowExecutor<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            poll: PollConfig::default(),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Submit `workflow` and wait for it to finish within `timeout`.
    ///
    /// The deadline clock starts before submission and bounds every backend
    /// request, so a backend that accepts connections but never answers
    /// still times out. On success the history entry is returned unmodified.
    pub async fn execute_workflow(
        &self,
        workflow: &Value,
        timeout: Duration,
    ) -> Result<HistoryEntry, ExecutorError> {
        let started = Instant::now();
        let deadline = started + timeout;

        let prompt_id = match tokio::time::timeout_at(deadline, self.submit(workflow)).await {
            Ok(result) => result?,
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Workflow submission timed out",
                );
                return Err(ExecutorError::Timeout {
                    elapsed,
                    limit: timeout,
                });
            }
        };
        tracing::info!(prompt_id = %prompt_id, "Workflow queued");

        let waited = tokio::time::timeout_at(
            deadline,
            self.wait_for_completion(&prompt_id, started, timeout),
        )
        .await;
        let entry = match waited {
            Ok(result) => result?,
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::error!(
                    prompt_id = %prompt_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Workflow execution timed out waiting for history",
                );
                self.cancel(&prompt_id).await;
                return Err(ExecutorError::Timeout {
                    elapsed,
                    limit: timeout,
                });
            }
        };
        tracing::info!(
            prompt_id = %prompt_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workflow completed",
        );
        Ok(entry)
    }

    /// Queue `workflow` and return its prompt ID.
    pub async fn submit(&self, workflow: &Value) -> Result<String, ExecutorError> {
        let response = self
            .backend
            .submit_workflow(workflow, &self.client_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Workflow submission failed");
                ExecutorError::from_api(e, |e| match e {
                    ComfyUIApiError::ApiError { status, body } => ExecutorError::Submission(
                        format!("ComfyUI returned status {status}: {body}"),
                    ),
                    other => ExecutorError::Submission(format!("Invalid /prompt response: {other}")),
                })
            })?;

        match response.prompt_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ExecutorError::Submission(
                "No prompt_id in ComfyUI response".to_string(),
            )),
        }
    }

    /// Poll until `prompt_id` appears in the history or `limit` has passed
    /// since `started`.
    ///
    /// On timeout the prompt is removed from the backend queue on a
    /// best-effort basis.
    pub async fn wait_for_completion(
        &self,
        prompt_id: &str,
        started: Instant,
        limit: Duration,
    ) -> Result<HistoryEntry, ExecutorError> {
        let mut interval = self.poll.initial_interval;
        let mut polls = 0u32;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                tracing::error!(
                    prompt_id,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Workflow execution timed out",
                );
                self.cancel(prompt_id).await;
                return Err(ExecutorError::Timeout { elapsed, limit });
            }

            polls += 1;
            let history = self.backend.get_history(prompt_id).await.map_err(|e| {
                tracing::error!(prompt_id, error = %e, "Failed to get history");
                ExecutorError::from_api(e, |e| match e {
                    ComfyUIApiError::ApiError { status, .. } => {
                        ExecutorError::Execution(format!("Failed to get history: status {status}"))
                    }
                    other => ExecutorError::Execution(format!("Failed to get history: {other}")),
                })
            })?;

            let entry = find_entry(&history, prompt_id).map_err(|e| {
                ExecutorError::Execution(format!("Malformed history entry: {e}"))
            })?;

            if let Some(entry) = entry {
                let errors = entry.node_errors();
                if !errors.is_empty() {
                    let message = errors.join("; ");
                    tracing::error!(prompt_id, errors = %message, "Workflow execution failed");
                    return Err(ExecutorError::Execution(format!(
                        "Workflow execution failed: {message}"
                    )));
                }
                tracing::debug!(prompt_id, polls, "Prompt found in history");
                return Ok(entry);
            }

            tracing::trace!(
                prompt_id,
                polls,
                interval_ms = interval.as_millis() as u64,
                "Prompt still running",
            );
            tokio::time::sleep(interval).await;
            interval = next_interval(interval, &self.poll);
        }
    }

    /// Ask the backend to drop `prompt_id`. Failures are logged, not returned.
    ///
    /// Gives up after [`CANCEL_TIMEOUT`].
    pub async fn cancel(&self, prompt_id: &str) {
        match tokio::time::timeout(CANCEL_TIMEOUT, self.backend.cancel_execution(prompt_id)).await
        {
            Ok(Ok(())) => tracing::info!(prompt_id, "Removed timed-out prompt from queue"),
            Ok(Err(e)) => tracing::warn!(
                prompt_id,
                error = %e,
                "Failed to remove timed-out prompt from queue",
            ),
            Err(_) => tracing::warn!(
                prompt_id,
                "Backend did not answer the queue delete in time",
            ),
        }
    }
}
