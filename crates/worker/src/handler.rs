//! The job handler: one request in, one response envelope out.
//!
//! ```text
//! validate input ─► pick workflow ─► check structure ─► apply overrides
//!      ─► submit + poll ─► extract images ─► success envelope
//! ```
//!
//! Every stage returns a typed error that is folded into [`JobError`] and
//! converted to the error envelope once, in [`JobHandler::handle`].

use std::sync::Arc;
use std::time::Duration;

use imagegen_comfyui::backend::BackendFactory;
use imagegen_comfyui::executor::{ExecutorError, WorkflowExecutor};
use imagegen_comfyui::images::{extract_images, EncodeOptions};
use imagegen_comfyui::poll::PollConfig;
use imagegen_core::error::CoreError;
use imagegen_core::input::validate_input;
use imagegen_core::overrides::apply_overrides;
use imagegen_core::workflow::{sampler_seed, validate_structure, DefaultWorkflow};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::JobError;
use crate::response::{round_secs, ErrorResponse, JobResponse, Metadata};

/// Job ID used in logs when the request carries none.
pub const UNKNOWN_JOB_ID: &str = "unknown";

/// A job as delivered by the intake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

/// Runs jobs against sessions opened from `F`.
///
/// Shared across concurrent jobs; nothing in it is mutated after startup.
pub struct JobHandler<F> {
    backends: F,
    default_workflow: DefaultWorkflow,
    timeout: Duration,
    poll: PollConfig,
}

impl<F: BackendFactory> JobHandler<F> {
    pub fn new(backends: F, default_workflow: DefaultWorkflow, timeout: Duration) -> Self {
        Self {
            backends,
            default_workflow,
            timeout,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn backends(&self) -> &F {
        &self.backends
    }

    pub fn default_workflow(&self) -> &DefaultWorkflow {
        &self.default_workflow
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one job to completion and produce its response envelope.
    ///
    /// The job runs on its own task inside a `job` span, so a panic is
    /// reported as an internal error instead of tearing down the caller.
    pub async fn handle(self: &Arc<Self>, request: JobRequest) -> JobResponse {
        let job_id = request
            .id
            .clone()
            .unwrap_or_else(|| UNKNOWN_JOB_ID.to_string());
        let span = tracing::info_span!("job", job_id = %job_id);

        let handler = Arc::clone(self);
        let task = tokio::spawn(
            async move { handler.run(request.input).await }.instrument(span.clone()),
        );

        let result = task.await.unwrap_or_else(|join_err| Err(job_task_error(join_err)));

        match result {
            Ok(response) => response,
            Err(err) => {
                span.in_scope(|| err.log(&job_id));
                ErrorResponse::from(err).into()
            }
        }
    }

    /// The job pipeline. Runs inside the job span.
    async fn run(&self, raw_input: Value) -> Result<JobResponse, JobError> {
        tracing::info!("Received job");

        let input = validate_input(&raw_input)?;

        let workflow = match &input.workflow {
            Some(workflow) => {
                tracing::info!("Using provided workflow");
                workflow.clone()
            }
            None => {
                tracing::info!("Using default workflow");
                self.default_workflow.get()?.as_ref().clone()
            }
        };

        validate_structure(&workflow).map_err(CoreError::from)?;

        let overrides = input.overrides();
        let workflow = if overrides.is_empty() {
            workflow
        } else {
            apply_overrides(&workflow, &overrides)
        };

        let started = Instant::now();

        let backend = self
            .backends
            .open()
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;
        let executor = WorkflowExecutor::new(backend).with_poll_config(self.poll.clone());
        tracing::debug!(
            backend = %self.backends.describe(),
            client_id = executor.client_id(),
            "Opened backend session",
        );

        let entry = executor.execute_workflow(&workflow, self.timeout).await?;

        let options = EncodeOptions {
            return_format: input.return_format,
            image_format: input.image_format,
            quality: input.quality,
        };
        let images = extract_images(executor.backend(), &entry, &options).await?;

        let generation_time = round_secs(started.elapsed().as_secs_f64());
        tracing::info!(
            generation_time,
            num_images = images.len(),
            "Job completed successfully",
        );

        Ok(JobResponse::success(
            images,
            Metadata {
                generation_time,
                steps: input.steps,
                cfg: input.cfg,
                seed: sampler_seed(&workflow),
            },
        ))
    }
}

/// A job task that did not return: a panic, or cancellation at runtime
/// shutdown.
fn job_task_error(err: JoinError) -> JobError {
    if err.is_panic() {
        JobError::Panic(panic_message(err))
    } else {
        JobError::Internal(anyhow::Error::new(err).context("Job task ended before finishing"))
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
