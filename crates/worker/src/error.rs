use imagegen_comfyui::executor::ExecutorError;
use imagegen_core::error::CoreError;

use crate::response::ErrorResponse;

/// Prefix on messages of failures that originate in the ComfyUI backend.
pub const BACKEND_ERROR_PREFIX: &str = "ComfyUI error: ";

/// Everything that can fail a job.
///
/// Stages return their own error types; they are folded into this enum
/// with `?` and converted to the wire envelope exactly once, by
/// [`ErrorResponse::from`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Input, structure, or default workflow failure from `imagegen_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Submission, polling, or extraction failure.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Anything unexpected. Carries its full cause chain.
    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    /// The job task panicked.
    #[error("Job panicked: {0}")]
    Panic(String),
}

impl JobError {
    /// The `error_type` string reported to the caller.
    pub fn error_type(&self) -> &'static str {
        match self {
            JobError::Core(core) => match core {
                CoreError::MissingField(_) | CoreError::Validation(_) => "ValidationError",
                CoreError::Structure(_) => "StructureError",
                CoreError::DefaultWorkflow(_) => "DefaultWorkflowError",
            },
            JobError::Executor(exec) => match exec {
                ExecutorError::Connection(_) => "ConnectionError",
                ExecutorError::Submission(_) => "SubmissionError",
                ExecutorError::Execution(_) => "ExecutionError",
                ExecutorError::Timeout { .. } => "TimeoutError",
                ExecutorError::Extraction(_) => "ExtractionError",
            },
            JobError::Internal(_) | JobError::Panic(_) => "InternalError",
        }
    }

    /// Human-readable message, prefixed for backend-originated failures.
    pub fn message(&self) -> String {
        match self {
            JobError::Executor(ExecutorError::Timeout { .. }) => self.to_string(),
            JobError::Executor(_) => format!("{BACKEND_ERROR_PREFIX}{self}"),
            _ => self.to_string(),
        }
    }

    /// Diagnostic detail, only for unexpected failures.
    pub fn traceback(&self) -> Option<String> {
        match self {
            JobError::Internal(err) => Some(format!("{err:?}")),
            JobError::Panic(msg) => Some(format!("panic: {msg}")),
            _ => None,
        }
    }

    /// Caller mistakes, as opposed to worker or backend failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::Core(CoreError::MissingField(_) | CoreError::Validation(_))
        )
    }

    /// Log this error at the level its kind deserves.
    pub fn log(&self, job_id: &str) {
        if self.is_client_error() {
            tracing::warn!(job_id, error = %self, "Validation error for job");
        } else {
            tracing::error!(
                job_id,
                error_type = self.error_type(),
                error = %self,
                "Job failed",
            );
        }
    }
}

impl From<JobError> for ErrorResponse {
    fn from(err: JobError) -> Self {
        ErrorResponse {
            error: err.message(),
            error_type: err.error_type(),
            traceback: err.traceback(),
        }
    }
}
