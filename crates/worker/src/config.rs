use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use imagegen_core::workflow::DEFAULT_WORKFLOW_PATH;

use crate::logging::LogFormat;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a worker running next to a local
/// ComfyUI. Override via environment variables (or a `.env` file).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI base URL (default: `http://127.0.0.1:8188`).
    pub comfyui_url: String,
    /// Deadline for one workflow execution (default: 300 s).
    pub default_timeout: Duration,
    /// Default workflow used by prompt-only jobs.
    pub default_workflow_path: PathBuf,
    /// Log level used when `RUST_LOG` is unset (default: `info`).
    pub log_level: String,
    pub log_format: LogFormat,
    /// Bind address of the job intake (default: `0.0.0.0`).
    pub host: String,
    /// Bind port of the job intake (default: `8000`).
    pub port: u16,
    /// When set, run this one job file and exit instead of serving.
    pub job_input_path: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `COMFYUI_URL`           | `http://127.0.0.1:8188`  |
    /// | `DEFAULT_TIMEOUT`       | `300` (seconds)          |
    /// | `DEFAULT_WORKFLOW_PATH` | `workflow.json`          |
    /// | `LOG_LEVEL`             | `info`                   |
    /// | `LOG_FORMAT`            | `json`                   |
    /// | `HOST`                  | `0.0.0.0`                |
    /// | `PORT`                  | `8000`                   |
    /// | `JOB_INPUT_PATH`        | unset                    |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let comfyui_url = var("COMFYUI_URL", "http://127.0.0.1:8188");

        let timeout_secs: u64 = var("DEFAULT_TIMEOUT", "300")
            .trim()
            .parse()
            .context("DEFAULT_TIMEOUT must be a whole number of seconds")?;

        let default_workflow_path = PathBuf::from(var("DEFAULT_WORKFLOW_PATH", DEFAULT_WORKFLOW_PATH));

        let log_level = var("LOG_LEVEL", "info").to_ascii_lowercase();

        let log_format = LogFormat::parse(&var("LOG_FORMAT", "json"))
            .context("LOG_FORMAT must be `json` or `text`")?;

        let host = var("HOST", "0.0.0.0");

        let port: u16 = var("PORT", "8000")
            .trim()
            .parse()
            .context("PORT must be a valid u16")?;

        let job_input_path = lookup("JOB_INPUT_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            comfyui_url,
            default_timeout: Duration::from_secs(timeout_secs),
            default_workflow_path,
            log_level,
            log_format,
            host,
            port,
            job_input_path,
        })
    }
}
