//! In-memory backend for testing without a running ComfyUI.
//!
//! [`MockBackend`] answers from a script set up with builder methods and
//! records every call, so tests can assert on poll counts, poll timing,
//! submitted graphs, and cancellations.
//!
//! ```
//! use imagegen_comfyui::mock::MockBackend;
//! use serde_json::json;
//!
//! let mock = MockBackend::new().completes_on_poll(3, json!({ "outputs": {} }));
//! assert_eq!(mock.poll_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::api::{ComfyUIApiError, SubmitResponse};
use crate::backend::{BackendFactory, ComfyUIBackend};
use crate::history::ImageDescriptor;

/// Prompt ID handed out when none is configured.
pub const MOCK_PROMPT_ID: &str = "mock-prompt-1";

const MOCK_URL: &str = "http://mock-comfyui";

#[derive(Debug, Clone)]
enum SubmitScript {
    Accept(Value),
    Reject { status: u16, body: String },
}

#[derive(Debug)]
struct Script {
    submit: SubmitScript,
    /// 1-based poll on which the entry appears; `None` never completes.
    complete_on_poll: Option<usize>,
    entry: Value,
    history_status: Option<u16>,
    /// Requests that never receive a response.
    stall_submission: bool,
    stall_history: bool,
    images: HashMap<String, Vec<u8>>,
    healthy: bool,
}

#[derive(Debug, Default)]
struct Calls {
    submitted: Vec<(Value, String)>,
    polls: Vec<Instant>,
    cancelled: Vec<String>,
    fetched: Vec<String>,
    sessions: usize,
}

#[derive(Debug)]
struct Inner {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
}

/// A scripted ComfyUI server.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A healthy backend that accepts submissions and completes on the
    /// first poll with no outputs.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(Script {
                    submit: SubmitScript::Accept(json!({
                        "prompt_id": MOCK_PROMPT_ID,
                        "number": 0,
                        "node_errors": {}
                    })),
                    complete_on_poll: Some(1),
                    entry: json!({ "outputs": {} }),
                    history_status: None,
                    stall_submission: false,
                    stall_history: false,
                    images: HashMap::new(),
                    healthy: true,
                }),
                calls: Mutex::new(Calls::default()),
            }),
        }
    }

    /// Return `entry` as the history of the prompt from poll `n` (1-based)
    /// onwards; earlier polls see an empty history.
    pub fn completes_on_poll(self, n: usize, entry: Value) -> Self {
        {
            let mut script = lock(&self.inner.script);
            script.complete_on_poll = Some(n.max(1));
            script.entry = entry;
        }
        self
    }

    /// Every poll sees an empty history.
    pub fn never_completes(self) -> Self {
        lock(&self.inner.script).complete_on_poll = None;
        self
    }

    /// Answer `POST /prompt` with a non-2xx status.
    pub fn rejects_submission(self, status: u16, body: impl Into<String>) -> Self {
        lock(&self.inner.script).submit = SubmitScript::Reject {
            status,
            body: body.into(),
        };
        self
    }

    /// Answer `POST /prompt` with an arbitrary 2xx body.
    pub fn submission_body(self, body: Value) -> Self {
        lock(&self.inner.script).submit = SubmitScript::Accept(body);
        self
    }

    /// Accept the `POST /prompt` connection but never answer it.
    pub fn stalls_submission(self) -> Self {
        lock(&self.inner.script).stall_submission = true;
        self
    }

    /// Accept `GET /history` connections but never answer them.
    pub fn stalls_history(self) -> Self {
        lock(&self.inner.script).stall_history = true;
        self
    }

    /// Answer `GET /history` with a non-2xx status.
    pub fn history_status(self, status: u16) -> Self {
        lock(&self.inner.script).history_status = Some(status);
        self
    }

    /// Serve `bytes` for `GET /view?filename=<filename>`.
    pub fn with_image(self, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        lock(&self.inner.script).images.insert(filename.into(), bytes);
        self
    }

    pub fn unhealthy(self) -> Self {
        lock(&self.inner.script).healthy = false;
        self
    }

    // ---- recorded calls ----

    pub fn poll_count(&self) -> usize {
        lock(&self.inner.calls).polls.len()
    }

    /// Instants at which `/history` was requested.
    pub fn poll_times(&self) -> Vec<Instant> {
        lock(&self.inner.calls).polls.clone()
    }

    /// Workflows received by `/prompt`, in order.
    pub fn submitted_workflows(&self) -> Vec<Value> {
        lock(&self.inner.calls)
            .submitted
            .iter()
            .map(|(workflow, _)| workflow.clone())
            .collect()
    }

    /// Client IDs sent with each submission.
    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.inner.calls)
            .submitted
            .iter()
            .map(|(_, client_id)| client_id.clone())
            .collect()
    }

    pub fn cancelled_prompts(&self) -> Vec<String> {
        lock(&self.inner.calls).cancelled.clone()
    }

    /// Filenames requested from `/view`.
    pub fn fetched_images(&self) -> Vec<String> {
        lock(&self.inner.calls).fetched.clone()
    }

    /// Number of sessions opened through [`BackendFactory::open`].
    pub fn sessions_opened(&self) -> usize {
        lock(&self.inner.calls).sessions
    }
}

#[async_trait]
impl ComfyUIBackend for MockBackend {
    async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        lock(&self.inner.calls)
            .submitted
            .push((workflow.clone(), client_id.to_string()));

        let (submit, stall) = {
            let script = lock(&self.inner.script);
            (script.submit.clone(), script.stall_submission)
        };
        if stall {
            std::future::pending::<()>().await;
        }
        match submit {
            SubmitScript::Accept(body) => Ok(serde_json::from_value(body).unwrap_or_default()),
            SubmitScript::Reject { status, body } => Err(ComfyUIApiError::ApiError { status, body }),
        }
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let poll = {
            let mut calls = lock(&self.inner.calls);
            calls.polls.push(Instant::now());
            calls.polls.len()
        };

        let stall = lock(&self.inner.script).stall_history;
        if stall {
            std::future::pending::<()>().await;
        }

        let script = lock(&self.inner.script);
        if let Some(status) = script.history_status {
            return Err(ComfyUIApiError::ApiError {
                status,
                body: "history unavailable".to_string(),
            });
        }
        match script.complete_on_poll {
            Some(n) if poll >= n && prompt_id == scripted_prompt_id(&script) => {
                let mut history = Map::new();
                history.insert(prompt_id.to_string(), script.entry.clone());
                Ok(Value::Object(history))
            }
            _ => Ok(json!({})),
        }
    }

    async fn get_image(&self, image: &ImageDescriptor) -> Result<Vec<u8>, ComfyUIApiError> {
        lock(&self.inner.calls).fetched.push(image.filename.clone());
        lock(&self.inner.script)
            .images
            .get(&image.filename)
            .cloned()
            .ok_or_else(|| ComfyUIApiError::ApiError {
                status: 404,
                body: format!("{} not found", image.filename),
            })
    }

    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        lock(&self.inner.calls).cancelled.push(prompt_id.to_string());
        Ok(())
    }

    fn view_url(&self, image: &ImageDescriptor) -> Result<String, ComfyUIApiError> {
        Ok(format!(
            "{MOCK_URL}/view?filename={}&subfolder={}&type={}",
            image.filename, image.subfolder, image.image_type
        ))
    }
}

fn scripted_prompt_id(script: &Script) -> &str {
    match &script.submit {
        SubmitScript::Accept(body) => body
            .get("prompt_id")
            .and_then(Value::as_str)
            .unwrap_or(MOCK_PROMPT_ID),
        SubmitScript::Reject { .. } => MOCK_PROMPT_ID,
    }
}

#[async_trait]
impl BackendFactory for MockBackend {
    type Backend = MockBackend;

    fn open(&self) -> Result<MockBackend, ComfyUIApiError> {
        lock(&self.inner.calls).sessions += 1;
        Ok(self.clone())
    }

    async fn is_healthy(&self) -> bool {
        lock(&self.inner.script).healthy
    }

    fn describe(&self) -> String {
        MOCK_URL.to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
