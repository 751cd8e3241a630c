//! The seam between job execution and a ComfyUI server.
//!
//! [`ComfyUIBackend`] is the narrow set of calls the executor and image
//! extractor need. [`ComfyUIApi`] implements it over HTTP; tests use
//! [`MockBackend`](crate::mock::MockBackend).
//!
//! Jobs never share a backend. A [`BackendFactory`] opens a fresh session
//! per job, and dropping the session releases its connection pool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
use crate::history::ImageDescriptor;

/// Operations a job performs against a ComfyUI server.
#[async_trait]
pub trait ComfyUIBackend: Send + Sync {
    /// Queue a workflow (`POST /prompt`).
    async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Raw history for one prompt (`GET /history/{prompt_id}`).
    async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError>;

    /// Bytes of a produced image (`GET /view`).
    async fn get_image(&self, image: &ImageDescriptor) -> Result<Vec<u8>, ComfyUIApiError>;

    /// Remove a prompt from the queue (`POST /queue`).
    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// URL a client can fetch the image from directly.
    fn view_url(&self, image: &ImageDescriptor) -> Result<String, ComfyUIApiError>;
}

#[async_trait]
impl ComfyUIBackend for ComfyUIApi {
    async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        ComfyUIApi::submit_workflow(self, workflow, client_id).await
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        ComfyUIApi::get_history(self, prompt_id).await
    }

    async fn get_image(&self, image: &ImageDescriptor) -> Result<Vec<u8>, ComfyUIApiError> {
        ComfyUIApi::get_image(self, image).await
    }

    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        ComfyUIApi::cancel_execution(self, prompt_id).await
    }

    fn view_url(&self, image: &ImageDescriptor) -> Result<String, ComfyUIApiError> {
        ComfyUIApi::view_url(self, image).map(String::from)
    }
}

/// Opens one backend session per job.
#[async_trait]
pub trait BackendFactory: Send + Sync + 'static {
    type Backend: ComfyUIBackend + 'static;

    /// Open a new session.
    fn open(&self) -> Result<Self::Backend, ComfyUIApiError>;

    /// Whether the server is ready to accept work.
    async fn is_healthy(&self) -> bool;

    /// Where the sessions point, for logging.
    fn describe(&self) -> String;
}

/// Connect timeout for per-job HTTP sessions.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens HTTP sessions against a ComfyUI base URL.
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    api_url: String,
    connect_timeout: Duration,
}

impl HttpBackendFactory {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl BackendFactory for HttpBackendFactory {
    type Backend = ComfyUIApi;

    fn open(&self) -> Result<ComfyUIApi, ComfyUIApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;
        Ok(ComfyUIApi::with_client(client, self.api_url.clone()))
    }

    async fn is_healthy(&self) -> bool {
        check_health(&self.api_url).await
    }

    fn describe(&self) -> String {
        self.api_url.clone()
    }
}

/// Probe `GET /system_stats` on a ComfyUI instance with a throwaway client.
pub async fn check_health(api_url: &str) -> bool {
    ComfyUIApi::new(api_url).is_healthy().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_opens_session_for_configured_url() {
        let factory = HttpBackendFactory::new("http://comfy:8188/");
        let api = factory.open().unwrap();
        assert_eq!(api.api_url(), "http://comfy:8188");
        assert_eq!(factory.describe(), "http://comfy:8188/");
    }

    #[test]
    fn trait_view_url_is_a_string() {
        let api = ComfyUIApi::new("http://localhost:8188");
        let image = ImageDescriptor {
            filename: "a.png".into(),
            subfolder: String::new(),
            image_type: "temp".into(),
        };
        let url = ComfyUIBackend::view_url(&api, &image).unwrap();
        assert_eq!(url, "http://localhost:8188/view?filename=a.png&subfolder=&type=temp");
    }

    #[tokio::test]
    async fn unreachable_server_is_unhealthy() {
        assert!(!check_health("http://127.0.0.1:1").await);
    }
}
