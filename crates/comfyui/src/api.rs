//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history retrieval,
//! image download, queue deletion, health) using [`reqwest`].

use std::time::Duration;

use serde::Deserialize;

use crate::history::ImageDescriptor;

/// Timeout applied to the `/system_stats` readiness probe.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a single ComfyUI instance.
///
/// Each value owns its own [`reqwest::Client`]; dropping it releases the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after queuing a
/// workflow.
///
/// Fields are optional so that a malformed body can be reported as a
/// submission failure instead of a decode error.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation errors reported at submission time.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The configured base URL cannot be turned into a request URL.
    #[error("Invalid ComfyUI URL: {0}")]
    InvalidUrl(String),
}

impl ComfyUIApiError {
    /// Whether the backend could not be reached at all, as opposed to
    /// answering with an error or an unreadable body.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_decode() && !e.is_status(),
            Self::ApiError { .. } | Self::InvalidUrl(_) => false,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`. A trailing
    ///   slash is stripped.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Base HTTP API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Delete a queued or running prompt.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned object is
    /// empty until the prompt has finished, then keyed by the prompt ID.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the raw bytes of a produced image via `GET /view`.
    pub async fn get_image(&self, image: &ImageDescriptor) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self.client.get(self.view_url(image)?).send().await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// `GET /view` URL of a produced image on this instance.
    pub fn view_url(&self, image: &ImageDescriptor) -> Result<reqwest::Url, ComfyUIApiError> {
        reqwest::Url::parse_with_params(
            &format!("{}/view", self.api_url),
            &[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.image_type.as_str()),
            ],
        )
        .map_err(|e| ComfyUIApiError::InvalidUrl(format!("{}: {e}", self.api_url)))
    }

    /// Returns `true` when `GET /system_stats` answers with a 2xx status
    /// within [`HEALTH_CHECK_TIMEOUT`].
    pub async fn is_healthy(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(api_url = %self.api_url, error = %e, "ComfyUI health check failed");
                false
            }
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(filename: &str, subfolder: &str) -> ImageDescriptor {
        ImageDescriptor {
            filename: filename.to_string(),
            subfolder: subfolder.to_string(),
            image_type: "output".to_string(),
        }
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let api = ComfyUIApi::new("http://localhost:8188/");
        assert_eq!(api.api_url(), "http://localhost:8188");
    }

    #[test]
    fn view_url_includes_all_query_params() {
        let api = ComfyUIApi::new("http://localhost:8188");
        let url = api.view_url(&descriptor("ComfyUI_00001_.png", "")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8188/view?filename=ComfyUI_00001_.png&subfolder=&type=output"
        );
    }

    #[test]
    fn view_url_escapes_reserved_characters() {
        let api = ComfyUIApi::new("http://localhost:8188");
        let url = api.view_url(&descriptor("my image&1.png", "a/b")).unwrap();
        assert!(url.as_str().contains("filename=my+image%261.png"));
        assert!(url.as_str().contains("subfolder=a%2Fb"));
    }

    #[test]
    fn view_url_rejects_unparseable_base() {
        let api = ComfyUIApi::new("not a url");
        assert!(matches!(
            api.view_url(&descriptor("a.png", "")),
            Err(ComfyUIApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn submit_response_tolerates_missing_fields() {
        let parsed: SubmitResponse = serde_json::from_str(r#"{"number": 3}"#).unwrap();
        assert!(parsed.prompt_id.is_none());
        assert_eq!(parsed.number, Some(3));
    }

    #[test]
    fn api_error_is_not_a_connection_error() {
        let err = ComfyUIApiError::ApiError {
            status: 500,
            body: "boom".into(),
        };
        assert!(!err.is_connection());
        assert_eq!(err.to_string(), "ComfyUI API error (500): boom");
    }
}
