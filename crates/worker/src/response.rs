//! Job response envelopes.
//!
//! A job always produces one of two shapes:
//!
//! ```json
//! { "output": { "images": [...], "metadata": {...} }, "status": "success" }
//! { "error": "...", "error_type": "...", "traceback": "..." }
//! ```

use imagegen_comfyui::images::EncodedImage;
use serde::Serialize;

pub const STATUS_SUCCESS: &str = "success";

/// Generation parameters echoed back with the images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    /// Seconds spent executing and extracting, rounded to two decimals.
    pub generation_time: f64,
    pub steps: u32,
    pub cfg: f64,
    /// Seed of the first sampler as submitted. Absent without a sampler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutput {
    pub images: Vec<EncodedImage>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessResponse {
    pub output: JobOutput,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// The result of one job, in wire form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResponse {
    Success(SuccessResponse),
    Error(ErrorResponse),
}

impl JobResponse {
    pub fn success(images: Vec<EncodedImage>, metadata: Metadata) -> Self {
        JobResponse::Success(SuccessResponse {
            output: JobOutput { images, metadata },
            status: STATUS_SUCCESS,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResponse::Success(_))
    }
}

impl From<ErrorResponse> for JobResponse {
    fn from(err: ErrorResponse) -> Self {
        JobResponse::Error(err)
    }
}

/// Round seconds to two decimals for reporting.
pub fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_envelope_shape() {
        let response = JobResponse::success(
            vec![],
            Metadata {
                generation_time: 1.5,
                steps: 26,
                cfg: 4.0,
                seed: Some(-1),
            },
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "output": {
                    "images": [],
                    "metadata": { "generation_time": 1.5, "steps": 26, "cfg": 4.0, "seed": -1 }
                },
                "status": "success"
            })
        );
    }

    #[test]
    fn seed_is_omitted_without_sampler() {
        let metadata = Metadata {
            generation_time: 0.0,
            steps: 1,
            cfg: 1.0,
            seed: None,
        };
        assert!(serde_json::to_value(&metadata).unwrap().get("seed").is_none());
    }

    #[test]
    fn error_envelope_skips_missing_traceback() {
        let response: JobResponse = ErrorResponse {
            error: "nope".into(),
            error_type: "ValidationError",
            traceback: None,
        }
        .into();
        assert!(!response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "error": "nope", "error_type": "ValidationError" })
        );
    }

    #[test]
    fn round_secs_keeps_two_decimals() {
        assert_eq!(round_secs(15.23456), 15.23);
        assert_eq!(round_secs(0.126), 0.13);
    }
}
