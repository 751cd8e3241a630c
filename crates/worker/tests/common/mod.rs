#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use imagegen_comfyui::mock::MockBackend;
use imagegen_core::workflow::DefaultWorkflow;
use imagegen_worker::handler::JobHandler;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const OUTPUT_FILENAME: &str = "ComfyUI_00001_.png";

/// The default workflow bundled at the repository root.
pub fn bundled_default_workflow() -> DefaultWorkflow {
    DefaultWorkflow::load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../../workflow.json"))
}

/// Build a handler over `mock` with the bundled default workflow.
pub fn handler(mock: MockBackend) -> Arc<JobHandler<MockBackend>> {
    handler_with(mock, bundled_default_workflow(), Duration::from_secs(30))
}

pub fn handler_with(
    mock: MockBackend,
    default_workflow: DefaultWorkflow,
    timeout: Duration,
) -> Arc<JobHandler<MockBackend>> {
    Arc::new(JobHandler::new(mock, default_workflow, timeout))
}

/// A backend that finishes on the second poll with one 64x64 image.
pub fn successful_backend() -> MockBackend {
    MockBackend::new()
        .completes_on_poll(
            2,
            json!({
                "outputs": {
                    "9": { "images": [{ "filename": OUTPUT_FILENAME, "subfolder": "", "type": "output" }] }
                },
                "status": { "status_str": "success", "completed": true, "messages": [] }
            }),
        )
        .with_image(OUTPUT_FILENAME, png_bytes(64, 64))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([250, 120, 30]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(PngEncoder::new(&mut bytes))
        .expect("encode test png");
    bytes
}

/// A caller-supplied graph that passes the structure check.
pub fn custom_workflow() -> Value {
    json!({
        "1": { "class_type": "UNETLoader", "inputs": { "unet_name": "custom.safetensors" } },
        "2": { "class_type": "CLIPLoader", "inputs": { "clip_name": "clip.safetensors" } },
        "3": { "class_type": "VAELoader", "inputs": { "vae_name": "vae.safetensors" } },
        "4": { "class_type": "CLIPTextEncode", "inputs": { "text": "a red fox", "clip": ["2", 0] } },
        "5": { "class_type": "KSampler", "inputs": { "seed": 7, "steps": 10, "cfg": 2.5 } },
        "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } }
    })
}

/// Serialize a response to JSON for assertions.
pub fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).expect("serialize response")
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
