//! ComfyUI client library for the image generation worker.
//!
//! Provides the HTTP API wrapper, the backend seam used by job execution,
//! typed history parsing, poll backoff, the workflow executor, and image
//! extraction/encoding.

pub mod api;
pub mod backend;
pub mod executor;
pub mod history;
pub mod images;
pub mod mock;
pub mod poll;
