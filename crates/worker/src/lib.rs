//! Serverless image generation worker.
//!
//! Exposes configuration, logging setup, the job handler, response
//! envelopes, and the HTTP intake so integration tests and the binary
//! entrypoint can both access them.

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod oneshot;
pub mod response;
pub mod routes;
