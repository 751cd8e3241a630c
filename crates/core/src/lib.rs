//! Domain logic for the image generation worker.
//!
//! Pure functions over job inputs and ComfyUI workflow documents: schema
//! validation, structural checks, parameter overrides, and loading of the
//! bundled default workflow. Nothing here talks to the network.

pub mod error;
pub mod input;
pub mod overrides;
pub mod workflow;
