//! ComfyUI workflow documents: structural checks and default loading.
//!
//! A workflow in API format is an object keyed by node ID, each value an
//! object with `class_type` and `inputs`:
//!
//! ```json
//! {
//!   "3": { "class_type": "KSampler", "inputs": { "seed": -1, "steps": 26 } }
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CoreError, StructureError};

// ---------------------------------------------------------------------------
// ComfyUI node class types
// ---------------------------------------------------------------------------

pub const UNET_LOADER_CLASS: &str = "UNETLoader";
pub const CLIP_LOADER_CLASS: &str = "CLIPLoader";
pub const VAE_LOADER_CLASS: &str = "VAELoader";
pub const KSAMPLER_CLASS: &str = "KSampler";
pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
pub const SAVE_IMAGE_CLASS: &str = "SaveImage";
pub const PREVIEW_IMAGE_CLASS: &str = "PreviewImage";

/// Latent image sources whose `width`/`height` set the output size.
pub const LATENT_IMAGE_CLASSES: &[&str] = &["EmptySD3LatentImage", "EmptyLatentImage"];

/// Node kinds every submitted workflow must contain.
pub const REQUIRED_NODE_TYPES: &[&str] = &[
    UNET_LOADER_CLASS,
    CLIP_LOADER_CLASS,
    VAE_LOADER_CLASS,
    KSAMPLER_CLASS,
];

/// Node kinds that produce retrievable images; at least one is required.
pub const OUTPUT_NODE_TYPES: &[&str] = &[SAVE_IMAGE_CLASS, PREVIEW_IMAGE_CLASS];

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

/// Check that a workflow contains the required loader/sampler kinds and at
/// least one output kind.
///
/// Node values that are not objects are skipped rather than rejected.
pub fn validate_structure(workflow: &Value) -> Result<(), StructureError> {
    let nodes = workflow.as_object().ok_or(StructureError::NotAnObject)?;
    if nodes.is_empty() {
        return Err(StructureError::Empty);
    }

    let found: BTreeSet<&str> = nodes
        .values()
        .filter_map(|node| node.get("class_type").and_then(Value::as_str))
        .collect();

    let missing: Vec<String> = REQUIRED_NODE_TYPES
        .iter()
        .filter(|kind| !found.contains(*kind))
        .map(|kind| kind.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(StructureError::MissingNodeTypes(missing));
    }

    if !OUTPUT_NODE_TYPES.iter().any(|kind| found.contains(kind)) {
        return Err(StructureError::NoOutputNode(
            OUTPUT_NODE_TYPES.iter().map(|k| k.to_string()).collect(),
        ));
    }

    tracing::info!(node_types = ?found, "Workflow structure validation successful");
    Ok(())
}

/// The `_meta.role` tag of a node, if any.
pub fn node_role(node: &Value) -> Option<&str> {
    node.get("_meta")
        .and_then(|meta| meta.get("role"))
        .and_then(Value::as_str)
}

/// Seed of the first `KSampler` node, by node ID order.
///
/// Returns `None` when there is no sampler or its seed is wired to
/// another node.
pub fn sampler_seed(workflow: &Value) -> Option<i64> {
    let nodes = workflow.as_object()?;
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort_by(|a, b| node_id_order(a, b));

    ids.into_iter()
        .filter_map(|id| nodes.get(id))
        .find(|node| node.get("class_type").and_then(Value::as_str) == Some(KSAMPLER_CLASS))
        .and_then(|node| node.get("inputs"))
        .and_then(|inputs| inputs.get("seed"))
        .and_then(Value::as_i64)
}

/// Order node IDs numerically when both are numbers, lexically otherwise.
pub fn node_id_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

// ---------------------------------------------------------------------------
// Default workflow
// ---------------------------------------------------------------------------

/// Default path of the bundled workflow, relative to the working directory.
pub const DEFAULT_WORKFLOW_PATH: &str = "workflow.json";

/// Read and parse a workflow document from disk.
pub fn load_workflow_file(path: &Path) -> Result<Value, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CoreError::DefaultWorkflow(format!(
            "Default workflow file ({}) could not be read: {e}",
            path.display()
        ))
    })?;
    let workflow: Value = serde_json::from_str(&text).map_err(|e| {
        CoreError::DefaultWorkflow(format!(
            "Invalid JSON in default workflow file ({}): {e}",
            path.display()
        ))
    })?;
    if !workflow.is_object() {
        return Err(CoreError::DefaultWorkflow(format!(
            "Default workflow file ({}) must contain a JSON object",
            path.display()
        )));
    }
    Ok(workflow)
}

/// The process-wide default workflow, loaded once at startup.
///
/// A failed load is remembered rather than aborting the process, so jobs
/// that bring their own workflow keep working and only jobs relying on the
/// default report the failure.
#[derive(Debug, Clone)]
pub struct DefaultWorkflow {
    loaded: Result<Arc<Value>, String>,
}

impl DefaultWorkflow {
    /// Load the default workflow from `path`, logging the outcome.
    pub fn load(path: &Path) -> Self {
        match load_workflow_file(path) {
            Ok(workflow) => {
                tracing::info!(path = %path.display(), "Loaded default workflow");
                Self::from_value(workflow)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load default workflow");
                Self {
                    loaded: Err(e.to_string()),
                }
            }
        }
    }

    pub fn from_value(workflow: Value) -> Self {
        Self {
            loaded: Ok(Arc::new(workflow)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_ok()
    }

    /// The loaded workflow, or the startup failure.
    pub fn get(&self) -> Result<Arc<Value>, CoreError> {
        match &self.loaded {
            Ok(workflow) => Ok(Arc::clone(workflow)),
            Err(msg) => Err(CoreError::DefaultWorkflow(msg.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
