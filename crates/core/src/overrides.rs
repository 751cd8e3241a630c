//! Parameter overrides applied to a ComfyUI workflow before submission.
//!
//! Nodes are targeted in one of two ways:
//!
//! - **Tagged**: when any node carries `_meta.role`, overrides go only to
//!   nodes whose role matches (`positive_prompt`, `negative_prompt`,
//!   `sampler`, `latent`). This is deterministic and handles workflows with
//!   several samplers or text encoders.
//! - **Heuristic**: otherwise nodes are matched by `class_type`. Every
//!   `CLIPTextEncode` node receives the prompt, and negative prompts are
//!   recognised by marker words in their text. This is approximate.

use serde_json::Value;

use crate::workflow::{
    node_role, CLIP_TEXT_ENCODE_CLASS, KSAMPLER_CLASS, LATENT_IMAGE_CLASSES,
};

/// Text markers that identify a negative prompt node in heuristic mode.
pub const NEGATIVE_PROMPT_MARKERS: &[&str] = &["low quality", "blurry"];

/// Role tag values recognised under `_meta.role`.
pub const ROLE_POSITIVE_PROMPT: &str = "positive_prompt";
pub const ROLE_NEGATIVE_PROMPT: &str = "negative_prompt";
pub const ROLE_SAMPLER: &str = "sampler";
pub const ROLE_LATENT: &str = "latent";

/// Override values for a workflow. `None` leaves the node input unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<i64>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Names of the overrides that are set.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.prompt.is_some() {
            keys.push("prompt");
        }
        if self.negative_prompt.is_some() {
            keys.push("negative_prompt");
        }
        if self.seed.is_some() {
            keys.push("seed");
        }
        if self.steps.is_some() {
            keys.push("steps");
        }
        if self.cfg.is_some() {
            keys.push("cfg");
        }
        if self.width.is_some() {
            keys.push("width");
        }
        if self.height.is_some() {
            keys.push("height");
        }
        keys
    }
}

/// How override keys are mapped onto workflow nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetingMode {
    Tagged,
    Heuristic,
}

/// Pick the targeting mode for a workflow: tagged as soon as one node has a role.
pub fn targeting_mode(workflow: &Value) -> TargetingMode {
    let tagged = workflow
        .as_object()
        .is_some_and(|nodes| nodes.values().any(|node| node_role(node).is_some()));
    if tagged {
        TargetingMode::Tagged
    } else {
        TargetingMode::Heuristic
    }
}

/// Return a copy of `workflow` with `overrides` applied.
///
/// The input workflow is never modified. Inputs wired to other nodes
/// (`[node_id, slot]` arrays) are left alone.
pub fn apply_overrides(workflow: &Value, overrides: &Overrides) -> Value {
    let mut modified = workflow.clone();
    if overrides.is_empty() {
        return modified;
    }

    let mode = targeting_mode(workflow);

    if let Some(nodes) = modified.as_object_mut() {
        for node in nodes.values_mut() {
            let target = match mode {
                TargetingMode::Tagged => tagged_target(node),
                TargetingMode::Heuristic => heuristic_target(node),
            };
            let Some(target) = target else { continue };
            let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
                continue;
            };

            match target {
                NodeTarget::PositivePrompt => {
                    set_literal(inputs, "text", overrides.prompt.clone().map(Value::from));
                }
                NodeTarget::NegativePrompt => {
                    set_literal(
                        inputs,
                        "text",
                        overrides.negative_prompt.clone().map(Value::from),
                    );
                }
                NodeTarget::AnyPrompt { negative } => {
                    set_literal(inputs, "text", overrides.prompt.clone().map(Value::from));
                    if negative {
                        set_literal(
                            inputs,
                            "text",
                            overrides.negative_prompt.clone().map(Value::from),
                        );
                    }
                }
                NodeTarget::Sampler => {
                    set_literal(inputs, "seed", overrides.seed.map(Value::from));
                    set_literal(inputs, "steps", overrides.steps.map(Value::from));
                    set_literal(inputs, "cfg", overrides.cfg.map(Value::from));
                }
                NodeTarget::Latent => {
                    set_literal(inputs, "width", overrides.width.map(Value::from));
                    set_literal(inputs, "height", overrides.height.map(Value::from));
                }
            }
        }
    }

    tracing::info!(
        mode = ?mode,
        overrides = ?overrides.keys(),
        "Applied parameter overrides",
    );

    modified
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Which override group a node receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeTarget {
    PositivePrompt,
    NegativePrompt,
    /// Heuristic text encoder: takes the prompt, and the negative prompt
    /// as well when its original text looks negative.
    AnyPrompt { negative: bool },
    Sampler,
    Latent,
}

fn tagged_target(node: &Value) -> Option<NodeTarget> {
    match node_role(node)? {
        ROLE_POSITIVE_PROMPT => Some(NodeTarget::PositivePrompt),
        ROLE_NEGATIVE_PROMPT => Some(NodeTarget::NegativePrompt),
        ROLE_SAMPLER => Some(NodeTarget::Sampler),
        ROLE_LATENT => Some(NodeTarget::Latent),
        _ => None,
    }
}

fn heuristic_target(node: &Value) -> Option<NodeTarget> {
    let class_type = node.get("class_type").and_then(Value::as_str)?;
    match class_type {
        CLIP_TEXT_ENCODE_CLASS => {
            let text = node
                .get("inputs")
                .and_then(|inputs| inputs.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let negative = NEGATIVE_PROMPT_MARKERS.iter().any(|m| text.contains(m));
            Some(NodeTarget::AnyPrompt { negative })
        }
        KSAMPLER_CLASS => Some(NodeTarget::Sampler),
        c if LATENT_IMAGE_CLASSES.contains(&c) => Some(NodeTarget::Latent),
        _ => None,
    }
}

/// Overwrite `inputs[key]` when a value is given and the current input is a
/// literal rather than a link to another node.
fn set_literal(inputs: &mut serde_json::Map<String, Value>, key: &str, value: Option<Value>) {
    let Some(value) = value else { return };
    match inputs.get(key) {
        Some(Value::Array(_)) => {}
        // Text encoders only take a prompt when they already hold literal text.
        None if key == "text" => {}
        _ => {
            inputs.insert(key.to_string(), value);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
