//! Typed view of a ComfyUI execution history entry.
//!
//! `GET /history/{prompt_id}` returns `{}` while the prompt is still queued
//! or running, and `{"<prompt_id>": {...}}` once it has finished. The entry
//! carries per-node `outputs` and an overall `status`. Fields this crate
//! does not interpret are kept in `extra` so the entry round-trips intact.

use std::collections::BTreeMap;

use imagegen_core::workflow::node_id_order;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the status message ComfyUI records when a node raised.
const EXECUTION_ERROR_MESSAGE: &str = "execution_error";

/// One finished prompt as reported by `/history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node ID.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a single node produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageDescriptor>,
    /// Errors raised by the node; usually strings, occasionally objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Address of a produced image inside ComfyUI storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Empty when the backend omitted it; extraction rejects such images.
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage area: `output`, `temp`, or `input`.
    #[serde(rename = "type", default = "default_image_type")]
    pub image_type: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

/// Overall outcome recorded for a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    /// `success` or `error`.
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// Event log as `[name, data]` pairs.
    #[serde(default)]
    pub messages: Vec<(String, Value)>,
}

/// Payload of an `execution_error` status message.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionErrorData {
    #[serde(default)]
    pub prompt_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub node_id: String,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl HistoryEntry {
    /// Output nodes in node ID order (`"9"` before `"10"`).
    pub fn ordered_outputs(&self) -> Vec<(&String, &NodeOutput)> {
        let mut outputs: Vec<_> = self.outputs.iter().collect();
        outputs.sort_by(|(a, _), (b, _)| node_id_order(a, b));
        outputs
    }

    /// Every error reported for this prompt, formatted `Node <id>: <error>`.
    ///
    /// Collects node-level `errors` lists first, then `execution_error`
    /// status messages when the prompt finished with status `error`.
    pub fn node_errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .ordered_outputs()
            .into_iter()
            .flat_map(|(node_id, output)| {
                output
                    .errors
                    .iter()
                    .map(move |e| format!("Node {node_id}: {}", error_text(e)))
            })
            .collect();

        if let Some(status) = &self.status {
            if status.status_str.as_deref() == Some("error") {
                let mut reported = false;
                for (name, data) in &status.messages {
                    if name != EXECUTION_ERROR_MESSAGE {
                        continue;
                    }
                    reported = true;
                    match serde_json::from_value::<ExecutionErrorData>(data.clone()) {
                        Ok(err) => errors.push(format!(
                            "Node {}: {}: {}",
                            err.node_id, err.exception_type, err.exception_message
                        )),
                        Err(_) => errors.push(format!("Execution error: {data}")),
                    }
                }
                if !reported && errors.is_empty() {
                    errors.push("Execution finished with status 'error'".to_string());
                }
            }
        }

        errors
    }

    /// Total number of image descriptors across all output nodes.
    pub fn image_count(&self) -> usize {
        self.outputs.values().map(|o| o.images.len()).sum()
    }
}

/// Extract the entry for `prompt_id` from a raw `/history` response.
///
/// Returns `Ok(None)` while the prompt is not yet in the history.
pub fn find_entry(history: &Value, prompt_id: &str) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match history.get(prompt_id) {
        None => Ok(None),
        Some(entry) => serde_json::from_value(entry.clone()).map(Some),
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_prompt_is_not_an_entry() {
        assert!(find_entry(&json!({}), "abc").unwrap().is_none());
        assert!(find_entry(&json!({"other": {"outputs": {}}}), "abc").unwrap().is_none());
    }

    #[test]
    fn entry_parses_images_with_defaults() {
        let history = json!({
            "abc": {
                "outputs": {
                    "9": { "images": [{ "filename": "out.png" }] }
                }
            }
        });
        let entry = find_entry(&history, "abc").unwrap().unwrap();
        let image = &entry.outputs["9"].images[0];
        assert_eq!(image.filename, "out.png");
        assert_eq!(image.subfolder, "");
        assert_eq!(image.image_type, "output");
        assert_eq!(entry.image_count(), 1);
    }

    #[test]
    fn descriptor_without_filename_still_parses() {
        let history = json!({
            "abc": { "outputs": { "9": { "images": [{ "subfolder": "x" }] } } }
        });
        let entry = find_entry(&history, "abc").unwrap().unwrap();
        assert_eq!(entry.outputs["9"].images[0].filename, "");
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "prompt": [1, "abc", {}],
            "outputs": { "9": { "images": [], "text": ["hello"] } },
            "meta": { "9": { "node_id": "9" } }
        });
        let entry: HistoryEntry = serde_json::from_value(raw.clone()).unwrap();
        assert!(entry.extra.contains_key("prompt"));
        assert!(entry.extra.contains_key("meta"));
        assert_eq!(entry.outputs["9"].extra["text"], json!(["hello"]));
    }

    #[test]
    fn node_errors_from_two_nodes_are_all_reported() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "outputs": {
                "4": { "errors": ["model not found"] },
                "12": { "errors": ["out of memory", {"code": 7}] },
                "9": { "images": [] }
            }
        }))
        .unwrap();
        assert_eq!(
            entry.node_errors(),
            vec![
                "Node 4: model not found",
                "Node 12: out of memory",
                r#"Node 12: {"code":7}"#,
            ]
        );
    }

    #[test]
    fn status_error_messages_are_reported() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "outputs": {},
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", {"prompt_id": "abc"}],
                    ["execution_error", {
                        "prompt_id": "abc",
                        "node_id": "3",
                        "exception_message": "CUDA out of memory",
                        "exception_type": "RuntimeError"
                    }]
                ]
            }
        }))
        .unwrap();
        assert_eq!(
            entry.node_errors(),
            vec!["Node 3: RuntimeError: CUDA out of memory"]
        );
    }

    #[test]
    fn successful_status_has_no_errors() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "outputs": { "9": { "images": [{"filename": "a.png", "subfolder": "", "type": "output"}] } },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        }))
        .unwrap();
        assert!(entry.node_errors().is_empty());
    }

    #[test]
    fn ordered_outputs_sort_numerically() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "outputs": { "10": {}, "9": {}, "100": {} }
        }))
        .unwrap();
        let ids: Vec<&str> = entry
            .ordered_outputs()
            .into_iter()
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(ids, vec!["9", "10", "100"]);
    }
}
