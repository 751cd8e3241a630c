use std::fmt;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending input field.
    pub field: &'static str,
    /// Human-readable reason the value was rejected.
    pub message: String,
}

/// Every field rejected by input validation, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of the rejected fields.
    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|e| e.field).collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Reasons a workflow document fails the structural check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("Workflow must be a JSON object")]
    NotAnObject,

    #[error("Workflow cannot be empty")]
    Empty,

    #[error("Workflow is missing required node types: {}", .0.join(", "))]
    MissingNodeTypes(Vec<String>),

    #[error("Workflow must contain at least one output node type: {}", .0.join(", "))]
    NoOutputNode(Vec<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The job input was missing a required field.
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation errors: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Structure(#[from] StructureError),

    /// The bundled default workflow could not be loaded at startup.
    #[error("Default workflow unavailable: {0}")]
    DefaultWorkflow(String),
}
