//! Error types for the model factory

use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model factory and model instance errors
#[derive(Error, Debug)]
pub enum ModelError {
    /// Malformed schema shape (unnamed object, array without items, bad allOf)
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Raised by the validation capability
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Disallowed structural mutation on a model instance
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("No such attribute: {0}")]
    AttributeNotFound(String),

    #[error("No such key: {0}")]
    KeyNotFound(String),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// `$ref` resolution errors
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Reference URI must not be empty or null")]
    MissingUri,

    #[error("Unable to find reference {uri}. Stopped at {segment}")]
    UnresolvedSegment { uri: String, segment: String },

    #[error("External references are disabled: {uri}")]
    ExternalUnsupported { uri: String },

    #[error("Failed to load referenced document {path}: {reason}")]
    Load { path: String, reason: String },
}

impl ModelError {
    /// Short description of a JSON value's kind, for `NotAnObject`
    pub(crate) fn not_an_object(value: &serde_json::Value) -> Self {
        let kind = match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        };
        ModelError::NotAnObject(kind.to_string())
    }
}
