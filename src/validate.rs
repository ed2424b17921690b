//! Validation capability
//!
//! Model types hand instances to a [`Validate`] implementation; the JSON
//! Schema semantics live entirely behind it.

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::{ModelError, Result};

/// Validates an instance against a schema
pub trait Validate: Send + Sync {
    /// Fails with [`ModelError::Validation`] carrying the violations
    fn validate(&self, instance: &Value, schema: &Value) -> Result<()>;
}

/// [`Validate`] backed by the `jsonschema` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaValidator;

impl Validate for JsonSchemaValidator {
    fn validate(&self, instance: &Value, schema: &Value) -> Result<()> {
        let compiled = JSONSchema::options()
            .compile(schema)
            .map_err(|e| ModelError::InvalidSchema(e.to_string()))?;

        let violations: Vec<String> = match compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect(),
        };

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Validation(violations.join("; ")))
        }
    }
}
