//! Schema node inspection
//!
//! Naming and shape detection for raw JSON schema nodes. Pure inspection,
//! nothing here mutates a schema or touches the registry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key carrying an in-document or external reference
pub const REF_KEY: &str = "$ref";
/// Key carrying a composition list
pub const ALL_OF_KEY: &str = "allOf";

/// Which schema keys identify a schema's name.
///
/// `Legacy` checks `name`, `title` then `id`; `NameOnly` checks `name`
/// alone. The narrower policy treats fewer schemas as named, so titled but
/// unnamed object schemas are rejected under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePolicy {
    #[default]
    NameOnly,
    Legacy,
}

impl NamePolicy {
    /// Identifier keys, in lookup order
    pub fn identifiers(&self) -> &'static [&'static str] {
        match self {
            NamePolicy::NameOnly => &["name"],
            NamePolicy::Legacy => &["name", "title", "id"],
        }
    }

    /// First string-valued identifier of a schema node
    pub fn schema_name(&self, node: &Map<String, Value>) -> Option<String> {
        self.identifiers()
            .iter()
            .find_map(|key| node.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    }
}

/// Declared `type` of a schema node, when it is a string
pub fn schema_type(node: &Map<String, Value>) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

/// How the walker treats a schema node, in dispatch precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    /// `type: "array"`; the model comes from `items`
    Array,
    /// Carries `$ref`; spliced before anything else happens
    Reference,
    /// Carries `allOf`; merged before anything else happens
    Composition,
    /// Named object, or a named node without a `type`
    NamedObject,
    /// Produces no model
    Plain,
}

/// Detect the shape of a schema node given its resolved name
pub fn detect_shape(node: &Map<String, Value>, name: Option<&str>) -> NodeShape {
    let ty = schema_type(node);
    if ty == Some("array") {
        NodeShape::Array
    } else if node.contains_key(REF_KEY) {
        NodeShape::Reference
    } else if node.contains_key(ALL_OF_KEY) {
        NodeShape::Composition
    } else if name.is_some() && matches!(ty, Some("object") | None) {
        NodeShape::NamedObject
    } else {
        NodeShape::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_name_only_ignores_title() {
        let node = obj(json!({"title": "Titled", "type": "object"}));
        assert_eq!(NamePolicy::NameOnly.schema_name(&node), None);
        assert_eq!(NamePolicy::Legacy.schema_name(&node), Some("Titled".to_string()));
    }

    #[test]
    fn test_non_string_identifier_is_skipped() {
        // A property literally called "name" is a schema, not a string
        let node = obj(json!({"name": {"type": "string"}, "id": "fallback"}));
        assert_eq!(NamePolicy::NameOnly.schema_name(&node), None);
        assert_eq!(NamePolicy::Legacy.schema_name(&node), Some("fallback".to_string()));
    }

    #[test]
    fn test_shape_precedence() {
        let array_with_ref = obj(json!({"type": "array", "$ref": "#/x", "items": {}}));
        assert_eq!(detect_shape(&array_with_ref, None), NodeShape::Array);

        let ref_and_all_of = obj(json!({"$ref": "#/x", "allOf": []}));
        assert_eq!(detect_shape(&ref_and_all_of, None), NodeShape::Reference);

        let composed_object = obj(json!({"name": "C", "type": "object", "allOf": []}));
        assert_eq!(detect_shape(&composed_object, Some("C")), NodeShape::Composition);
    }

    #[test]
    fn test_named_nodes() {
        let typeless = obj(json!({"name": "T"}));
        assert_eq!(detect_shape(&typeless, Some("T")), NodeShape::NamedObject);

        let named_string = obj(json!({"name": "S", "type": "string"}));
        assert_eq!(detect_shape(&named_string, Some("S")), NodeShape::Plain);

        let anonymous = obj(json!({"type": "integer"}));
        assert_eq!(detect_shape(&anonymous, None), NodeShape::Plain);
    }
}
