//! allOf composition
//!
//! Folds an `allOf` list into one schema node. Referenced elements come
//! first, then inline elements, then the composing node itself, so later
//! entries win on scalar conflicts and lists accumulate.

use serde_json::{Map, Value};

use crate::error::{ModelError, Result};
use crate::reference::Resolver;
use crate::schema::{NamePolicy, ALL_OF_KEY, REF_KEY};

/// Result of merging an `allOf` node
#[derive(Debug, Clone)]
pub struct Merged {
    /// Name of the first referenced element, the inferred supertype
    pub supertype: Option<String>,
    pub node: Value,
}

/// Merge `incoming` into `target` in place.
///
/// Objects merge key by key, arrays append onto an existing array, and
/// anything else overwrites. A non-object target is replaced outright.
pub fn merge_value(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match value {
                    Value::Object(_) => {
                        let slot = target_map.entry(key).or_insert(Value::Null);
                        merge_value(slot, value);
                    }
                    Value::Array(items) => match target_map.get_mut(&key) {
                        Some(Value::Array(existing)) => existing.extend(items),
                        _ => {
                            target_map.insert(key, Value::Array(items));
                        }
                    },
                    other => {
                        target_map.insert(key, other);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

/// Strip `allOf` from `node` and merge its elements with what remains
pub fn merge_all_of(
    node: &mut Map<String, Value>,
    resolver: &Resolver<'_>,
    policy: NamePolicy,
) -> Result<Merged> {
    let elements = match node.remove(ALL_OF_KEY) {
        Some(Value::Array(elements)) => elements,
        Some(other) => {
            return Err(ModelError::InvalidSchema(format!(
                "allOf must be a list, got {}",
                other
            )))
        }
        None => Vec::new(),
    };

    let mut referenced = Vec::new();
    let mut inline = Vec::new();
    for element in elements {
        let mut element = match element {
            Value::Object(element) => element,
            other => {
                return Err(ModelError::InvalidSchema(format!(
                    "allOf must contain only objects, found {}",
                    other
                )))
            }
        };
        if element.contains_key(REF_KEY) {
            let resolved = resolver.resolve(element.get(REF_KEY))?;
            element.remove(REF_KEY);
            match resolved.node.into_owned() {
                Value::Object(target) => element.extend(target),
                other => {
                    return Err(ModelError::InvalidSchema(format!(
                        "allOf reference must point at an object, found {}",
                        other
                    )))
                }
            }
            referenced.push(element);
        } else {
            inline.push(element);
        }
    }

    let supertype = referenced.first().and_then(|first| policy.schema_name(first));

    let mut parts = referenced
        .into_iter()
        .chain(inline)
        .chain(std::iter::once(node.clone()))
        .map(Value::Object);
    let mut merged = parts.next().unwrap_or_else(|| Value::Object(Map::new()));
    for part in parts {
        merge_value(&mut merged, part);
    }

    Ok(Merged {
        supertype,
        node: merged,
    })
}
