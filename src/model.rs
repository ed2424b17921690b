//! Self-validating model instances
//!
//! A [`Model`] owns a live field mapping plus the snapshot it was built
//! from. Plain field writes are never validated, so a nested object can be
//! filled in piece by piece; deletes and bulk updates are validated before
//! they commit, and whole-object removals are refused outright.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ModelError, Result};
use crate::registry::{ModelType, Registry};

/// Instance of a generated model type
#[derive(Debug, Clone)]
pub struct Model {
    model_type: Arc<ModelType>,
    fields: Map<String, Value>,
    original: Map<String, Value>,
    changes: Map<String, Value>,
}

impl Model {
    /// Build an instance, filling in schema defaults for absent fields.
    ///
    /// Construction does not validate.
    pub fn new(model_type: &Arc<ModelType>, mut fields: Map<String, Value>) -> Self {
        apply_defaults(model_type.schema(), &mut fields);
        // Inferred supertypes are merged into the bound schema already; a
        // factory base type is not, so its defaults only arrive through here
        for ancestor in model_type.ancestors() {
            apply_defaults(ancestor.schema(), &mut fields);
        }
        Self {
            model_type: Arc::clone(model_type),
            original: fields.clone(),
            fields,
            changes: Map::new(),
        }
    }

    /// Build an instance from a JSON value, which must be an object
    pub fn from_value(model_type: &Arc<ModelType>, value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(model_type, fields)),
            other => Err(ModelError::not_an_object(&other)),
        }
    }

    pub fn model_type(&self) -> &Arc<ModelType> {
        &self.model_type
    }

    /// The bound schema
    pub fn schema(&self) -> &Value {
        self.model_type.schema()
    }

    /// Snapshot taken at construction, after defaults
    pub fn original(&self) -> &Map<String, Value> {
        &self.original
    }

    // --- item access ---

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Item-style read; a missing key is [`ModelError::KeyNotFound`]
    pub fn item(&self, key: &str) -> Result<&Value> {
        self.fields
            .get(key)
            .ok_or_else(|| ModelError::KeyNotFound(key.to_string()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Write a field. Always succeeds and is recorded in the change log.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.changes.insert(key.clone(), value.clone());
        self.fields.insert(key, value);
    }

    /// Remove a field, if the remaining fields still validate
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let mut mutation = self.fields.clone();
        if mutation.remove(key).is_none() {
            return Err(ModelError::KeyNotFound(key.to_string()));
        }
        match self.model_type.validate(&Value::Object(mutation)) {
            Ok(()) => {}
            Err(ModelError::Validation(reason)) => {
                return Err(ModelError::InvalidOperation(format!(
                    "Unable to delete attribute '{}'. Reason: {}",
                    key, reason
                )))
            }
            Err(other) => return Err(other),
        }
        self.fields.remove(key);
        Ok(())
    }

    /// Merge fields in, if the merged result validates
    pub fn update(&mut self, other: Map<String, Value>) -> Result<()> {
        let mut mutation = self.fields.clone();
        mutation.extend(other);
        let candidate = Value::Object(mutation);
        match self.model_type.validate(&candidate) {
            Ok(()) => {}
            Err(ModelError::Validation(reason)) => {
                return Err(ModelError::InvalidOperation(reason))
            }
            Err(other) => return Err(other),
        }
        if let Value::Object(mutation) = candidate {
            self.fields = mutation;
        }
        Ok(())
    }

    // --- attribute access ---

    /// Attribute-style read; a missing key is [`ModelError::AttributeNotFound`]
    pub fn attr(&self, key: &str) -> Result<&Value> {
        self.fields
            .get(key)
            .ok_or_else(|| ModelError::AttributeNotFound(key.to_string()))
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Value) {
        self.set(key, value)
    }

    /// Attribute-style delete; a missing key is [`ModelError::AttributeNotFound`]
    pub fn del_attr(&mut self, key: &str) -> Result<()> {
        match self.delete(key) {
            Err(ModelError::KeyNotFound(key)) => Err(ModelError::AttributeNotFound(key)),
            other => other,
        }
    }

    // --- refused operations ---

    pub fn clear(&mut self) -> Result<()> {
        Err(refused("clear"))
    }

    pub fn pop(&mut self, _key: &str, _default: Option<Value>) -> Result<Value> {
        Err(refused("pop"))
    }

    pub fn popitem(&mut self) -> Result<(String, Value)> {
        Err(refused("popitem"))
    }

    // --- copies ---

    /// Deep copy of the live fields
    pub fn copy(&self) -> Map<String, Value> {
        self.fields.clone()
    }

    pub fn items(&self) -> Vec<(String, Value)> {
        self.fields.clone().into_iter().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.fields.values().cloned().collect()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    // --- derived views ---

    /// RFC 6902 patch from the original snapshot to the live fields
    pub fn patch_document(&self) -> json_patch::Patch {
        json_patch::diff(
            &Value::Object(self.original.clone()),
            &Value::Object(self.fields.clone()),
        )
    }

    /// [`patch_document`](Self::patch_document), serialized
    pub fn patch(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.patch_document())?)
    }

    /// Last value written per key through [`set`](Self::set)
    #[deprecated(note = "use `patch` instead; the change log only sees plain field writes")]
    pub fn changes(&self) -> Map<String, Value> {
        warn!(
            model = self.model_type.name(),
            "Model::changes is deprecated and will be removed, use Model::patch"
        );
        self.changes.clone()
    }

    /// Validate `obj`, or the live fields when `None`
    pub fn validate(&self, obj: Option<&Value>) -> Result<()> {
        match obj {
            Some(obj) => self.model_type.validate(obj),
            None => self.model_type.validate(&Value::Object(self.fields.clone())),
        }
    }

    // --- nested models ---

    /// The field at `key` as an instance of its property's registered type
    pub fn nested(&self, key: &str, registry: &Registry) -> Result<Model> {
        let ty = self.property_type(key, registry, false)?;
        Model::from_value(ty, self.item(key)?.clone())
    }

    /// The array at `key` as instances of its item schema's registered type
    pub fn nested_items(&self, key: &str, registry: &Registry) -> Result<Vec<Model>> {
        let ty = self.property_type(key, registry, true)?;
        match self.item(key)? {
            Value::Array(items) => items
                .iter()
                .map(|item| Model::from_value(ty, item.clone()))
                .collect(),
            other => Err(ModelError::InvalidOperation(format!(
                "field '{}' is not an array: {}",
                key, other
            ))),
        }
    }

    fn property_type<'r>(
        &self,
        key: &str,
        registry: &'r Registry,
        items: bool,
    ) -> Result<&'r Arc<ModelType>> {
        let prop = self
            .model_type
            .properties()
            .and_then(|props| props.get(key))
            .ok_or_else(|| ModelError::KeyNotFound(key.to_string()))?;
        let schema = if items { prop.get("items") } else { Some(prop) };
        schema
            .and_then(|schema| schema.get("name"))
            .and_then(Value::as_str)
            .and_then(|name| registry.get(name))
            .ok_or_else(|| {
                ModelError::InvalidOperation(format!(
                    "field '{}' does not hold a registered model",
                    key
                ))
            })
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl PartialEq<Value> for Model {
    fn eq(&self, other: &Value) -> bool {
        other.as_object() == Some(&self.fields)
    }
}

fn refused(operation: &str) -> ModelError {
    ModelError::InvalidOperation(format!(
        "{} would remove fields from a validating model",
        operation
    ))
}

/// Copy declared defaults into absent fields, nested objects first
fn apply_defaults(schema: &Value, values: &mut Map<String, Value>) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (key, prop) in props {
        if prop.get("properties").is_some() {
            if let Some(Value::Object(nested)) = values.get_mut(key) {
                apply_defaults(prop, nested);
            }
        }
        if prop.get("type").and_then(Value::as_str) == Some("array") {
            if let (Some(items), Some(Value::Array(list))) = (prop.get("items"), values.get_mut(key)) {
                for item in list.iter_mut() {
                    if let Value::Object(item) = item {
                        apply_defaults(items, item);
                    }
                }
            }
        }
        if !values.contains_key(key) {
            if let Some(default) = prop.get("default") {
                values.insert(key.clone(), default.clone());
            }
        }
    }
}
