//! Model Registry
//!
//! Generated model types, keyed by schema name. A registry is produced once
//! by [`ModelFactory`](crate::factory::ModelFactory) and never changes after.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ModelError, Result};
use crate::model::Model;
use crate::validate::Validate;

/// A generated model type: one named schema plus its inferred supertype
pub struct ModelType {
    name: String,
    schema: Value,
    /// The bound schema with its leftover references resolved into it
    validation_schema: Value,
    supertype: Option<Arc<ModelType>>,
    validator: Arc<dyn Validate>,
}

impl ModelType {
    pub(crate) fn new(
        name: String,
        schema: Value,
        supertype: Option<Arc<ModelType>>,
        validator: Arc<dyn Validate>,
    ) -> Self {
        Self {
            name,
            validation_schema: schema.clone(),
            schema,
            supertype,
            validator,
        }
    }

    pub(crate) fn with_validation_schema(mut self, validation_schema: Value) -> Self {
        self.validation_schema = validation_schema;
        self
    }

    /// Schema name this type was generated from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound schema, fully merged and with references spliced
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// What instances are validated against; self-contained even when the
    /// bound schema still refers back into its source document
    pub fn validation_schema(&self) -> &Value {
        &self.validation_schema
    }

    /// Declared properties of the bound schema
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }

    pub fn supertype(&self) -> Option<&Arc<ModelType>> {
        self.supertype.as_ref()
    }

    /// Supertype chain, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = &Arc<ModelType>> {
        std::iter::successors(self.supertype.as_ref(), |t| t.supertype.as_ref())
    }

    /// True for this type's own name or any ancestor's
    pub fn is_subtype_of(&self, name: &str) -> bool {
        self.name == name || self.ancestors().any(|t| t.name == name)
    }

    /// Validate a value against the bound schema
    pub fn validate(&self, instance: &Value) -> Result<()> {
        self.validator.validate(instance, &self.validation_schema)
    }

    /// Build a model instance from an initial field mapping
    pub fn instantiate(self: &Arc<Self>, fields: Map<String, Value>) -> Model {
        Model::new(self, fields)
    }
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("name", &self.name)
            .field("supertype", &self.supertype.as_ref().map(|t| t.name()))
            .finish_non_exhaustive()
    }
}

/// All model types produced by one factory build
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: BTreeMap<String, Arc<ModelType>>,
    root: Option<String>,
}

impl Registry {
    pub(crate) fn new(types: BTreeMap<String, Arc<ModelType>>, root: Option<String>) -> Self {
        Self { types, root }
    }

    /// The type named by the root schema, if it produced one
    pub fn root(&self) -> Option<&Arc<ModelType>> {
        self.root.as_deref().and_then(|name| self.types.get(name))
    }

    pub fn root_name(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelType>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ModelType>)> {
        self.types.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Build an instance of a registered type
    pub fn instantiate(&self, name: &str, fields: Map<String, Value>) -> Result<Model> {
        let ty = self
            .get(name)
            .ok_or_else(|| ModelError::KeyNotFound(name.to_string()))?;
        Ok(ty.instantiate(fields))
    }

    /// Consume the registry, keeping only the root type
    pub fn into_root(mut self) -> Option<Arc<ModelType>> {
        let root = self.root.take()?;
        self.types.remove(&root)
    }
}
