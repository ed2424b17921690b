//! Model Factory
//!
//! Walks a JSON schema and registers one [`ModelType`] per named object
//! schema. The walk is pre-order over children so nested definitions are
//! registered before the schemas that use them; `$ref` nodes are spliced
//! and `allOf` nodes merged in place, then walked again.
//!
//! Names are the recursion guard: a name that is registered, or currently
//! being walked, is never walked twice. This is what terminates
//! self-referential schemas.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::compose::merge_all_of;
use crate::config::ModelsConfig;
use crate::error::{ModelError, Result};
use crate::reference::{CachingLoader, DocumentLoader, FsLoader, Resolver};
use crate::registry::{ModelType, Registry};
use crate::schema::{detect_shape, schema_type, NamePolicy, NodeShape, ALL_OF_KEY, REF_KEY};
use crate::validate::{JsonSchemaValidator, Validate};

/// Options for a factory build
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    pub name_policy: NamePolicy,
    /// Directory for external `$ref` documents and schema file paths
    pub base_path: PathBuf,
    /// Supertype for generated types that have no inferred one
    pub base: Option<Arc<ModelType>>,
    pub external_refs: bool,
    pub cache_external: bool,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            name_policy: NamePolicy::default(),
            base_path: PathBuf::from("."),
            base: None,
            external_refs: true,
            cache_external: true,
        }
    }
}

impl FactoryOptions {
    pub fn from_config(config: &ModelsConfig) -> Self {
        Self {
            name_policy: config.factory.name_policy,
            base_path: config.base_path(),
            base: None,
            external_refs: config.factory.external_refs,
            cache_external: config.factory.cache_external,
        }
    }

    pub fn with_name_policy(mut self, policy: NamePolicy) -> Self {
        self.name_policy = policy;
        self
    }

    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn with_base(mut self, base: Arc<ModelType>) -> Self {
        self.base = Some(base);
        self
    }
}

/// Where a schema comes from
#[derive(Debug, Clone)]
pub enum SchemaSource {
    Value(Value),
    /// Raw JSON text
    Text(String),
    /// File path, relative to the factory's base path
    Path(PathBuf),
}

impl SchemaSource {
    /// Text starting with `{` is inline JSON, anything else a path
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.trim_start().starts_with('{') {
            SchemaSource::Text(raw)
        } else {
            SchemaSource::Path(PathBuf::from(raw))
        }
    }

    fn into_value(self, base_path: &Path) -> Result<Value> {
        match self {
            SchemaSource::Value(value) => Ok(value),
            SchemaSource::Text(text) => Ok(serde_json::from_str(&text)?),
            SchemaSource::Path(path) => {
                let content = fs::read_to_string(base_path.join(path))?;
                Ok(serde_json::from_str(&content)?)
            }
        }
    }
}

impl From<Value> for SchemaSource {
    fn from(value: Value) -> Self {
        SchemaSource::Value(value)
    }
}

/// Builds model registries from schemas
pub struct ModelFactory {
    options: FactoryOptions,
    validator: Arc<dyn Validate>,
    loader: Box<dyn DocumentLoader>,
}

impl ModelFactory {
    pub fn new(options: FactoryOptions) -> Self {
        let loader: Box<dyn DocumentLoader> = if options.cache_external {
            Box::new(CachingLoader::new(FsLoader))
        } else {
            Box::new(FsLoader)
        };
        Self {
            options,
            validator: Arc::new(JsonSchemaValidator),
            loader,
        }
    }

    /// Replace the validation capability handed to generated types
    pub fn with_validator(mut self, validator: Arc<dyn Validate>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the loader used for external `$ref` documents
    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    /// Walk `schema` and register every named object schema in it.
    ///
    /// The schema is copied first; any error aborts the whole build.
    pub fn build(&self, schema: &Value) -> Result<Registry> {
        let Value::Object(root_map) = schema else {
            return Err(ModelError::not_an_object(schema));
        };
        let root_name = self.options.name_policy.schema_name(root_map);

        let root = schema.clone();
        let mut working = schema.clone();
        let mut walker = Walker {
            resolver: Resolver::new(
                &root,
                &self.options.base_path,
                self.loader.as_ref(),
                self.options.external_refs,
            ),
            policy: self.options.name_policy,
            base: self.options.base.as_ref(),
            validator: &self.validator,
            types: BTreeMap::new(),
            in_progress: HashSet::new(),
        };
        walker.process(&mut working, None)?;

        let types = walker.types;
        info!(root = ?root_name, types = types.len(), "built model registry");
        Ok(Registry::new(types, root_name))
    }

    /// [`build`](Self::build) from inline JSON, a file, or a value
    pub fn build_source(&self, source: SchemaSource) -> Result<Registry> {
        let schema = source.into_value(&self.options.base_path)?;
        self.build(&schema)
    }
}

/// What [`build_model`] returns
#[derive(Debug, Clone)]
pub enum Built {
    Model(Arc<ModelType>),
    Registry(Registry),
}

impl Built {
    pub fn into_model(self) -> Option<Arc<ModelType>> {
        match self {
            Built::Model(model) => Some(model),
            Built::Registry(registry) => registry.into_root(),
        }
    }

    pub fn into_registry(self) -> Option<Registry> {
        match self {
            Built::Registry(registry) => Some(registry),
            Built::Model(_) => None,
        }
    }
}

/// Build the root model type, or the whole registry when `whole_registry`
pub fn build_model(
    source: impl Into<SchemaSource>,
    options: FactoryOptions,
    whole_registry: bool,
) -> Result<Built> {
    let registry = ModelFactory::new(options).build_source(source.into())?;
    if whole_registry {
        return Ok(Built::Registry(registry));
    }
    let name = registry.root_name().unwrap_or("<unnamed>").to_string();
    registry.into_root().map(Built::Model).ok_or_else(|| {
        ModelError::InvalidSchema(format!("root schema {} did not produce a model type", name))
    })
}

/// Root model type of `schema`, with default options
pub fn model_factory(schema: &Value) -> Result<Arc<ModelType>> {
    build_model(schema.clone(), FactoryOptions::default(), false)?
        .into_model()
        .ok_or_else(|| ModelError::InvalidSchema("root schema did not produce a model type".into()))
}

/// Every model type in `schema`, with default options
pub fn registry_factory(schema: &Value) -> Result<Registry> {
    ModelFactory::new(FactoryOptions::default()).build(schema)
}

enum Step {
    Done(Option<Arc<ModelType>>),
    /// The node was spliced or merged and has to be walked again
    Reshaped {
        merged: Option<Value>,
        supertype: Option<String>,
    },
}

struct Walker<'a> {
    resolver: Resolver<'a>,
    policy: NamePolicy,
    base: Option<&'a Arc<ModelType>>,
    validator: &'a Arc<dyn Validate>,
    types: BTreeMap<String, Arc<ModelType>>,
    in_progress: HashSet<String>,
}

impl Walker<'_> {
    fn process(
        &mut self,
        node: &mut Value,
        mut supertype: Option<String>,
    ) -> Result<Option<Arc<ModelType>>> {
        // allOf references already merged into this node across reshapes
        let mut composed = Vec::new();
        loop {
            let Value::Object(map) = &mut *node else {
                return Ok(None);
            };
            let name = self.policy.schema_name(map);

            if name.is_none() && schema_type(map) == Some("object") {
                return Err(ModelError::InvalidSchema(format!(
                    "object must have a name attribute: {}",
                    Value::Object(map.clone())
                )));
            }

            if let Some(name) = &name {
                if let Some(existing) = self.types.get(name) {
                    return Ok(Some(Arc::clone(existing)));
                }
                if !self.in_progress.insert(name.clone()) {
                    debug!(name = name.as_str(), "already being walked, not recursing");
                    return Ok(None);
                }
            }

            let step = self.visit(map, name.as_deref(), supertype.take(), &mut composed);
            if let Some(name) = &name {
                self.in_progress.remove(name);
            }

            match step? {
                Step::Done(ty) => return Ok(ty),
                Step::Reshaped {
                    merged,
                    supertype: next,
                } => {
                    if let Some(merged) = merged {
                        *node = merged;
                    }
                    supertype = next;
                }
            }
        }
    }

    fn visit(
        &mut self,
        map: &mut Map<String, Value>,
        name: Option<&str>,
        supertype: Option<String>,
        composed: &mut Vec<String>,
    ) -> Result<Step> {
        let shape = detect_shape(map, name);

        for (key, child) in map.iter_mut() {
            if shape == NodeShape::Array && key == "items" {
                continue;
            }
            if child.is_object() {
                self.process(child, None)?;
            }
        }

        match shape {
            NodeShape::Array => {
                let Some(items) = map.get_mut("items") else {
                    return Err(ModelError::InvalidSchema(format!(
                        "array schema {} has no \"items\"",
                        name.unwrap_or("<anonymous>")
                    )));
                };
                Ok(Step::Done(self.process(items, None)?))
            }
            NodeShape::Reference => {
                self.splice(map)?;
                Ok(Step::Reshaped {
                    merged: None,
                    supertype,
                })
            }
            NodeShape::Composition => {
                skip_composed(map, composed);
                self.prepare_supertype(map)?;
                let merged = merge_all_of(map, &self.resolver, self.policy)?;
                debug!(
                    name = ?name,
                    supertype = ?merged.supertype,
                    "merged allOf"
                );
                // A supertype handed down from an outer merge is the nearer one
                Ok(Step::Reshaped {
                    merged: Some(merged.node),
                    supertype: supertype.or(merged.supertype),
                })
            }
            NodeShape::NamedObject => match name {
                Some(name) => Ok(Step::Done(Some(self.register(name, map, supertype)?))),
                None => Ok(Step::Done(None)),
            },
            NodeShape::Plain => Ok(Step::Done(None)),
        }
    }

    /// Walk the first referenced `allOf` element, so the supertype is
    /// registered before the composed type that names it
    fn prepare_supertype(&mut self, map: &Map<String, Value>) -> Result<()> {
        let first_ref = map
            .get(ALL_OF_KEY)
            .and_then(Value::as_array)
            .and_then(|elements| elements.iter().find_map(|e| e.get(REF_KEY)));
        if let Some(uri) = first_ref {
            let mut target = self.resolver.resolve(Some(uri))?.node.into_owned();
            self.process(&mut target, None)?;
        }
        Ok(())
    }

    /// Replace `$ref` with the referenced content, following chains
    fn splice(&self, map: &mut Map<String, Value>) -> Result<()> {
        let mut seen: Vec<String> = Vec::new();
        while let Some(uri) = map.remove(REF_KEY) {
            let label = uri.as_str().unwrap_or_default().to_string();
            if seen.contains(&label) {
                return Err(ModelError::InvalidSchema(format!(
                    "reference cycle through {}",
                    label
                )));
            }
            let resolved = self.resolver.resolve(Some(&uri))?;
            debug!(uri = label.as_str(), key = ?resolved.key, "splicing reference");
            match resolved.node.into_owned() {
                Value::Object(target) => map.extend(target),
                other => {
                    return Err(ModelError::InvalidSchema(format!(
                        "reference {} must point at an object, found {}",
                        label, other
                    )))
                }
            }
            seen.push(label);
        }
        Ok(())
    }

    fn register(
        &mut self,
        name: &str,
        map: &Map<String, Value>,
        supertype: Option<String>,
    ) -> Result<Arc<ModelType>> {
        let parent = supertype
            .as_deref()
            .and_then(|s| self.types.get(s))
            .or(self.base)
            .cloned();
        let schema = Value::Object(map.clone());
        let validation_schema = self.resolver.self_contained(&schema)?;
        let ty = Arc::new(
            ModelType::new(name.to_string(), schema, parent, Arc::clone(self.validator))
                .with_validation_schema(validation_schema),
        );
        debug!(
            name,
            supertype = ?ty.supertype().map(|t| t.name()),
            "registered model type"
        );
        Ok(Arc::clone(self.types.entry(name.to_string()).or_insert(ty)))
    }
}

/// Drop `allOf` references that were already merged into this node, so a
/// composition that leads back to itself stops, then record the rest
fn skip_composed(map: &mut Map<String, Value>, composed: &mut Vec<String>) {
    let Some(Value::Array(elements)) = map.get_mut(ALL_OF_KEY) else {
        return;
    };
    elements.retain(|element| match element.get(REF_KEY).and_then(Value::as_str) {
        Some(uri) if composed.iter().any(|seen| seen == uri) => {
            debug!(uri, "allOf reference already merged, skipping");
            false
        }
        _ => true,
    });
    composed.extend(
        elements
            .iter()
            .filter_map(|element| element.get(REF_KEY).and_then(Value::as_str))
            .map(str::to_string),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReferenceError;
    use serde_json::json;

    #[test]
    fn test_simple_object() {
        let registry = registry_factory(&json!({
            "name": "Person",
            "type": "object",
            "properties": {"age": {"type": "integer"}}
        }))
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.root().map(|t| t.name()), Some("Person"));
    }

    #[test]
    fn test_non_object_root() {
        assert!(matches!(
            registry_factory(&json!(["not", "a", "schema"])),
            Err(ModelError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_unnamed_object_rejected() {
        let err = registry_factory(&json!({
            "name": "Outer",
            "type": "object",
            "properties": {"inner": {"type": "object"}}
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSchema(_)));
    }

    #[test]
    fn test_array_without_items() {
        let err = registry_factory(&json!({
            "name": "Outer",
            "type": "object",
            "properties": {"list": {"type": "array"}}
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSchema(_)));
    }

    #[test]
    fn test_array_propagates_item_type() {
        let registry = registry_factory(&json!({
            "name": "Tags",
            "type": "array",
            "items": {"name": "Tag", "type": "object"}
        }))
        .unwrap();

        assert!(registry.contains("Tag"));
        assert!(!registry.contains("Tags"));
        assert!(registry.root().is_none());
    }

    #[test]
    fn test_typeless_named_node() {
        let registry = registry_factory(&json!({
            "name": "Loose",
            "properties": {"x": {"name": "Label", "type": "string"}}
        }))
        .unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Loose"]);
    }

    #[test]
    fn test_reference_spliced_into_bound_schema() {
        let registry = registry_factory(&json!({
            "name": "Order",
            "type": "object",
            "properties": {"ship_to": {"$ref": "#/definitions/Address"}},
            "definitions": {
                "Address": {
                    "name": "Address",
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                }
            }
        }))
        .unwrap();

        let order = registry.get("Order").unwrap();
        let ship_to = &order.schema()["properties"]["ship_to"];
        assert_eq!(ship_to["name"], "Address");
        assert!(ship_to.get("$ref").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unresolvable_reference_aborts() {
        let err = registry_factory(&json!({
            "name": "Order",
            "type": "object",
            "properties": {"ship_to": {"$ref": "#/definitions/Nowhere"}}
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Reference(ReferenceError::UnresolvedSegment { .. })
        ));
    }

    #[test]
    fn test_reference_chain_cycle() {
        let err = registry_factory(&json!({
            "name": "Root",
            "properties": {"a": {"$ref": "#/definitions/A"}},
            "definitions": {
                "A": {"$ref": "#/definitions/B"},
                "B": {"$ref": "#/definitions/A"}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSchema(_)));
    }

    #[test]
    fn test_self_reference_terminates() {
        let registry = registry_factory(&json!({
            "name": "Node",
            "type": "object",
            "properties": {
                "value": {"type": "integer"},
                "next": {"$ref": "#"}
            }
        }))
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("Node"));
    }

    #[test]
    fn test_self_composition_terminates() {
        let registry = registry_factory(&json!({
            "name": "Root",
            "type": "object",
            "properties": {"a": {"$ref": "#/definitions/A"}},
            "definitions": {
                "A": {
                    "name": "A",
                    "type": "object",
                    "allOf": [{"$ref": "#/definitions/A"}],
                    "properties": {"x": {"type": "integer"}}
                }
            }
        }))
        .unwrap();

        let a = registry.get("A").unwrap();
        assert!(a.schema().get(ALL_OF_KEY).is_none());
        assert!(a.properties().unwrap().contains_key("x"));
    }

    #[test]
    fn test_recursive_type_validates_nested_data() {
        let registry = registry_factory(&json!({
            "name": "List",
            "type": "object",
            "properties": {"head": {"$ref": "#/definitions/Cell"}},
            "definitions": {
                "Cell": {
                    "name": "Cell",
                    "type": "object",
                    "properties": {
                        "value": {"type": "integer"},
                        "next": {"$ref": "#/definitions/Cell"}
                    }
                }
            }
        }))
        .unwrap();
        let cell = registry.get("Cell").unwrap();

        assert!(cell
            .validate(&json!({"value": 1, "next": {"value": 2, "next": {"value": 3}}}))
            .is_ok());
        assert!(matches!(
            cell.validate(&json!({"value": 1, "next": {"value": 2, "next": {"value": "x"}}})),
            Err(ModelError::Validation(_))
        ));
        assert!(cell.validation_schema().get("x-resolved").is_some());
    }

    #[test]
    fn test_base_type_fallback() {
        let base = model_factory(&json!({"name": "Entity", "type": "object"})).unwrap();
        let options = FactoryOptions::default().with_base(Arc::clone(&base));
        let registry = ModelFactory::new(options)
            .build(&json!({"name": "User", "type": "object"}))
            .unwrap();

        let user = registry.get("User").unwrap();
        assert!(user.is_subtype_of("Entity"));
        assert!(!registry.contains("Entity"));
    }

    #[test]
    fn test_legacy_name_policy() {
        let schema = json!({"title": "Titled", "type": "object"});

        assert!(registry_factory(&schema).is_err());

        let options = FactoryOptions::default().with_name_policy(NamePolicy::Legacy);
        let registry = ModelFactory::new(options).build(&schema).unwrap();
        assert!(registry.contains("Titled"));
    }

    #[test]
    fn test_schema_source_parse() {
        assert!(matches!(SchemaSource::parse("  {\"name\": \"A\"}"), SchemaSource::Text(_)));
        assert!(matches!(SchemaSource::parse("schemas/a.json"), SchemaSource::Path(_)));
    }

    #[test]
    fn test_build_model_from_text() {
        let built = build_model(
            SchemaSource::parse(r#"{"name": "Inline", "type": "object"}"#),
            FactoryOptions::default(),
            false,
        )
        .unwrap();
        assert_eq!(built.into_model().map(|t| t.name().to_string()), Some("Inline".to_string()));
    }

    #[test]
    fn test_build_model_requires_root_type() {
        let err = build_model(json!({"type": "string"}), FactoryOptions::default(), false)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSchema(_)));
    }
}
