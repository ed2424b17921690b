//! Familiar Models
//!
//! Generates validating, change-tracking model types from JSON Schema at
//! runtime. Shape, defaults, and inheritance all come from the schema.
//!
//! ## Features
//!
//! - **Reference Resolution**: `$ref` into the same document or into other files
//! - **Composition**: `allOf` merging, with the first referenced schema as supertype
//! - **Registry**: one model type per named schema, cycles included
//! - **Models**: defaults on construction, validated deletes and updates, JSON Patch diffs
//!
//! ## Pipeline
//!
//! ```text
//! schema ──► ModelFactory ──► Registry { name → ModelType }
//!              │    │                        │
//!        Resolver  merge_all_of         Model::new(type, fields)
//!        ($ref)    (allOf)                   │
//!                                   set / delete / update / patch
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use familiar_models::{model_factory, Model};
//! use serde_json::{json, Map};
//!
//! let person = model_factory(&json!({
//!     "name": "Person",
//!     "type": "object",
//!     "properties": {"role": {"type": "string", "default": "member"}}
//! }))?;
//!
//! let mut model = Model::new(&person, Map::new());
//! model.set("role", json!("admin"));
//! println!("{}", model.patch()?);
//! # Ok::<(), familiar_models::ModelError>(())
//! ```

pub mod compose;
pub mod config;
pub mod error;
pub mod factory;
pub mod model;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod validate;

pub use compose::{merge_all_of, merge_value, Merged};
pub use config::{FactoryConfig, ModelsConfig};
pub use error::{ModelError, ReferenceError, Result};
pub use factory::{
    build_model, model_factory, registry_factory, Built, FactoryOptions, ModelFactory,
    SchemaSource,
};
pub use model::Model;
pub use reference::{
    parse_uri, CachingLoader, DocumentLoader, FsLoader, Resolved, Resolver, RESOLVED_KEY,
};
pub use registry::{ModelType, Registry};
pub use schema::{detect_shape, NamePolicy, NodeShape};
pub use validate::{JsonSchemaValidator, Validate};
