//! Reference Resolution
//!
//! Resolves `$ref` URIs of the form `file.json#/definitions/Name`. An empty
//! file part points into the root document; anything else is loaded from
//! the factory's base path through a [`DocumentLoader`].
//!
//! Content taken from an external document has its own references rebased
//! onto that document, so `#/definitions/X` inside `common.json` keeps
//! meaning `common.json#/definitions/X` wherever it gets spliced.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ReferenceError, Result};
use crate::schema::REF_KEY;

/// Key of the table that [`Resolver::self_contained`] appends to a schema
pub const RESOLVED_KEY: &str = "x-resolved";

/// Loads external JSON documents named by `$ref` file parts
pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Arc<Value>>;
}

/// Reads and parses a document from disk on every call
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl DocumentLoader for FsLoader {
    fn load(&self, path: &Path) -> Result<Arc<Value>> {
        let content = fs::read_to_string(path).map_err(|e| ReferenceError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let json: Value = serde_json::from_str(&content).map_err(|e| ReferenceError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(json))
    }
}

/// Memoizes documents per path, so a file referenced many times is read once.
///
/// Not synchronized: a factory build is single-threaded.
#[derive(Debug, Default)]
pub struct CachingLoader<L> {
    inner: L,
    cache: RefCell<HashMap<PathBuf, Arc<Value>>>,
}

impl<L: DocumentLoader> CachingLoader<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Number of distinct documents loaded so far
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl<L: DocumentLoader> DocumentLoader for CachingLoader<L> {
    fn load(&self, path: &Path) -> Result<Arc<Value>> {
        if let Some(doc) = self.cache.borrow().get(path) {
            return Ok(Arc::clone(doc));
        }
        let doc = self.inner.load(path)?;
        self.cache
            .borrow_mut()
            .insert(path.to_path_buf(), Arc::clone(&doc));
        Ok(doc)
    }
}

/// Split a reference URI into its file part and non-empty fragment segments
pub fn parse_uri(uri: &str) -> (&str, Vec<&str>) {
    match uri.split_once('#') {
        Some((file, fragment)) => (
            file,
            fragment.split('/').filter(|s| !s.is_empty()).collect(),
        ),
        None => (uri, Vec::new()),
    }
}

/// Outcome of resolving a reference
#[derive(Debug)]
pub struct Resolved<'a> {
    /// Last fragment segment, `None` when the fragment was empty
    pub key: Option<String>,
    /// Borrowed from the root document, owned when loaded from a file
    pub node: Cow<'a, Value>,
}

/// Resolves references against one root document
pub struct Resolver<'a> {
    root: &'a Value,
    base_path: &'a Path,
    loader: &'a dyn DocumentLoader,
    external_refs: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        root: &'a Value,
        base_path: &'a Path,
        loader: &'a dyn DocumentLoader,
        external_refs: bool,
    ) -> Self {
        Self {
            root,
            base_path,
            loader,
            external_refs,
        }
    }

    /// Resolve the value of a `$ref` key
    pub fn resolve(&self, uri: Option<&Value>) -> Result<Resolved<'a>> {
        let uri = match uri.and_then(Value::as_str) {
            Some(uri) if !uri.is_empty() => uri,
            _ => return Err(ReferenceError::MissingUri.into()),
        };
        let (file, path) = parse_uri(uri);

        if file.is_empty() {
            let (key, node) = walk_fragment(self.root, uri, &path)?;
            return Ok(Resolved {
                key,
                node: Cow::Borrowed(node),
            });
        }

        if !self.external_refs {
            return Err(ReferenceError::ExternalUnsupported {
                uri: uri.to_string(),
            }
            .into());
        }

        let location = self.base_path.join(file);
        debug!(uri, path = %location.display(), "loading external reference");
        let document = self.loader.load(&location)?;
        let (key, node) = walk_fragment(&document, uri, &path)?;
        let mut node = node.clone();
        rebase_refs(&mut node, file);
        Ok(Resolved {
            key,
            node: Cow::Owned(node),
        })
    }

    /// Copy of `schema` that validates without the documents it came from.
    ///
    /// Every `$ref` left in the schema, and transitively in what those
    /// references point at, is resolved once into a table under
    /// [`RESOLVED_KEY`] and rewritten to point into that table.
    pub fn self_contained(&self, schema: &Value) -> Result<Value> {
        let mut keys = HashMap::new();
        let mut pending = Vec::new();
        let mut bound = schema.clone();
        rewrite_refs(&mut bound, &mut keys, &mut pending);

        let mut table = Map::new();
        while let Some((uri, key)) = pending.pop() {
            let mut target = self.resolve(Some(&Value::String(uri)))?.node.into_owned();
            rewrite_refs(&mut target, &mut keys, &mut pending);
            table.insert(key, target);
        }

        if !table.is_empty() {
            if let Value::Object(map) = &mut bound {
                map.insert(RESOLVED_KEY.to_string(), Value::Object(table));
            }
        }
        Ok(bound)
    }
}

/// Point the references in content loaded from `file` back at that file
fn rebase_refs(node: &mut Value, file: &str) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(uri)) = map.get_mut(REF_KEY) {
                if uri.starts_with('#') {
                    *uri = format!("{}{}", file, uri);
                } else if let Some(dir) = Path::new(file)
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                {
                    *uri = dir.join(uri.as_str()).display().to_string();
                }
            }
            for child in map.values_mut() {
                rebase_refs(child, file);
            }
        }
        Value::Array(items) => {
            for item in items {
                rebase_refs(item, file);
            }
        }
        _ => {}
    }
}

/// Rewrite each `$ref` to a key of the resolved table, queueing URIs not seen yet
fn rewrite_refs(
    node: &mut Value,
    keys: &mut HashMap<String, String>,
    pending: &mut Vec<(String, String)>,
) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(uri)) = map.get_mut(REF_KEY) {
                let key = match keys.get(uri.as_str()) {
                    Some(key) => key.clone(),
                    None => {
                        let key = format!("ref{}", keys.len());
                        keys.insert(uri.clone(), key.clone());
                        pending.push((uri.clone(), key.clone()));
                        key
                    }
                };
                *uri = format!("#/{}/{}", RESOLVED_KEY, key);
            }
            for child in map.values_mut() {
                rewrite_refs(child, keys, pending);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_refs(item, keys, pending);
            }
        }
        _ => {}
    }
}

fn walk_fragment<'v>(
    document: &'v Value,
    uri: &str,
    path: &[&str],
) -> Result<(Option<String>, &'v Value)> {
    let mut current = document;
    let mut key = None;
    for segment in path {
        current = current
            .as_object()
            .and_then(|map| map.get(*segment))
            .ok_or_else(|| ReferenceError::UnresolvedSegment {
                uri: uri.to_string(),
                segment: segment.to_string(),
            })?;
        key = Some(segment.to_string());
    }
    Ok((key, current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use serde_json::json;
    use std::cell::Cell;

    struct CountingLoader {
        doc: Value,
        calls: Cell<usize>,
    }

    impl DocumentLoader for CountingLoader {
        fn load(&self, _path: &Path) -> Result<Arc<Value>> {
            self.calls.set(self.calls.get() + 1);
            Ok(Arc::new(self.doc.clone()))
        }
    }

    #[test]
    fn test_parse_uri() {
        assert_eq!(parse_uri("#/definitions/A"), ("", vec!["definitions", "A"]));
        assert_eq!(parse_uri("other.json#//a//b/"), ("other.json", vec!["a", "b"]));
        assert_eq!(parse_uri("other.json"), ("other.json", vec![]));
        assert_eq!(parse_uri("#"), ("", vec![]));
    }

    #[test]
    fn test_resolve_local() {
        let root = json!({"definitions": {"A": {"name": "A"}}});
        let resolver = Resolver::new(&root, Path::new("."), &FsLoader, true);

        let resolved = resolver.resolve(Some(&json!("#/definitions/A"))).unwrap();
        assert_eq!(resolved.key.as_deref(), Some("A"));
        assert_eq!(*resolved.node, json!({"name": "A"}));
        assert!(matches!(resolved.node, Cow::Borrowed(_)));

        let whole = resolver.resolve(Some(&json!("#"))).unwrap();
        assert_eq!(whole.key, None);
        assert_eq!(*whole.node, root);
    }

    #[test]
    fn test_resolve_reports_missing_segment() {
        let root = json!({"definitions": {"A": {}}});
        let resolver = Resolver::new(&root, Path::new("."), &FsLoader, true);

        let err = resolver
            .resolve(Some(&json!("#/definitions/B/properties")))
            .unwrap_err();
        match err {
            ModelError::Reference(ReferenceError::UnresolvedSegment { segment, .. }) => {
                assert_eq!(segment, "B");
            }
            other => panic!("Expected UnresolvedSegment, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_rejects_missing_uri() {
        let root = json!({});
        let resolver = Resolver::new(&root, Path::new("."), &FsLoader, true);
        assert!(matches!(
            resolver.resolve(None),
            Err(ModelError::Reference(ReferenceError::MissingUri))
        ));
        assert!(matches!(
            resolver.resolve(Some(&Value::Null)),
            Err(ModelError::Reference(ReferenceError::MissingUri))
        ));
    }

    #[test]
    fn test_external_disabled() {
        let root = json!({});
        let resolver = Resolver::new(&root, Path::new("."), &FsLoader, false);
        assert!(matches!(
            resolver.resolve(Some(&json!("common.json#/A"))),
            Err(ModelError::Reference(ReferenceError::ExternalUnsupported { .. }))
        ));
    }

    #[test]
    fn test_external_content_rebased() {
        let loader = CountingLoader {
            doc: json!({"definitions": {
                "Addr": {"properties": {
                    "geo": {"$ref": "#/definitions/Geo"},
                    "zone": {"$ref": "zones.json#/Zone"}
                }},
                "Geo": {"name": "Geo"}
            }}),
            calls: Cell::new(0),
        };
        let root = json!({});
        let resolver = Resolver::new(&root, Path::new("/schemas"), &loader, true);

        let addr = resolver
            .resolve(Some(&json!("shared/common.json#/definitions/Addr")))
            .unwrap();
        let props = &addr.node["properties"];
        assert_eq!(props["geo"]["$ref"], "shared/common.json#/definitions/Geo");
        assert_eq!(props["zone"]["$ref"], "shared/zones.json#/Zone");
    }

    #[test]
    fn test_self_contained_closes_over_cycles() {
        let root = json!({"definitions": {
            "Node": {"properties": {"next": {"$ref": "#/definitions/Node"}}}
        }});
        let resolver = Resolver::new(&root, Path::new("."), &FsLoader, false);
        let bound = json!({"properties": {
            "next": {"properties": {"next": {"$ref": "#/definitions/Node"}}}
        }});

        let contained = resolver.self_contained(&bound).unwrap();

        assert_eq!(
            contained["properties"]["next"]["properties"]["next"]["$ref"],
            "#/x-resolved/ref0"
        );
        assert_eq!(
            contained[RESOLVED_KEY]["ref0"],
            json!({"properties": {"next": {"$ref": "#/x-resolved/ref0"}}})
        );
    }

    #[test]
    fn test_self_contained_without_refs_is_a_copy() {
        let root = json!({});
        let resolver = Resolver::new(&root, Path::new("."), &FsLoader, false);
        let bound = json!({"properties": {"a": {"type": "string"}}});
        assert_eq!(resolver.self_contained(&bound).unwrap(), bound);
    }

    #[test]
    fn test_caching_loader_loads_once() {
        let loader = CachingLoader::new(CountingLoader {
            doc: json!({"A": {"name": "A"}, "B": {"name": "B"}}),
            calls: Cell::new(0),
        });
        let root = json!({});
        let resolver = Resolver::new(&root, Path::new("/schemas"), &loader, true);

        resolver.resolve(Some(&json!("common.json#/A"))).unwrap();
        let b = resolver.resolve(Some(&json!("common.json#/B"))).unwrap();

        assert_eq!(*b.node, json!({"name": "B"}));
        assert_eq!(loader.inner.calls.get(), 1);
        assert_eq!(loader.cached(), 1);
    }
}
