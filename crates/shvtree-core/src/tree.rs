//! Loaded device tree and path resolution

use crate::access::AccessLevel;
use crate::builder;
use crate::document::Document;
use crate::error::{LoadError, ResolutionError};
use crate::load::load_types;
use crate::method::{Method, MethodDescriptor};
use crate::node::{Node, Walk};
use crate::registry::TypeRegistry;

/// Immutable tree of nodes together with the types they refer to
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    registry: TypeRegistry,
    root: Node,
}

impl Tree {
    pub fn new(registry: TypeRegistry, root: Node) -> Self {
        Self { registry, root }
    }

    /// Load types and build nodes of `document`
    pub fn from_document(document: &Document) -> Result<Self, LoadError> {
        let registry = load_types(&document.types)?;
        builder::build(document, registry)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// All nodes depth first, starting with the root
    pub fn nodes(&self) -> Walk<'_> {
        self.root.walk()
    }

    /// Node at the slash separated `path`, the root for an empty path
    pub fn resolve_node(&self, path: &str) -> Result<&Node, ResolutionError> {
        if path.is_empty() {
            return Ok(&self.root);
        }
        let mut node = &self.root;
        for segment in path.split('/') {
            node = node
                .child(segment)
                .ok_or_else(|| ResolutionError::NodeNotFound {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?;
        }
        Ok(node)
    }

    /// Node at `path` and its method called `method`
    ///
    /// Only methods of the tree are found, the standard `ls` and `dir` are
    /// answered by the device itself.
    pub fn resolve_method(&self, path: &str, method: &str) -> Result<(&Node, &Method), ResolutionError> {
        let node = self.resolve_node(path)?;
        let found = node
            .method(method)
            .ok_or_else(|| ResolutionError::MethodNotFound {
                path: path.to_string(),
                method: method.to_string(),
            })?;
        Ok((node, found))
    }

    /// Names of the children of the node at `path`
    pub fn ls(&self, path: &str) -> Result<Vec<String>, ResolutionError> {
        Ok(self.resolve_node(path)?.nodes.keys().cloned().collect())
    }

    /// Descriptors of the methods of the node at `path`, standard ones first
    pub fn dir(&self, path: &str) -> Result<Vec<MethodDescriptor>, ResolutionError> {
        let node = self.resolve_node(path)?;
        let mut res = standard_methods();
        res.extend(node.methods.values().map(Method::descriptor));
        Ok(res)
    }
}

/// Descriptors of `dir` and `ls` present on every node
pub fn standard_methods() -> Vec<MethodDescriptor> {
    let standard = |name: &str, param: &str| MethodDescriptor {
        name: name.to_string(),
        flags: Default::default(),
        param: param.to_string(),
        result: "List".to_string(),
        access: AccessLevel::Browse,
        description: String::new(),
    };
    vec![standard("dir", "Any"), standard("ls", "OptionalString")]
}
