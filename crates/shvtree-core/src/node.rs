//! Nodes of the device tree

use indexmap::IndexMap;

use crate::method::Method;

/// Property declaration of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Name of the property type
    pub type_name: String,
    /// No `set` method is provided
    pub readonly: bool,
    /// Name of the change signal, `None` when the property doesn't signal
    pub signal: Option<String>,
}

/// Named point of the tree
///
/// Children and methods are kept in declaration order; synthesized property
/// methods come before the declared ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// Name of the node, empty for the root
    pub name: String,
    /// Slash separated path from the root, empty for the root
    pub path: String,
    pub nodes: IndexMap<String, Node>,
    pub methods: IndexMap<String, Method>,
    pub property: Option<Property>,
    pub description: String,
}

impl Node {
    /// Implicit unnamed root
    pub fn root() -> Self {
        Self::default()
    }

    /// Empty node placed under the node at `parent`
    pub fn new(parent: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: join_path(parent, name),
            ..Self::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Name of the signal sent when the property value changes
    pub fn change_signal(&self) -> Option<&str> {
        self.property.as_ref().and_then(|p| p.signal.as_deref())
    }

    /// This node and all its descendants, depth first in declaration order
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Path of `name` placed under `parent`
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.nodes.values().rev());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_order() {
        let mut root = Node::root();
        let mut a = Node::new("", "a");
        a.nodes.insert("x".to_string(), Node::new("a", "x"));
        root.nodes.insert("a".to_string(), a);
        root.nodes.insert("b".to_string(), Node::new("", "b"));
        let paths: Vec<_> = root.walk().map(|node| node.path.as_str()).collect();
        assert_eq!(paths, vec!["", "a", "a/x", "b"]);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "foo"), "foo");
        assert_eq!(join_path("foo/.app", "log"), "foo/.app/log");
    }
}
