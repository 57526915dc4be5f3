//! Construction of the node tree from a document
//!
//! Property nodes get their `get`, `set` and change signal methods
//! synthesized here, described nodes get a `desc` getter. Construction is all
//! or nothing, the first problem found is returned.

use indexmap::IndexMap;
use tracing::debug;

use crate::access::AccessLevel;
use crate::document::{Document, Entries, MethodSpec, NodeSpec, SignalSetting};
use crate::error::{LoadError, Location};
use crate::method::{Method, MethodFlags, MethodOrigin};
use crate::node::{Node, Property};
use crate::registry::TypeRegistry;
use crate::tree::Tree;
use crate::types::GET_PARAM;

/// Methods every node answers on its own, never declared by documents
pub const RESERVED_METHODS: [&str; 3] = ["ls", "dir", "lsmod"];

/// Default name of the property change signal
pub const DEFAULT_SIGNAL: &str = "chng";

/// Descriptions longer than this are flagged as large results
pub const LARGE_DESCRIPTION: usize = 1024;

/// Build the tree described by `document` over an already loaded registry
///
/// The registry is expected to come from [`load_types`](crate::load::load_types)
/// on the same document.
pub fn build(document: &Document, registry: TypeRegistry) -> Result<Tree, LoadError> {
    if !document.extra.is_empty() {
        return Err(unsupported(&Location::default(), document.extra.keys()));
    }
    let builder = TreeBuilder {
        registry: &registry,
    };
    let mut root = Node::root();
    root.nodes = builder.children(&Location::new("nodes"), "", &document.nodes)?;
    let tree = Tree::new(registry, root);
    debug!(
        types = tree.registry().custom().count(),
        nodes = tree.nodes().count() - 1,
        "Tree built"
    );
    Ok(tree)
}

fn unsupported<'a>(location: &Location, keys: impl Iterator<Item = &'a String>) -> LoadError {
    LoadError::UnsupportedKeys {
        location: location.clone(),
        keys: keys.map(String::as_str).collect::<Vec<_>>().join(", "),
    }
}

fn check_name(location: &Location, name: &str) -> Result<(), LoadError> {
    if name.is_empty() || name.contains('/') || name.contains(':') {
        return Err(LoadError::invalid(location, format!("Invalid name '{}'", name)));
    }
    Ok(())
}

struct TreeBuilder<'a> {
    registry: &'a TypeRegistry,
}

impl TreeBuilder<'_> {
    fn children(
        &self,
        location: &Location,
        parent: &str,
        specs: &Entries<NodeSpec>,
    ) -> Result<IndexMap<String, Node>, LoadError> {
        let mut nodes = IndexMap::with_capacity(specs.len());
        for (name, spec) in specs.iter() {
            let location = location.join(name);
            if nodes.contains_key(name) {
                return Err(LoadError::DuplicateSibling {
                    location,
                    name: name.to_string(),
                });
            }
            let node = self.node(&location, parent, name, spec)?;
            nodes.insert(name.to_string(), node);
        }
        Ok(nodes)
    }

    fn type_ref(&self, location: &Location, name: &str) -> Result<String, LoadError> {
        if self.registry.contains(name) {
            Ok(name.to_string())
        } else {
            Err(LoadError::UnknownType {
                location: location.clone(),
                name: name.to_string(),
            })
        }
    }

    fn node(&self, location: &Location, parent: &str, name: &str, spec: &NodeSpec) -> Result<Node, LoadError> {
        check_name(location, name)?;
        if !spec.extra.is_empty() {
            return Err(unsupported(location, spec.extra.keys()));
        }
        let mut node = Node::new(parent, name);
        node.description = spec.description.clone().unwrap_or_default();

        match &spec.property {
            Some(type_name) => {
                let property = self.property(location, type_name, spec)?;
                for method in property_methods(&property) {
                    if node.methods.contains_key(&method.name) {
                        return Err(LoadError::DuplicateSibling {
                            location: location.join("signal"),
                            name: method.name,
                        });
                    }
                    if spec.methods.get(&method.name).is_some() {
                        return Err(LoadError::PropertyMethodConflict {
                            location: location.join("methods").join(&method.name),
                            method: method.name,
                        });
                    }
                    node.methods.insert(method.name.clone(), method);
                }
                node.property = Some(property);
            }
            None => {
                let stray: Vec<String> = [("readonly", spec.readonly.is_some()), ("signal", spec.signal.is_some())]
                    .into_iter()
                    .filter(|(_, present)| *present)
                    .map(|(key, _)| key.to_string())
                    .collect();
                if !stray.is_empty() {
                    return Err(unsupported(location, stray.iter()));
                }
            }
        }

        let methods_location = location.join("methods");
        for (method_name, method_spec) in spec.methods.iter() {
            let location = methods_location.join(method_name);
            if node.methods.contains_key(method_name) {
                return Err(LoadError::DuplicateSibling {
                    location,
                    name: method_name.to_string(),
                });
            }
            let method = self.method(&location, method_name, method_spec)?;
            node.methods.insert(method.name.clone(), method);
        }

        if !node.description.is_empty() && !node.methods.contains_key("desc") {
            let mut desc = Method::new("desc");
            desc.result = "String".to_string();
            desc.flags = MethodFlags::GETTER;
            if node.description.chars().count() > LARGE_DESCRIPTION {
                desc.flags |= MethodFlags::LARGE_RESULT_HINT;
            }
            desc.origin = MethodOrigin::Description;
            node.methods.insert(desc.name.clone(), desc);
        }

        node.nodes = self.children(&location.join("nodes"), &node.path, &spec.nodes)?;
        Ok(node)
    }

    fn property(&self, location: &Location, type_name: &str, spec: &NodeSpec) -> Result<Property, LoadError> {
        let type_name = self.type_ref(&location.join("property"), type_name)?;
        let readonly = spec.readonly.unwrap_or(false);
        let signal = match &spec.signal {
            None => (!readonly).then(|| DEFAULT_SIGNAL.to_string()),
            Some(SignalSetting::Enabled(enabled)) => enabled.then(|| DEFAULT_SIGNAL.to_string()),
            Some(SignalSetting::Named(name)) => {
                check_name(&location.join("signal"), name)?;
                Some(name.clone())
            }
        };
        Ok(Property {
            type_name,
            readonly,
            signal,
        })
    }

    fn method(&self, location: &Location, name: &str, spec: &MethodSpec) -> Result<Method, LoadError> {
        check_name(location, name)?;
        if RESERVED_METHODS.contains(&name) {
            return Err(LoadError::ReservedMethod {
                location: location.clone(),
                name: name.to_string(),
            });
        }
        if !spec.extra.is_empty() {
            return Err(unsupported(location, spec.extra.keys()));
        }
        let mut method = Method::new(name);
        if let Some(param) = &spec.param {
            method.param = self.type_ref(&location.join("param"), param)?;
        }
        if let Some(result) = &spec.result {
            method.result = self.type_ref(&location.join("result"), result)?;
        }
        if let Some(access) = &spec.access {
            method.access = access.parse().map_err(|_| LoadError::InvalidAccessLevel {
                location: location.join("access"),
                value: access.clone(),
            })?;
        }
        for flag in spec.flags.iter().flatten() {
            method.flags |= flag.parse::<MethodFlags>().map_err(|_| LoadError::InvalidFlag {
                location: location.join("flags"),
                value: flag.clone(),
            })?;
        }
        method.description = spec.description.clone().unwrap_or_default();
        Ok(method)
    }
}

/// Methods synthesized for a property in the order they are listed
fn property_methods(property: &Property) -> Vec<Method> {
    let mut methods = Vec::with_capacity(3);

    let mut get = Method::new("get");
    get.param = GET_PARAM.to_string();
    get.result = property.type_name.clone();
    get.access = AccessLevel::Read;
    get.flags = MethodFlags::GETTER;
    get.origin = MethodOrigin::Property;
    methods.push(get);

    if !property.readonly {
        let mut set = Method::new("set");
        set.param = property.type_name.clone();
        set.access = AccessLevel::Write;
        set.flags = MethodFlags::SETTER;
        set.origin = MethodOrigin::Property;
        methods.push(set);
    }

    if let Some(signal) = &property.signal {
        let mut chng = Method::new(signal);
        chng.result = property.type_name.clone();
        chng.access = AccessLevel::Read;
        chng.flags = MethodFlags::SIGNAL;
        chng.origin = MethodOrigin::Property;
        methods.push(chng);
    }
    methods
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load_types;

    fn tree(yaml: &str) -> Result<Tree, LoadError> {
        let document = Document::from_yaml(yaml).unwrap();
        let registry = load_types(&document.types)?;
        build(&document, registry)
    }

    fn method_names(node: &Node) -> Vec<&str> {
        node.methods.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_readonly_property_only_get() {
        let tree = tree("nodes:\n  temp:\n    property: Double\n    readonly: true\n").unwrap();
        let node = tree.resolve_node("temp").unwrap();
        assert_eq!(method_names(node), vec!["get"]);
        let get = node.method("get").unwrap();
        assert_eq!(get.access, AccessLevel::Read);
        assert_eq!(get.param, GET_PARAM);
        assert_eq!(get.result, "Double");
        assert!(get.is_getter());
    }

    #[test]
    fn test_writable_property_synthesizes_set_and_chng() {
        let tree = tree("nodes:\n  level:\n    property: UInt8\n").unwrap();
        let node = tree.resolve_node("level").unwrap();
        assert_eq!(method_names(node), vec!["get", "set", "chng"]);
        let set = node.method("set").unwrap();
        assert_eq!(set.access, AccessLevel::Write);
        assert_eq!((set.param.as_str(), set.result.as_str()), ("UInt8", "Null"));
        assert!(set.is_setter());
        let chng = node.method("chng").unwrap();
        assert!(chng.is_signal());
        assert_eq!(chng.result, "UInt8");
        assert_eq!(node.change_signal(), Some("chng"));
    }

    #[test]
    fn test_signal_settings() {
        let tree = tree(
            r#"
nodes:
  named:
    property: Int
    readonly: true
    signal: valchng
  silent:
    property: Int
    signal: false
"#,
        )
        .unwrap();
        assert_eq!(
            method_names(tree.resolve_node("named").unwrap()),
            vec!["get", "valchng"]
        );
        assert_eq!(
            method_names(tree.resolve_node("silent").unwrap()),
            vec!["get", "set"]
        );
    }

    #[test]
    fn test_property_method_conflict() {
        let err = tree("nodes:\n  p:\n    property: Int\n    methods:\n      set:\n").unwrap_err();
        assert_eq!(
            err,
            LoadError::PropertyMethodConflict {
                location: Location::new("nodes").join("p").join("methods").join("set"),
                method: "set".to_string(),
            }
        );
        let err = tree("nodes:\n  p:\n    property: Int\n    signal: fire\n    methods:\n      fire:\n")
            .unwrap_err();
        assert!(matches!(err, LoadError::PropertyMethodConflict { .. }));
    }

    #[test]
    fn test_signal_named_like_accessor() {
        let err = tree("nodes:\n  temp:\n    property: Int\n    signal: get\n").unwrap_err();
        assert_eq!(
            err,
            LoadError::DuplicateSibling {
                location: Location::new("nodes").join("temp").join("signal"),
                name: "get".to_string(),
            }
        );
        let err = tree("nodes:\n  temp:\n    property: Int\n    signal: set\n").unwrap_err();
        assert_eq!(err.to_string(), "nodes.temp.signal: duplicate entry 'set'");
        let tree = tree("nodes:\n  temp:\n    property: Int\n    readonly: true\n    signal: set\n").unwrap();
        let node = tree.resolve_node("temp").unwrap();
        assert_eq!(method_names(node), vec!["get", "set"]);
        assert!(node.method("get").unwrap().is_getter());
        assert!(node.method("set").unwrap().is_signal());
    }

    #[test]
    fn test_duplicate_sibling() {
        let err = tree("nodes:\n  a:\n    nodes:\n      b:\n      b:\n").unwrap_err();
        assert_eq!(err.to_string(), "nodes.a.nodes.b: duplicate entry 'b'");
    }

    #[test]
    fn test_method_errors() {
        let err = tree("nodes:\n  a:\n    methods:\n      run:\n        param: Nope\n").unwrap_err();
        assert_eq!(err.to_string(), "nodes.a.methods.run.param: unknown type 'Nope'");

        let err = tree("nodes:\n  a:\n    methods:\n      run:\n        access: admin\n").unwrap_err();
        assert!(matches!(err, LoadError::InvalidAccessLevel { ref value, .. } if value == "admin"));

        let err = tree("nodes:\n  a:\n    methods:\n      run:\n        flags: [fast]\n").unwrap_err();
        assert!(matches!(err, LoadError::InvalidFlag { .. }));

        let err = tree("nodes:\n  a:\n    methods:\n      ls:\n").unwrap_err();
        assert!(matches!(err, LoadError::ReservedMethod { .. }));

        let err = tree("nodes:\n  a:\n    methods:\n      run:\n        retries: 3\n").unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedKeys { .. }));
    }

    #[test]
    fn test_method_defaults() {
        let tree = tree("nodes:\n  a:\n    methods:\n      run:\n        flags: [Large_Result_Hint]\n")
            .unwrap();
        let run = tree.resolve_method("a", "run").unwrap().1;
        assert_eq!(run.access, AccessLevel::Browse);
        assert_eq!((run.param.as_str(), run.result.as_str()), ("Null", "Null"));
        assert_eq!(run.flags, MethodFlags::LARGE_RESULT_HINT);
    }

    #[test]
    fn test_readonly_without_property() {
        let err = tree("nodes:\n  a:\n    readonly: true\n").unwrap_err();
        assert_eq!(err.to_string(), "nodes.a: unsupported keys: readonly");
        let err = tree("unknown: 1\nnodes:\n").unwrap_err();
        assert_eq!(err.to_string(), "document: unsupported keys: unknown");
    }

    #[test]
    fn test_description_getter() {
        let long = "x".repeat(LARGE_DESCRIPTION + 1);
        let yaml = format!(
            "nodes:\n  a:\n    description: Short\n  b:\n    description: {}\n  c:\n    description: Own\n    methods:\n      desc:\n        result: Int\n",
            long
        );
        let tree = tree(&yaml).unwrap();
        let desc = tree.resolve_method("a", "desc").unwrap().1;
        assert_eq!(desc.result, "String");
        assert_eq!(desc.origin, MethodOrigin::Description);
        assert_eq!(desc.flags, MethodFlags::GETTER);
        assert!(desc.is_getter());
        let desc = tree.resolve_method("b", "desc").unwrap().1;
        assert_eq!(desc.flags, MethodFlags::GETTER | MethodFlags::LARGE_RESULT_HINT);
        let desc = tree.resolve_method("c", "desc").unwrap().1;
        assert_eq!(desc.origin, MethodOrigin::Declared);
    }

    #[test]
    fn test_every_node_reachable() {
        let tree = tree(
            r#"
nodes:
  foo:
    nodes:
      .app:
        nodes:
          log:
            methods:
              getLog:
                result: List
  bar:
"#,
        )
        .unwrap();
        for node in tree.nodes() {
            assert_eq!(tree.resolve_node(&node.path).unwrap().path, node.path);
        }
        assert_eq!(tree.nodes().count(), 5);
        assert!(tree.resolve_method("foo/.app/log", "getLog").is_ok());
    }
}
