//! Context handed to method handlers
//!
//! Handlers declare the context fields they read when they are registered.
//! Only those fields are filled in for a call, the accessors of the others
//! return `None`.

use shvtree_core::{AccessLevel, Method, Node, Tree, TypeRegistry, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::signals::Signals;

/// Field of the call context a handler can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    /// Path of the node
    Path,
    /// Last segment of the path
    NodeName,
    Node,
    MethodName,
    /// Path and method name joined by `:`
    MethodPath,
    Method,
    /// Access level granted to the caller
    AccessLevel,
    Param,
    /// Signals of the node
    Signals,
    UserId,
}

impl ContextField {
    pub const ALL: [ContextField; 10] = [
        ContextField::Path,
        ContextField::NodeName,
        ContextField::Node,
        ContextField::MethodName,
        ContextField::MethodPath,
        ContextField::Method,
        ContextField::AccessLevel,
        ContextField::Param,
        ContextField::Signals,
        ContextField::UserId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextField::Path => "path",
            ContextField::NodeName => "node_name",
            ContextField::Node => "node",
            ContextField::MethodName => "method_name",
            ContextField::MethodPath => "method_path",
            ContextField::Method => "method",
            ContextField::AccessLevel => "access_level",
            ContextField::Param => "param",
            ContextField::Signals => "signals",
            ContextField::UserId => "user_id",
        }
    }

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContextField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Set of declared context fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFields(u16);

impl ContextFields {
    pub fn insert(&mut self, field: ContextField) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: ContextField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = ContextField> + '_ {
        ContextField::ALL
            .into_iter()
            .filter(|field| self.contains(*field))
    }
}

impl FromIterator<ContextField> for ContextFields {
    fn from_iter<I: IntoIterator<Item = ContextField>>(iter: I) -> Self {
        let mut fields = Self::default();
        for field in iter {
            fields.insert(field);
        }
        fields
    }
}

/// Arguments of a single method call
pub struct CallContext {
    tree: Arc<Tree>,
    fields: ContextFields,
    path: String,
    method_name: String,
    access: AccessLevel,
    param: Option<Value>,
    user_id: Option<String>,
    signals: Option<Signals>,
}

impl CallContext {
    pub(crate) fn new(
        tree: Arc<Tree>,
        fields: ContextFields,
        path: &str,
        method_name: &str,
        access: AccessLevel,
    ) -> Self {
        Self {
            tree,
            fields,
            path: path.to_string(),
            method_name: method_name.to_string(),
            access,
            param: None,
            user_id: None,
            signals: None,
        }
    }

    pub(crate) fn with_param(mut self, param: Value) -> Self {
        if self.fields.contains(ContextField::Param) {
            self.param = Some(param);
        }
        self
    }

    pub(crate) fn with_user_id(mut self, user_id: Option<String>) -> Self {
        if self.fields.contains(ContextField::UserId) {
            self.user_id = user_id;
        }
        self
    }

    pub(crate) fn with_signals(mut self, signals: impl FnOnce() -> Signals) -> Self {
        if self.fields.contains(ContextField::Signals) {
            self.signals = Some(signals());
        }
        self
    }

    fn declared(&self, field: ContextField) -> bool {
        self.fields.contains(field)
    }

    /// Fields the handler declared
    pub fn fields(&self) -> ContextFields {
        self.fields
    }

    /// Types of the tree the call is dispatched in
    pub fn registry(&self) -> &TypeRegistry {
        self.tree.registry()
    }

    pub fn path(&self) -> Option<&str> {
        self.declared(ContextField::Path).then_some(self.path.as_str())
    }

    pub fn node_name(&self) -> Option<&str> {
        self.declared(ContextField::NodeName)
            .then(|| self.path.rsplit('/').next().unwrap_or_default())
    }

    pub fn node(&self) -> Option<&Node> {
        if !self.declared(ContextField::Node) {
            return None;
        }
        self.tree.resolve_node(&self.path).ok()
    }

    pub fn method_name(&self) -> Option<&str> {
        self.declared(ContextField::MethodName)
            .then_some(self.method_name.as_str())
    }

    pub fn method_path(&self) -> Option<String> {
        self.declared(ContextField::MethodPath)
            .then(|| format!("{}:{}", self.path, self.method_name))
    }

    pub fn method(&self) -> Option<&Method> {
        if !self.declared(ContextField::Method) {
            return None;
        }
        self.tree
            .resolve_method(&self.path, &self.method_name)
            .ok()
            .map(|(_, method)| method)
    }

    pub fn access_level(&self) -> Option<AccessLevel> {
        self.declared(ContextField::AccessLevel).then_some(self.access)
    }

    pub fn param(&self) -> Option<&Value> {
        self.param.as_ref()
    }

    /// Move the parameter out of the context
    pub fn take_param(&mut self) -> Option<Value> {
        self.param.take()
    }

    pub fn signals(&self) -> Option<&Signals> {
        self.signals.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}
