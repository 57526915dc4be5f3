//! Call dispatch engine
//!
//! A [`Device`] owns the tree and the handlers implementing its methods. Every
//! call walks through the [`CallStage`]s: the caller's access level is checked
//! first, then the handler is located by its canonical name, the parameter is
//! validated and bound together with the other declared context fields, the
//! handler is invoked and finally its result is checked against the declared
//! result type.
//!
//! `ls` and `dir` are answered from the tree without any handler.

use async_trait::async_trait;
use indexmap::IndexMap;
use shvtree_core::{
    AccessLevel, Method, MethodDescriptor, MethodOrigin, ResolutionError, Tree, Type,
    ValidationError, Value,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::context::{CallContext, ContextFields};
use crate::handler::{
    handler_name, HandlerError, HandlerRegistry, RegisteredHandler, RegistrationError,
};
use crate::signals::{LogEmitter, SignalEmitter, Signals};

/// Single method call received from the transport
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Path of the node, empty for the root
    pub path: String,
    pub method: String,
    pub param: Value,
    /// Access level granted to the caller
    pub access: AccessLevel,
    pub user_id: Option<String>,
}

impl CallRequest {
    /// Call without parameter and with browse access
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            param: Value::Null,
            access: AccessLevel::Browse,
            user_id: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("access to {path}:{method} requires '{required}', granted '{granted}'")]
    AccessDenied {
        path: String,
        method: String,
        required: AccessLevel,
        granted: AccessLevel,
    },

    #[error("{path}:{method} is a signal and can't be called")]
    NotCallable { path: String, method: String },

    #[error("{path}:{method} is not implemented (no handler '{handler}')")]
    MethodNotImplemented {
        path: String,
        method: String,
        handler: String,
    },

    #[error("invalid parameter: {0}")]
    InvalidParam(#[source] ValidationError),

    #[error("call rejected: {0}")]
    Rejected(#[source] HandlerError),

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("handler returned a result of the wrong type: {0}")]
    ResultTypeMismatch(#[source] ValidationError),
}

impl DispatchError {
    /// Whether the error points at a defect of the handler rather than the caller
    pub fn is_handler_defect(&self) -> bool {
        matches!(self, DispatchError::ResultTypeMismatch(_))
    }
}

/// Progress of a single dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStage {
    Received,
    AccessChecked,
    HandlerResolved,
    ArgsBound,
    Invoked,
    ResultValidated,
    Completed,
}

impl fmt::Display for CallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallStage::Received => "received",
            CallStage::AccessChecked => "access_checked",
            CallStage::HandlerResolved => "handler_resolved",
            CallStage::ArgsBound => "args_bound",
            CallStage::Invoked => "invoked",
            CallStage::ResultValidated => "result_validated",
            CallStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Extension points around the handler invocation
#[async_trait]
pub trait CallHooks: Send + Sync {
    /// Inspect a call that passed the access check, before its arguments are bound
    async fn pre_call(&self, _request: &CallRequest, _method: &Method) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Transform the handler result before it is validated and returned
    async fn post_call(
        &self,
        _request: &CallRequest,
        _method: &Method,
        result: Value,
    ) -> Result<Value, HandlerError> {
        Ok(result)
    }
}

enum Resolved {
    Handler(RegisteredHandler),
    /// Node description answering an unhandled `desc`
    Description(String),
}

/// Tree of a device together with the implementations of its methods
pub struct Device {
    tree: Arc<Tree>,
    handlers: HandlerRegistry,
    default_handler: Option<RegisteredHandler>,
    hooks: Option<Arc<dyn CallHooks>>,
    emitter: Arc<dyn SignalEmitter>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handlers", &self.handlers.len())
            .field("default_handler", &self.default_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Device without handlers whose signals are only logged
    pub fn new(tree: Tree) -> Self {
        Self {
            tree: Arc::new(tree),
            handlers: HandlerRegistry::new(),
            default_handler: None,
            hooks: None,
            emitter: Arc::new(LogEmitter),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SignalEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CallHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// Handler for methods that have no handler of their own
    pub fn set_default_handler<F, Fut>(
        &mut self,
        parameters: &[&str],
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.default_handler = Some(RegisteredHandler::new(
            "default",
            parameters,
            Arc::new(handler),
        )?);
        Ok(())
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Replace the tree
    ///
    /// Calls in flight keep the tree they started with, the exclusive borrow
    /// guarantees none is in flight on this device.
    pub fn set_tree(&mut self, tree: Tree) {
        debug!(nodes = tree.nodes().count(), "Tree replaced");
        self.tree = Arc::new(tree);
    }

    /// Signals of the node at `path`
    pub fn signals(&self, path: &str) -> Result<Signals, ResolutionError> {
        self.tree.resolve_node(path)?;
        Ok(Signals::new(
            Arc::clone(&self.tree),
            path,
            Arc::clone(&self.emitter),
        ))
    }

    /// Dispatch a single call
    pub async fn call(&self, request: CallRequest) -> Result<Value, DispatchError> {
        let res = self.dispatch(&request).await;
        if let Err(err) = &res {
            if err.is_handler_defect() {
                error!(path = %request.path, method = %request.method, error = %err, "Handler defect");
            } else {
                debug!(path = %request.path, method = %request.method, error = %err, "Call failed");
            }
        }
        res
    }

    async fn dispatch(&self, request: &CallRequest) -> Result<Value, DispatchError> {
        let tree = Arc::clone(&self.tree);
        let stage = |stage: CallStage| {
            trace!(path = %request.path, method = %request.method, stage = %stage, "Dispatch");
        };
        stage(CallStage::Received);

        match request.method.as_str() {
            "ls" => return Ok(ls(&tree, &request.path, &request.param)?),
            "dir" => return Ok(dir(&tree, &request.path, &request.param)?),
            _ => {}
        }

        let (node, method) = tree.resolve_method(&request.path, &request.method)?;
        if !request.access.grants(method.access) {
            return Err(DispatchError::AccessDenied {
                path: request.path.clone(),
                method: request.method.clone(),
                required: method.access,
                granted: request.access,
            });
        }
        stage(CallStage::AccessChecked);

        if method.is_signal() {
            return Err(DispatchError::NotCallable {
                path: request.path.clone(),
                method: request.method.clone(),
            });
        }
        let name = handler_name(&request.path, &request.method);
        let resolved = match self.handlers.get(&name) {
            Some(handler) => Resolved::Handler(handler.clone()),
            None if method.origin == MethodOrigin::Description => {
                Resolved::Description(node.description.trim().to_string())
            }
            None => match &self.default_handler {
                Some(handler) => Resolved::Handler(handler.clone()),
                None => {
                    return Err(DispatchError::MethodNotImplemented {
                        path: request.path.clone(),
                        method: request.method.clone(),
                        handler: name,
                    })
                }
            },
        };
        stage(CallStage::HandlerResolved);

        if let Some(hooks) = &self.hooks {
            hooks
                .pre_call(request, method)
                .await
                .map_err(DispatchError::Rejected)?;
        }
        tree.registry()
            .validate(&method.param, &request.param)
            .map_err(DispatchError::InvalidParam)?;

        let result = match resolved {
            Resolved::Handler(handler) => {
                let ctx = self.context(&tree, handler.fields, request);
                stage(CallStage::ArgsBound);
                handler
                    .handler
                    .call(ctx)
                    .await
                    .map_err(DispatchError::Handler)?
            }
            Resolved::Description(description) => {
                stage(CallStage::ArgsBound);
                Value::String(description)
            }
        };
        stage(CallStage::Invoked);

        let result = match &self.hooks {
            Some(hooks) => hooks
                .post_call(request, method, result)
                .await
                .map_err(DispatchError::Rejected)?,
            None => result,
        };
        tree.registry()
            .validate(&method.result, &result)
            .map_err(DispatchError::ResultTypeMismatch)?;
        let result = normalize_unsigned(&tree, &method.result, result);
        stage(CallStage::ResultValidated);

        stage(CallStage::Completed);
        Ok(result)
    }

    fn context(&self, tree: &Arc<Tree>, fields: ContextFields, request: &CallRequest) -> CallContext {
        CallContext::new(
            Arc::clone(tree),
            fields,
            &request.path,
            &request.method,
            request.access,
        )
        .with_param(request.param.clone())
        .with_user_id(request.user_id.clone())
        .with_signals(|| Signals::new(Arc::clone(tree), &request.path, Arc::clone(&self.emitter)))
    }
}

/// Non-negative `Int` results of unsigned types are reported as `UInt`
fn normalize_unsigned(tree: &Tree, type_name: &str, value: Value) -> Value {
    match (tree.registry().resolve(type_name), value) {
        (Ok(Type::Int(int)), Value::Int(v)) if int.unsigned && v >= 0 => Value::UInt(v as u64),
        (_, value) => value,
    }
}

/// `ls` with no parameter lists the children, with a name it tells whether the child exists
fn ls(tree: &Tree, path: &str, param: &Value) -> Result<Value, DispatchError> {
    let children = tree.ls(path)?;
    match param {
        Value::String(name) => Ok(Value::Bool(children.iter().any(|child| child == name))),
        Value::Null => Ok(Value::List(children.into_iter().map(Value::String).collect())),
        other => Err(DispatchError::InvalidParam(ValidationError {
            path: Vec::new(),
            type_name: "OptionalString".to_string(),
            kind: shvtree_core::Mismatch::Kind {
                expected: "String",
                found: other.kind(),
            },
        })),
    }
}

/// `dir` with a method name gives its descriptor or `Null`, otherwise all descriptors
fn dir(tree: &Tree, path: &str, param: &Value) -> Result<Value, DispatchError> {
    let descriptors = tree.dir(path)?;
    match param {
        Value::String(name) => Ok(descriptors
            .iter()
            .find(|desc| &desc.name == name)
            .map(descriptor_value)
            .unwrap_or(Value::Null)),
        _ => Ok(Value::List(descriptors.iter().map(descriptor_value).collect())),
    }
}

fn descriptor_value(desc: &MethodDescriptor) -> Value {
    let mut map = IndexMap::new();
    map.insert("name".to_string(), Value::String(desc.name.clone()));
    map.insert("flags".to_string(), Value::UInt(desc.flags.bits() as u64));
    map.insert("param".to_string(), Value::String(desc.param.clone()));
    map.insert("result".to_string(), Value::String(desc.result.clone()));
    map.insert("access".to_string(), Value::String(desc.access.to_string()));
    if !desc.description.is_empty() {
        map.insert("description".to_string(), Value::String(desc.description.clone()));
    }
    Value::Map(map)
}
