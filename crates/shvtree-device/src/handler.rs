//! Method handlers and their registry
//!
//! Handlers are looked up by a canonical name derived from the node path and
//! the method name. Each handler declares the context fields it reads, the
//! declaration is checked when the handler is registered.

use async_trait::async_trait;
use shvtree_core::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::context::{CallContext, ContextField, ContextFields};
use crate::signals::SignalError;

/// Failure reported by a handler
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The parameter is well typed but not acceptable
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// Implementation of a method
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: CallContext) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext) -> Result<Value, HandlerError> {
        (self)(ctx).await
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("handler '{handler}' declares unknown parameter '{parameter}'")]
    UnknownParameter { handler: String, parameter: String },

    #[error("handler '{0}' is already registered")]
    Duplicate(String),
}

/// Handler together with the context fields it was registered with
#[derive(Clone)]
pub struct RegisteredHandler {
    pub name: String,
    pub fields: ContextFields,
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl RegisteredHandler {
    /// Parse the declared parameter names
    pub fn new(
        name: &str,
        parameters: &[&str],
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RegistrationError> {
        let fields = parameters
            .iter()
            .map(|parameter| {
                parameter
                    .parse::<ContextField>()
                    .map_err(|parameter| RegistrationError::UnknownParameter {
                        handler: name.to_string(),
                        parameter,
                    })
            })
            .collect::<Result<ContextFields, _>>()?;
        Ok(Self {
            name: name.to_string(),
            fields,
            handler,
        })
    }
}

/// Canonical handler name of `method` on the node at `path`
///
/// `foo/.app/log` and `getLog` give `_foo__app_log_getLog`.
pub fn handler_name(path: &str, method: &str) -> String {
    format!("_{}_{}", path, method)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Handlers of a device keyed by their canonical names
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under the canonical `name`
    pub fn register<F, Fut>(
        &mut self,
        name: &str,
        parameters: &[&str],
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_handler(name, parameters, Arc::new(handler))
    }

    /// Register `handler` for `method` of the node at `path`
    pub fn register_method<F, Fut>(
        &mut self,
        path: &str,
        method: &str,
        parameters: &[&str],
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(&handler_name(path, method), parameters, handler)
    }

    /// Register a shared handler implementation under the canonical `name`
    pub fn register_handler(
        &mut self,
        name: &str,
        parameters: &[&str],
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistrationError> {
        if self.handlers.contains_key(name) {
            return Err(RegistrationError::Duplicate(name.to_string()));
        }
        let registered = RegisteredHandler::new(name, parameters, handler)?;
        self.handlers.insert(name.to_string(), registered);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredHandler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
