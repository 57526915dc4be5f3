//! Signal emission
//!
//! Handlers send signals through [`Signals`], which checks the value against
//! the signal's type and hands it to a [`SignalEmitter`]. Delivering the event
//! to subscribers is up to the emitter.

use async_trait::async_trait;
use shvtree_core::{Tree, ValidationError, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Signal sent by a node
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    /// Path of the sending node
    pub path: String,
    /// Name of the signal method
    pub signal: String,
    pub value: Value,
}

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("node '{path}' has no signal '{signal}'")]
    UnknownSignal { path: String, signal: String },

    #[error("node '{0}' has no change signal")]
    NoChangeSignal(String),

    #[error("invalid signal value: {0}")]
    InvalidValue(#[from] ValidationError),

    #[error("signal delivery failed: {0}")]
    Delivery(String),
}

/// Transport facing collaborator receiving validated signals
#[async_trait]
pub trait SignalEmitter: Send + Sync {
    async fn emit(&self, event: SignalEvent) -> Result<(), SignalError>;
}

/// Emitter publishing events on a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<SignalEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to signal events
    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl SignalEmitter for BroadcastEmitter {
    async fn emit(&self, event: SignalEvent) -> Result<(), SignalError> {
        // No subscribers is not an error
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Emitter that only logs the events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmitter;

#[async_trait]
impl SignalEmitter for LogEmitter {
    async fn emit(&self, event: SignalEvent) -> Result<(), SignalError> {
        info!(path = %event.path, signal = %event.signal, value = ?event.value, "Signal");
        Ok(())
    }
}

/// Signals of a single node
#[derive(Clone)]
pub struct Signals {
    tree: Arc<Tree>,
    path: String,
    emitter: Arc<dyn SignalEmitter>,
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signals").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Signals {
    pub fn new(tree: Arc<Tree>, path: &str, emitter: Arc<dyn SignalEmitter>) -> Self {
        Self {
            tree,
            path: path.to_string(),
            emitter,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send signal `name` carrying `value`
    pub async fn emit(&self, name: &str, value: Value) -> Result<(), SignalError> {
        let unknown = || SignalError::UnknownSignal {
            path: self.path.clone(),
            signal: name.to_string(),
        };
        let (_, method) = self
            .tree
            .resolve_method(&self.path, name)
            .map_err(|_| unknown())?;
        if !method.is_signal() {
            return Err(unknown());
        }
        self.tree.registry().validate(&method.result, &value)?;
        debug!(path = %self.path, signal = %name, "Emitting signal");
        self.emitter
            .emit(SignalEvent {
                path: self.path.clone(),
                signal: name.to_string(),
                value,
            })
            .await
    }

    /// Send the change signal of the node's property
    pub async fn changed(&self, value: Value) -> Result<(), SignalError> {
        let signal = self
            .tree
            .resolve_node(&self.path)
            .ok()
            .and_then(|node| node.change_signal())
            .ok_or_else(|| SignalError::NoChangeSignal(self.path.clone()))?
            .to_string();
        self.emit(&signal, value).await
    }
}
