//! SHV Tree Device - Call dispatch over a loaded device tree
//!
//! This crate binds method implementations to a [`shvtree_core::Tree`]:
//! - Handler registry keyed by canonical handler names
//! - Call context exposing only the fields a handler declared
//! - Dispatch engine with access checks and param/result validation
//! - Signal emission through a transport facing emitter
//! - Dummy device generating random values of the declared types

pub mod context;
pub mod device;
pub mod dummy;
pub mod handler;
pub mod signals;

pub use context::{CallContext, ContextField, ContextFields};
pub use device::{CallHooks, CallRequest, CallStage, Device, DispatchError};
pub use dummy::{dummy_device, GenerateError, Generator};
pub use handler::{handler_name, Handler, HandlerError, HandlerRegistry, RegistrationError};
pub use signals::{BroadcastEmitter, LogEmitter, SignalEmitter, SignalError, SignalEvent, Signals};
