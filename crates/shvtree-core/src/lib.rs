//! SHV Tree Core - Types, values and the node tree of Silicon Heaven devices
//!
//! This crate turns a declarative tree document into an immutable [`Tree`]:
//! - Type registry with core, builtin and document defined types
//! - Validation of runtime values against those types
//! - Node and method tree with synthesized property methods
//! - Path resolution and the `ls`/`dir` views used by the protocol
//! - Style checks and ChainPack size estimation of types

pub mod access;
pub mod builder;
pub mod check;
pub mod document;
pub mod error;
pub mod load;
pub mod method;
pub mod node;
pub mod registry;
pub mod size;
pub mod tree;
pub mod types;
pub mod validate;
pub mod value;

pub use access::{AccessLevel, ParseAccessLevelError};
pub use check::{check, Check, Issue};
pub use document::{Document, DocumentError, MethodSpec, NodeSpec};
pub use error::{LoadError, Location, ResolutionError};
pub use load::load_types;
pub use method::{Method, MethodDescriptor, MethodFlags, MethodOrigin};
pub use node::{Node, Property};
pub use registry::{TypeOrigin, TypeRegistry};
pub use size::packed_size;
pub use tree::Tree;
pub use types::Type;
pub use validate::{Mismatch, PathSegment, ValidationError};
pub use value::{Decimal, Value};
