//! Errors reported while loading a tree and while resolving paths in it

use std::fmt;
use thiserror::Error;

/// Dotted location of an entry inside the tree document (`nodes.foo.methods`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location(Vec<String>);

impl Location {
    pub fn new(root: &str) -> Self {
        Self(vec![root.to_string()])
    }

    /// New location extended by one more segment
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("document");
        }
        f.write_str(&self.0.join("."))
    }
}

/// Fatal error of tree construction
///
/// Construction is all-or-nothing: when any of these is returned no part of the
/// document has been applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("{location}: type '{name}' is already defined")]
    DuplicateType { location: Location, name: String },
    #[error("{location}: unknown type '{name}'")]
    UnknownType { location: Location, name: String },
    #[error("{location}: type '{name}' references itself through {}", chain.join(" -> "))]
    CyclicType {
        location: Location,
        name: String,
        chain: Vec<String>,
    },
    #[error("{location}: duplicate entry '{name}'")]
    DuplicateSibling { location: Location, name: String },
    #[error("{location}: method '{method}' conflicts with the property declaration")]
    PropertyMethodConflict { location: Location, method: String },
    #[error("{location}: invalid access level '{value}'")]
    InvalidAccessLevel { location: Location, value: String },
    #[error("{location}: invalid flag '{value}'")]
    InvalidFlag { location: Location, value: String },
    #[error("{location}: method name '{name}' is reserved")]
    ReservedMethod { location: Location, name: String },
    #[error("{location}: unsupported keys: {keys}")]
    UnsupportedKeys { location: Location, keys: String },
    #[error("{location}: {message}")]
    InvalidFormat { location: Location, message: String },
}

impl LoadError {
    pub fn invalid(location: &Location, message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            location: location.clone(),
            message: message.into(),
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Self::DuplicateType { location, .. }
            | Self::UnknownType { location, .. }
            | Self::CyclicType { location, .. }
            | Self::DuplicateSibling { location, .. }
            | Self::PropertyMethodConflict { location, .. }
            | Self::InvalidAccessLevel { location, .. }
            | Self::InvalidFlag { location, .. }
            | Self::ReservedMethod { location, .. }
            | Self::UnsupportedKeys { location, .. }
            | Self::InvalidFormat { location, .. } => location,
        }
    }
}

/// Per call lookup failure, typically answered with a protocol level "not found"
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("node not found: '{path}' (missing '{segment}')")]
    NodeNotFound { path: String, segment: String },
    #[error("method '{method}' not found on '{path}'")]
    MethodNotFound { path: String, method: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let location = Location::new("nodes").join("foo").join("methods");
        assert_eq!(location.to_string(), "nodes.foo.methods");
        assert_eq!(location.segments().len(), 3);
        assert_eq!(Location::default().to_string(), "document");
    }

    #[test]
    fn test_error_message_carries_location() {
        let err = LoadError::UnknownType {
            location: Location::new("types").join("bar"),
            name: "Baz".to_string(),
        };
        assert_eq!(err.to_string(), "types.bar: unknown type 'Baz'");
        assert_eq!(err.location().to_string(), "types.bar");
    }
}
