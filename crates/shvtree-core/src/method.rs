//! Methods attached to tree nodes

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::access::AccessLevel;

/// Set of method flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MethodFlags(u8);

impl MethodFlags {
    pub const NONE: Self = Self(0);
    /// Method is a signal, it can't be called
    pub const SIGNAL: Self = Self(1);
    /// Method reads a property value
    pub const GETTER: Self = Self(1 << 1);
    /// Method writes a property value
    pub const SETTER: Self = Self(1 << 2);
    /// Result can be large enough to be worth transferring in chunks
    pub const LARGE_RESULT_HINT: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::SIGNAL, "signal"),
        (Self::GETTER, "getter"),
        (Self::SETTER, "setter"),
        (Self::LARGE_RESULT_HINT, "large_result_hint"),
    ];

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Numeric representation used by the protocol
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Names of the set flags
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl std::ops::BitOr for MethodFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MethodFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Name that doesn't denote any method flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFlagError(pub String);

impl fmt::Display for ParseFlagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid method flag '{}'", self.0)
    }
}

impl std::error::Error for ParseFlagError {}

impl FromStr for MethodFlags {
    type Err = ParseFlagError;

    /// Parse a single flag name, case insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .into_iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(flag, _)| flag)
            .ok_or_else(|| ParseFlagError(s.to_string()))
    }
}

impl fmt::Display for MethodFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

impl Serialize for MethodFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Why a method exists on its node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOrigin {
    /// Listed under `methods` in the document
    Declared,
    /// Synthesized from the node's `property`
    Property,
    /// Synthesized `desc` getter of a described node
    Description,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    /// Name of the parameter type
    pub param: String,
    /// Name of the result type
    pub result: String,
    /// Minimal access level required to call it
    pub access: AccessLevel,
    pub flags: MethodFlags,
    pub description: String,
    pub origin: MethodOrigin,
}

impl Method {
    /// Method with `Null` parameter and result, callable with browse access
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            param: "Null".to_string(),
            result: "Null".to_string(),
            access: AccessLevel::Browse,
            flags: MethodFlags::NONE,
            description: String::new(),
            origin: MethodOrigin::Declared,
        }
    }

    pub fn is_signal(&self) -> bool {
        self.flags.contains(MethodFlags::SIGNAL)
    }

    pub fn is_getter(&self) -> bool {
        self.flags.contains(MethodFlags::GETTER)
    }

    pub fn is_setter(&self) -> bool {
        self.flags.contains(MethodFlags::SETTER)
    }

    pub fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            name: self.name.clone(),
            flags: self.flags,
            param: self.param.clone(),
            result: self.result.clone(),
            access: self.access,
            description: self.description.clone(),
        }
    }
}

/// Entry of a `dir` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub flags: MethodFlags,
    pub param: String,
    pub result: String,
    pub access: AccessLevel,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> {} [{}]", self.name, self.param, self.result, self.access)?;
        if !self.flags.is_empty() {
            write!(f, " {}", self.flags)?;
        }
        Ok(())
    }
}
