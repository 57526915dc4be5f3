//! Access levels granted to callers and required by methods

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the nine ordered privilege tiers
///
/// The declaration order is the privilege order, `Browse` being the lowest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccessLevel {
    #[default]
    Browse,
    Read,
    Write,
    Command,
    Config,
    Service,
    SuperService,
    Developer,
    Superuser,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown access level '{0}'")]
pub struct ParseAccessLevelError(pub String);

impl AccessLevel {
    pub const ALL: [AccessLevel; 9] = [
        AccessLevel::Browse,
        AccessLevel::Read,
        AccessLevel::Write,
        AccessLevel::Command,
        AccessLevel::Config,
        AccessLevel::Service,
        AccessLevel::SuperService,
        AccessLevel::Developer,
        AccessLevel::Superuser,
    ];

    /// Token used in tree documents and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Browse => "bws",
            AccessLevel::Read => "rd",
            AccessLevel::Write => "wr",
            AccessLevel::Command => "cmd",
            AccessLevel::Config => "cfg",
            AccessLevel::Service => "srv",
            AccessLevel::SuperService => "ssrv",
            AccessLevel::Developer => "dev",
            AccessLevel::Superuser => "su",
        }
    }

    /// Whether a caller holding `self` may call a method requiring `required`
    pub fn grants(&self, required: AccessLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ParseAccessLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| ParseAccessLevelError(s.to_string()))
    }
}

impl TryFrom<String> for AccessLevel {
    type Error = ParseAccessLevelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccessLevel> for String {
    fn from(level: AccessLevel) -> Self {
        level.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        for pair in AccessLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(AccessLevel::Superuser.grants(AccessLevel::Browse));
        assert!(!AccessLevel::Read.grants(AccessLevel::Write));
        assert!(AccessLevel::Write.grants(AccessLevel::Write));
    }

    #[test]
    fn test_parse_tokens() {
        for level in AccessLevel::ALL {
            assert_eq!(level.as_str().parse::<AccessLevel>().unwrap(), level);
        }
        assert!("admin".parse::<AccessLevel>().is_err());
        assert!("RD".parse::<AccessLevel>().is_err());
    }
}
