//! Style checks of custom types
//!
//! These don't make a document invalid, they point at constructs that are
//! better expressed differently.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::registry::TypeRegistry;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    /// Union without members, no value can match it
    EmptyUnion,
    /// Union with a single member where an alias would do
    AliasInsteadOfUnion,
    /// Two structurally equal types where one could alias the other
    DuplicateType,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown check '{0}'")]
pub struct UnknownCheck(pub String);

impl Check {
    pub const ALL: [Check; 3] = [
        Check::EmptyUnion,
        Check::AliasInsteadOfUnion,
        Check::DuplicateType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Check::EmptyUnion => "empty-union",
            Check::AliasInsteadOfUnion => "alias-instead-of-union",
            Check::DuplicateType => "duplicate-type",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Check {
    type Err = UnknownCheck;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Check::ALL
            .into_iter()
            .find(|check| check.as_str() == s)
            .ok_or_else(|| UnknownCheck(s.to_string()))
    }
}

/// Finding of a style check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub check: Check,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.check)
    }
}

/// Run all checks that aren't `disabled` over the custom types of `registry`
pub fn check(registry: &TypeRegistry, disabled: &[Check]) -> Vec<Issue> {
    let enabled = |check: Check| !disabled.contains(&check);
    let mut res = Vec::new();
    let custom: Vec<(&str, &Type)> = registry.custom().collect();

    for (name, ty) in &custom {
        let Type::Union(members) = ty else {
            continue;
        };
        if members.is_empty() && enabled(Check::EmptyUnion) {
            res.push(Issue {
                check: Check::EmptyUnion,
                message: format!("Union '{}' has no member, no value can match it", name),
            });
        }
        if members.len() == 1 && enabled(Check::AliasInsteadOfUnion) {
            res.push(Issue {
                check: Check::AliasInsteadOfUnion,
                message: format!("Union '{}' has only one member, use an alias instead", name),
            });
        }
    }

    if enabled(Check::DuplicateType) {
        for (idx, (first, first_type)) in custom.iter().enumerate() {
            if matches!(first_type, Type::Alias(_)) {
                continue;
            }
            for (second, second_type) in &custom[idx + 1..] {
                if first_type == second_type {
                    res.push(Issue {
                        check: Check::DuplicateType,
                        message: format!(
                            "Type '{}' is the same as '{}', use an alias instead",
                            first, second
                        ),
                    });
                }
            }
        }
    }
    res
}
