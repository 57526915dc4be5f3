//! Registry of resolved types
//!
//! Every registry starts populated with the core and builtin types. Custom
//! types are added by [`load_types`](crate::load::load_types), which checks
//! references and cycles before handing the registry out.

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::trace;

use crate::error::{LoadError, Location};
use crate::types::{builtin_types, BitfieldType, Type};
use crate::validate::{self, ValidationError};
use crate::value::Value;

/// Where a registered type comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
    /// Reserved name with its own variant (`Int`, `String`, ...)
    Core,
    /// Reserved name predefined from core types (`UInt8`, `OptionalString`, ...)
    Builtin,
    /// Defined by the tree document
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntry {
    pub ty: Type,
    pub origin: TypeOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeEntry>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn type_location(name: &str) -> Location {
    Location::new("types").join(name)
}

impl TypeRegistry {
    /// Registry holding only core and builtin types
    pub fn new() -> Self {
        let types = builtin_types()
            .into_iter()
            .map(|(name, ty, core)| {
                let origin = if core {
                    TypeOrigin::Core
                } else {
                    TypeOrigin::Builtin
                };
                (name.to_string(), TypeEntry { ty, origin })
            })
            .collect();
        Self { types }
    }

    /// Register a custom type
    pub fn define(&mut self, name: &str, ty: Type) -> Result<(), LoadError> {
        if self.types.contains_key(name) {
            return Err(LoadError::DuplicateType {
                location: type_location(name),
                name: name.to_string(),
            });
        }
        trace!(name, kind = ty.kind(), "Type defined");
        self.types.insert(
            name.to_string(),
            TypeEntry {
                ty,
                origin: TypeOrigin::Custom,
            },
        );
        Ok(())
    }

    /// Replace the body of an already defined custom type
    pub(crate) fn redefine(&mut self, name: &str, ty: Type) {
        if let Some(entry) = self.types.get_mut(name) {
            entry.ty = ty;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Type registered under `name` without following aliases
    pub fn get(&self, name: &str) -> Option<&Type> {
        self.types.get(name).map(|entry| &entry.ty)
    }

    pub fn entry(&self, name: &str) -> Option<&TypeEntry> {
        self.types.get(name)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.types
            .get(name)
            .is_some_and(|entry| entry.origin != TypeOrigin::Custom)
    }

    /// Type registered under `name` with alias chains followed to their end
    pub fn resolve(&self, name: &str) -> Result<&Type, LoadError> {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = name;
        loop {
            let ty = self.get(current).ok_or_else(|| LoadError::UnknownType {
                location: type_location(chain.last().copied().unwrap_or(name)),
                name: current.to_string(),
            })?;
            if chain.contains(&current) {
                chain.push(current);
                return Err(LoadError::CyclicType {
                    location: type_location(name),
                    name: name.to_string(),
                    chain: chain.into_iter().map(str::to_string).collect(),
                });
            }
            chain.push(current);
            match ty {
                Type::Alias(target) => current = target.as_str(),
                other => return Ok(other),
            }
        }
    }

    /// All registered types in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeEntry)> {
        self.types.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Custom types in registration order
    pub fn custom(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.iter()
            .filter(|(_, entry)| entry.origin == TypeOrigin::Custom)
            .map(|(name, entry)| (name, &entry.ty))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Check that every reference of a custom type names a registered type
    pub fn check_references(&self) -> Result<(), LoadError> {
        for (name, ty) in self.custom() {
            for reference in ty.references() {
                if !self.contains(reference) {
                    return Err(LoadError::UnknownType {
                        location: type_location(name),
                        name: reference.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check that no type refers back to itself, directly or transitively
    pub fn check_cycles(&self) -> Result<(), LoadError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            registry: &'a TypeRegistry,
            name: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), LoadError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                    let mut chain: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    chain.push(name.to_string());
                    return Err(LoadError::CyclicType {
                        location: type_location(name),
                        name: name.to_string(),
                        chain,
                    });
                }
                None => {}
            }
            let Some(ty) = registry.get(name) else {
                return Ok(());
            };
            marks.insert(name, Mark::Visiting);
            stack.push(name);
            for reference in ty.references() {
                visit(registry, reference, marks, stack)?;
            }
            stack.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        for (name, _) in self.custom() {
            visit(self, name, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    /// Number of bits a value of the type occupies inside a bitfield
    ///
    /// `None` for types that can't be part of a bitfield.
    pub fn bit_span(&self, name: &str) -> Option<u32> {
        fn bit_length(value: u128) -> u32 {
            (128 - value.leading_zeros()).max(1)
        }

        match self.resolve(name).ok()? {
            Type::Bool | Type::Null => Some(1),
            Type::Enum(enm) => {
                let max = enm.max_value()?;
                u128::try_from(max).ok().map(bit_length)
            }
            Type::Int(int) => match (int.minimum, int.maximum) {
                (Some(min), Some(max)) if min >= 0 && max >= 0 => Some(bit_length(max as u128)),
                _ => None,
            },
            Type::Bitfield(bitfield) => Some(bitfield.bit_size().max(1)),
            _ => None,
        }
    }

    /// Validate `value` against the type registered under `name`
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), ValidationError> {
        validate::validate_named(self, name, value)
    }

    pub fn is_valid(&self, name: &str, value: &Value) -> bool {
        self.validate(name, value).is_ok()
    }

    /// Decode the fields of a bitfield value
    ///
    /// Fields are keyed by the alias of their offset in the bitfield's enum,
    /// or by the offset itself. `Null` fields are skipped.
    pub fn interpret_bitfield(&self, bitfield: &BitfieldType, bits: u64) -> IndexMap<String, Value> {
        let aliases = match bitfield.enum_name.as_deref().map(|name| self.resolve(name)) {
            Some(Ok(Type::Enum(enm))) => Some(enm),
            _ => None,
        };
        let mut res = IndexMap::new();
        for field in &bitfield.fields {
            let raw = BitfieldType::extract(field, bits);
            let value = match self.resolve(&field.type_name) {
                Ok(Type::Null) => continue,
                Ok(Type::Bool) => Value::Bool(raw != 0),
                Ok(Type::Enum(enm)) => match i64::try_from(raw).ok().and_then(|v| enm.alias(v)) {
                    Some(alias) => Value::from(alias),
                    None => Value::UInt(raw),
                },
                _ => Value::UInt(raw),
            };
            let key = aliases
                .and_then(|enm| enm.alias(field.offset as i64))
                .map(str::to_string)
                .unwrap_or_else(|| field.offset.to_string());
            res.insert(key, value);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BitfieldField, EnumType, IntType, ListType};

    #[test]
    fn test_builtins_registered() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.entry("Int").unwrap().origin, TypeOrigin::Core);
        assert_eq!(registry.entry("UInt8").unwrap().origin, TypeOrigin::Builtin);
        assert!(registry.is_reserved("_getParam"));
        assert_eq!(registry.custom().count(), 0);
    }

    #[test]
    fn test_define_rejects_reserved_names() {
        let mut registry = TypeRegistry::new();
        for name in ["Int", "UInt16", "OptionalString", "Map"] {
            let err = registry.define(name, Type::Bool).unwrap_err();
            assert!(matches!(err, LoadError::DuplicateType { .. }));
        }
        registry.define("flag", Type::Bool).unwrap();
        assert!(matches!(
            registry.define("flag", Type::Null),
            Err(LoadError::DuplicateType { .. })
        ));
    }

    #[test]
    fn test_resolve_follows_aliases() {
        let mut registry = TypeRegistry::new();
        registry.define("a", Type::Alias("b".to_string())).unwrap();
        registry.define("b", Type::Alias("UInt8".to_string())).unwrap();
        assert_eq!(
            registry.resolve("a").unwrap(),
            &Type::Int(IntType::ranged(0, 255))
        );
        assert!(matches!(
            registry.resolve("missing"),
            Err(LoadError::UnknownType { .. })
        ));
        assert!(matches!(
            registry.resolve("_getParam").unwrap(),
            Type::Union(_)
        ));
    }

    #[test]
    fn test_resolve_detects_alias_cycle() {
        let mut registry = TypeRegistry::new();
        registry.define("a", Type::Alias("b".to_string())).unwrap();
        registry.define("b", Type::Alias("a".to_string())).unwrap();
        assert!(matches!(
            registry.resolve("a"),
            Err(LoadError::CyclicType { .. })
        ));
    }

    #[test]
    fn test_check_cycles_through_composites() {
        let mut registry = TypeRegistry::new();
        registry
            .define(
                "tree",
                Type::List(ListType {
                    allowed: Some("branch".to_string()),
                    ..ListType::default()
                }),
            )
            .unwrap();
        registry
            .define("branch", Type::Union(vec!["Int".to_string(), "tree".to_string()]))
            .unwrap();
        let err = registry.check_cycles().unwrap_err();
        let LoadError::CyclicType { chain, .. } = err else {
            panic!("expected cyclic type error");
        };
        assert_eq!(chain, vec!["tree", "branch", "tree"]);
    }

    #[test]
    fn test_check_references() {
        let mut registry = TypeRegistry::new();
        registry
            .define("pair", Type::Union(vec!["Int".to_string(), "nope".to_string()]))
            .unwrap();
        let err = registry.check_references().unwrap_err();
        assert_eq!(err.to_string(), "types.pair: unknown type 'nope'");
    }

    #[test]
    fn test_bit_span() {
        let mut registry = TypeRegistry::new();
        registry
            .define("small", Type::Int(IntType::ranged(4, 17)))
            .unwrap();
        registry
            .define("signed", Type::Int(IntType::ranged(-1, 4)))
            .unwrap();
        let mut values = IndexMap::new();
        values.insert("a".to_string(), 0);
        values.insert("b".to_string(), 5);
        registry
            .define("choice", Type::Enum(EnumType { values }))
            .unwrap();
        assert_eq!(registry.bit_span("Bool"), Some(1));
        assert_eq!(registry.bit_span("UInt8"), Some(8));
        assert_eq!(registry.bit_span("small"), Some(5));
        assert_eq!(registry.bit_span("choice"), Some(3));
        assert_eq!(registry.bit_span("signed"), None);
        assert_eq!(registry.bit_span("String"), None);
        assert_eq!(registry.bit_span("UInt"), None);
    }

    #[test]
    fn test_interpret_bitfield() {
        let mut registry = TypeRegistry::new();
        let mut values = IndexMap::new();
        values.insert("enabled".to_string(), 0);
        values.insert("level".to_string(), 1);
        registry
            .define("flagsEnum", Type::Enum(EnumType { values }))
            .unwrap();
        let field = |offset, width, name: &str| BitfieldField {
            offset,
            width,
            type_name: name.to_string(),
        };
        let bitfield = BitfieldType {
            fields: vec![field(0, 1, "Bool"), field(1, 8, "UInt8"), field(9, 1, "Null"), field(10, 1, "Bool")],
            enum_name: Some("flagsEnum".to_string()),
        };
        let decoded = registry.interpret_bitfield(&bitfield, 0b100_0000_1011);
        let entries: Vec<_> = decoded.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        assert_eq!(
            entries,
            vec![
                ("enabled", Value::Bool(true)),
                ("level", Value::UInt(5)),
                ("10", Value::Bool(true)),
            ]
        );
    }
}
