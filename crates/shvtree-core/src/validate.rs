//! Validation of runtime values against registered types

use std::fmt;
use thiserror::Error;

use crate::registry::TypeRegistry;
use crate::types::{BitfieldType, Type};
use crate::value::Value;

/// Nesting limit guarding registries assembled by hand with cyclic references
const MAX_DEPTH: usize = 64;

/// Step into a composite value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Position in a List or Tuple
    Index(usize),
    /// Key of a Map
    Key(String),
    /// Key of an IMap
    IKey(i64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(idx) => write!(f, "[{}]", idx),
            PathSegment::Key(key) => write!(f, ".{}", key),
            PathSegment::IKey(key) => write!(f, ".{}", key),
        }
    }
}

/// Reason a value doesn't match a type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Mismatch {
    #[error("expected {expected}, got {found}")]
    Kind {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{value} is less than minimum {minimum}")]
    BelowMinimum { value: String, minimum: String },
    #[error("{value} is greater than maximum {maximum}")]
    AboveMaximum { value: String, maximum: String },
    #[error("{value} is not a multiple of {multiple_of}")]
    NotMultiple { value: String, multiple_of: String },
    #[error("length {length} is less than {minimum}")]
    TooShort { length: usize, minimum: usize },
    #[error("length {length} is greater than {maximum}")]
    TooLong { length: usize, maximum: usize },
    #[error("'{value}' doesn't match pattern '{pattern}'")]
    Pattern { value: String, pattern: String },
    #[error("{value} is not a value of the enum")]
    NotInEnum { value: String },
    #[error("bits {bits:#x} are not assigned to any field")]
    UnassignedBits { bits: u64 },
    #[error("expected {expected} items, got {found}")]
    Arity { expected: usize, found: usize },
    #[error("key '{key}' is not declared")]
    UndeclaredKey { key: String },
    #[error("value matches none of: {}", members.join(", "))]
    NoMember { members: Vec<String> },
    #[error("value is not the expected constant")]
    NotConstant,
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("types nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Value mismatch with the location of the offending part
#[derive(Error, Debug, Clone, PartialEq)]
#[error("value{}: {kind} (type '{type_name}')", display_path(path))]
pub struct ValidationError {
    /// Steps from the validated value to the offending part, empty for the value itself
    pub path: Vec<PathSegment>,
    /// Name of the type the offending part was checked against
    pub type_name: String,
    pub kind: Mismatch,
}

fn display_path(path: &[PathSegment]) -> String {
    path.iter().map(ToString::to_string).collect()
}

/// Validate `value` against an unregistered type whose references resolve in `registry`
pub fn validate(value: &Value, ty: &Type, registry: &TypeRegistry) -> Result<(), ValidationError> {
    Validator::new(registry).check_type(ty.kind(), ty, value)
}

pub fn is_valid(value: &Value, ty: &Type, registry: &TypeRegistry) -> bool {
    validate(value, ty, registry).is_ok()
}

pub(crate) fn validate_named(
    registry: &TypeRegistry,
    name: &str,
    value: &Value,
) -> Result<(), ValidationError> {
    Validator::new(registry).check(name, value)
}

struct Validator<'a> {
    registry: &'a TypeRegistry,
    path: Vec<PathSegment>,
    depth: usize,
}

impl<'a> Validator<'a> {
    fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            path: Vec::new(),
            depth: 0,
        }
    }

    fn fail(&self, type_name: &str, kind: Mismatch) -> Result<(), ValidationError> {
        Err(ValidationError {
            path: self.path.clone(),
            type_name: type_name.to_string(),
            kind,
        })
    }

    fn check(&mut self, name: &str, value: &Value) -> Result<(), ValidationError> {
        let registry = self.registry;
        match registry.get(name) {
            Some(ty) => self.check_type(name, ty, value),
            None => self.fail(name, Mismatch::UnknownType(name.to_string())),
        }
    }

    fn check_at(
        &mut self,
        segment: PathSegment,
        name: &str,
        value: &Value,
    ) -> Result<(), ValidationError> {
        self.path.push(segment);
        let result = self.check(name, value);
        self.path.pop();
        result
    }

    fn check_type(&mut self, name: &str, ty: &Type, value: &Value) -> Result<(), ValidationError> {
        if self.depth >= MAX_DEPTH {
            return self.fail(name, Mismatch::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.check_variant(name, ty, value);
        self.depth -= 1;
        result
    }

    fn kind_mismatch(&self, name: &str, expected: &'static str, value: &Value) -> Result<(), ValidationError> {
        self.fail(
            name,
            Mismatch::Kind {
                expected,
                found: value.kind(),
            },
        )
    }

    fn check_length(
        &self,
        name: &str,
        length: usize,
        minimum: Option<usize>,
        maximum: Option<usize>,
    ) -> Result<(), ValidationError> {
        if let Some(minimum) = minimum.filter(|min| length < *min) {
            return self.fail(name, Mismatch::TooShort { length, minimum });
        }
        if let Some(maximum) = maximum.filter(|max| length > *max) {
            return self.fail(name, Mismatch::TooLong { length, maximum });
        }
        Ok(())
    }

    fn check_variant(&mut self, name: &str, ty: &Type, value: &Value) -> Result<(), ValidationError> {
        match ty {
            Type::Any => Ok(()),
            Type::Null => match value {
                Value::Null => Ok(()),
                _ => self.kind_mismatch(name, "Null", value),
            },
            Type::Bool => match value {
                Value::Bool(_) => Ok(()),
                _ => self.kind_mismatch(name, "Bool", value),
            },
            Type::DateTime => match value {
                Value::DateTime(_) => Ok(()),
                _ => self.kind_mismatch(name, "DateTime", value),
            },
            Type::Int(int) => {
                let Some(v) = value.as_integer() else {
                    return self.kind_mismatch(name, "Int", value);
                };
                if let Some(minimum) = int.minimum.filter(|min| v < *min) {
                    return self.fail(
                        name,
                        Mismatch::BelowMinimum {
                            value: v.to_string(),
                            minimum: minimum.to_string(),
                        },
                    );
                }
                if let Some(maximum) = int.maximum.filter(|max| v > *max) {
                    return self.fail(
                        name,
                        Mismatch::AboveMaximum {
                            value: v.to_string(),
                            maximum: maximum.to_string(),
                        },
                    );
                }
                if int.unsigned && v < 0 {
                    return self.fail(
                        name,
                        Mismatch::BelowMinimum {
                            value: v.to_string(),
                            minimum: "0".to_string(),
                        },
                    );
                }
                match int.multiple_of {
                    Some(m) if m != 0 && v % m != 0 => self.fail(
                        name,
                        Mismatch::NotMultiple {
                            value: v.to_string(),
                            multiple_of: m.to_string(),
                        },
                    ),
                    _ => Ok(()),
                }
            }
            Type::Double(double) => {
                let Value::Double(v) = value else {
                    return self.kind_mismatch(name, "Double", value);
                };
                let v = *v;
                let below = double.minimum.filter(|min| v < *min);
                let below = below.or(double.exclusive_minimum.filter(|min| v <= *min));
                if let Some(minimum) = below {
                    return self.fail(
                        name,
                        Mismatch::BelowMinimum {
                            value: v.to_string(),
                            minimum: minimum.to_string(),
                        },
                    );
                }
                let above = double.maximum.filter(|max| v > *max);
                let above = above.or(double.exclusive_maximum.filter(|max| v >= *max));
                if let Some(maximum) = above {
                    return self.fail(
                        name,
                        Mismatch::AboveMaximum {
                            value: v.to_string(),
                            maximum: maximum.to_string(),
                        },
                    );
                }
                match double.multiple_of {
                    Some(m) if v % m != 0.0 => self.fail(
                        name,
                        Mismatch::NotMultiple {
                            value: v.to_string(),
                            multiple_of: m.to_string(),
                        },
                    ),
                    _ => Ok(()),
                }
            }
            Type::Decimal(decimal) => {
                let Value::Decimal(v) = value else {
                    return self.kind_mismatch(name, "Decimal", value);
                };
                let v = *v;
                if let Some(minimum) = decimal.minimum.filter(|min| v < *min) {
                    return self.fail(
                        name,
                        Mismatch::BelowMinimum {
                            value: v.to_string(),
                            minimum: minimum.to_string(),
                        },
                    );
                }
                if let Some(maximum) = decimal.maximum.filter(|max| v > *max) {
                    return self.fail(
                        name,
                        Mismatch::AboveMaximum {
                            value: v.to_string(),
                            maximum: maximum.to_string(),
                        },
                    );
                }
                Ok(())
            }
            Type::String(string) => {
                let Value::String(s) = value else {
                    return self.kind_mismatch(name, "String", value);
                };
                self.check_length(name, s.chars().count(), string.min_length, string.max_length)?;
                match &string.pattern {
                    Some(pattern) if !pattern.matches(s) => self.fail(
                        name,
                        Mismatch::Pattern {
                            value: s.clone(),
                            pattern: pattern.as_str().to_string(),
                        },
                    ),
                    _ => Ok(()),
                }
            }
            Type::Blob(blob) => {
                let Value::Blob(bytes) = value else {
                    return self.kind_mismatch(name, "Blob", value);
                };
                self.check_length(name, bytes.len(), blob.min_length, blob.max_length)
            }
            Type::Enum(enm) => {
                let known = match value {
                    Value::String(alias) => enm.value(alias).is_some(),
                    other => match other.as_integer() {
                        Some(v) => enm.contains_value(v),
                        None => return self.kind_mismatch(name, "Enum", value),
                    },
                };
                if known {
                    Ok(())
                } else {
                    let shown = match value {
                        Value::String(alias) => format!("'{}'", alias),
                        other => other.as_integer().unwrap_or_default().to_string(),
                    };
                    self.fail(name, Mismatch::NotInEnum { value: shown })
                }
            }
            Type::Bitfield(bitfield) => {
                let bits = match value.as_integer().map(u64::try_from) {
                    Some(Ok(bits)) => bits,
                    _ => return self.kind_mismatch(name, "Bitfield", value),
                };
                let unassigned = self.unassigned_bits(bitfield, bits);
                if unassigned != 0 {
                    return self.fail(name, Mismatch::UnassignedBits { bits: unassigned });
                }
                Ok(())
            }
            Type::List(list) => {
                let Value::List(items) = value else {
                    return self.kind_mismatch(name, "List", value);
                };
                self.check_length(name, items.len(), Some(list.min_length), list.max_length)?;
                if let Some(allowed) = &list.allowed {
                    for (idx, item) in items.iter().enumerate() {
                        self.check_at(PathSegment::Index(idx), allowed, item)?;
                    }
                }
                Ok(())
            }
            Type::Tuple(tuple) => {
                let Value::List(items) = value else {
                    return self.kind_mismatch(name, "Tuple", value);
                };
                if items.len() != tuple.items.len() {
                    return self.fail(
                        name,
                        Mismatch::Arity {
                            expected: tuple.items.len(),
                            found: items.len(),
                        },
                    );
                }
                for (idx, (item, item_type)) in items.iter().zip(&tuple.items).enumerate() {
                    self.check_at(PathSegment::Index(idx), item_type, item)?;
                }
                Ok(())
            }
            Type::Map(map) => {
                let Value::Map(entries) = value else {
                    return self.kind_mismatch(name, "Map", value);
                };
                let Some(fields) = &map.fields else {
                    return Ok(());
                };
                for (key, item) in entries {
                    let Some(field_type) = fields.get(key) else {
                        return self.fail(name, Mismatch::UndeclaredKey { key: key.clone() });
                    };
                    self.check_at(PathSegment::Key(key.clone()), field_type, item)?;
                }
                Ok(())
            }
            Type::IMap(imap) => {
                let Value::IMap(entries) = value else {
                    return self.kind_mismatch(name, "IMap", value);
                };
                let Some(fields) = &imap.fields else {
                    return Ok(());
                };
                for (key, item) in entries {
                    let Some(field_type) = fields.get(key) else {
                        return self.fail(name, Mismatch::UndeclaredKey { key: key.to_string() });
                    };
                    self.check_at(PathSegment::IKey(*key), field_type, item)?;
                }
                Ok(())
            }
            Type::Alias(target) => self.check(target, value),
            Type::Union(members) => {
                for member in members {
                    if self.check(member, value).is_ok() {
                        return Ok(());
                    }
                }
                self.fail(
                    name,
                    Mismatch::NoMember {
                        members: members.clone(),
                    },
                )
            }
            Type::Constant(constant) => {
                if constant == value {
                    Ok(())
                } else {
                    self.fail(name, Mismatch::NotConstant)
                }
            }
        }
    }

    /// Set bits of `bits` that don't belong to a field, or belong to a `Null` field
    fn unassigned_bits(&self, bitfield: &BitfieldType, bits: u64) -> u64 {
        let mut assigned = 0u64;
        for field in &bitfield.fields {
            if matches!(self.registry.resolve(&field.type_name), Ok(Type::Null)) {
                continue;
            }
            let mask = if field.width >= 64 {
                u64::MAX
            } else {
                (1u64 << field.width) - 1
            };
            assigned |= mask.checked_shl(field.offset).unwrap_or(0);
        }
        bits & !assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Decimal;
    use crate::types::{
        BitfieldField, DecimalType, DoubleType, IntType, ListType, MapType, StringType, TupleType,
    };
    use indexmap::IndexMap;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
    }

    #[test]
    fn test_int_bounds_and_multiple() {
        let registry = registry();
        let ty = Type::Int(IntType {
            minimum: Some(1),
            maximum: Some(10),
            multiple_of: Some(2),
            unsigned: true,
        });
        assert!(!is_valid(&Value::Int(5), &ty, &registry));
        assert!(is_valid(&Value::Int(4), &ty, &registry));
        assert!(!is_valid(&Value::Int(11), &ty, &registry));
        assert!(!is_valid(&Value::Int(0), &ty, &registry));
        assert!(is_valid(&Value::UInt(10), &ty, &registry));
        assert!(!is_valid(&Value::Bool(true), &ty, &registry));

        let err = validate(&Value::Int(5), &ty, &registry).unwrap_err();
        assert!(matches!(err.kind, Mismatch::NotMultiple { .. }));
    }

    #[test]
    fn test_builtin_ranges() {
        let registry = registry();
        assert!(registry.is_valid("UInt8", &Value::Int(255)));
        assert!(!registry.is_valid("UInt8", &Value::Int(256)));
        assert!(!registry.is_valid("UInt", &Value::Int(-1)));
        assert!(registry.is_valid("UInt64", &Value::UInt(u64::MAX)));
        assert!(registry.is_valid("Int8", &Value::Int(-128)));
        assert!(registry.is_valid("_getParam", &Value::Null));
        assert!(registry.is_valid("_getParam", &Value::from("x")));
        assert!(!registry.is_valid("_getParam", &Value::Int(1)));
    }

    #[test]
    fn test_double_exclusive_bounds() {
        let registry = registry();
        let ty = Type::Double(DoubleType {
            exclusive_minimum: Some(0.0),
            maximum: Some(1.0),
            multiple_of: Some(0.25),
            ..DoubleType::default()
        });
        assert!(!is_valid(&Value::Double(0.0), &ty, &registry));
        assert!(is_valid(&Value::Double(0.25), &ty, &registry));
        assert!(is_valid(&Value::Double(1.0), &ty, &registry));
        assert!(!is_valid(&Value::Double(0.3), &ty, &registry));
        assert!(!is_valid(&Value::Int(1), &ty, &registry));
    }

    #[test]
    fn test_decimal_only_accepts_decimals() {
        let registry = registry();
        let ty = Type::Decimal(DecimalType {
            minimum: Some(Decimal::new(0, 0)),
            maximum: Some(Decimal::new(500, -2)),
        });
        assert!(is_valid(&Value::Decimal(Decimal::new(314, -2)), &ty, &registry));
        assert!(!is_valid(&Value::Decimal(Decimal::new(6, 0)), &ty, &registry));
        assert!(!is_valid(&Value::Int(3), &ty, &registry));
        assert!(!is_valid(&Value::Double(3.0), &ty, &registry));
    }

    #[test]
    fn test_string_length_and_pattern() {
        let registry = registry();
        let ty = Type::String(StringType {
            min_length: Some(2),
            max_length: Some(4),
            pattern: Some(crate::types::Pattern::new("[a-z]+").unwrap()),
        });
        assert!(is_valid(&Value::from("abc"), &ty, &registry));
        assert!(!is_valid(&Value::from("a"), &ty, &registry));
        assert!(!is_valid(&Value::from("abcde"), &ty, &registry));
        assert!(!is_valid(&Value::from("1ab"), &ty, &registry));
        assert!(!is_valid(&Value::Int(1), &ty, &registry));
    }

    #[test]
    fn test_tuple_reports_index() {
        let registry = registry();
        let ty = Type::Tuple(TupleType {
            items: vec!["Int".to_string(), "String".to_string()],
            enum_name: None,
        });
        assert!(is_valid(
            &Value::List(vec![Value::Int(1), Value::from("a")]),
            &ty,
            &registry
        ));
        let err = validate(
            &Value::List(vec![Value::Int(1), Value::Int(2)]),
            &ty,
            &registry,
        )
        .unwrap_err();
        assert_eq!(err.path, vec![PathSegment::Index(1)]);
        assert_eq!(err.type_name, "String");
        let err = validate(&Value::List(vec![Value::Int(1)]), &ty, &registry).unwrap_err();
        assert_eq!(
            err.kind,
            Mismatch::Arity {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_map_optional_by_omission() {
        let registry = registry();
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), "String".to_string());
        fields.insert("count".to_string(), "UInt".to_string());
        let ty = Type::Map(MapType {
            fields: Some(fields),
        });

        let mut value = IndexMap::new();
        value.insert("name".to_string(), Value::from("x"));
        assert!(is_valid(&Value::Map(value.clone()), &ty, &registry));

        value.insert("count".to_string(), Value::Null);
        let err = validate(&Value::Map(value.clone()), &ty, &registry).unwrap_err();
        assert_eq!(err.path, vec![PathSegment::Key("count".to_string())]);
        assert_eq!(err.to_string(), "value.count: expected Int, got Null (type 'UInt')");

        value.shift_remove("count");
        value.insert("other".to_string(), Value::Int(1));
        let err = validate(&Value::Map(value), &ty, &registry).unwrap_err();
        assert!(err.path.is_empty());
        assert_eq!(
            err.kind,
            Mismatch::UndeclaredKey {
                key: "other".to_string()
            }
        );
    }

    #[test]
    fn test_list_nested_path() {
        let mut registry = registry();
        registry
            .define(
                "row",
                Type::List(ListType {
                    allowed: Some("Int".to_string()),
                    min_length: 0,
                    max_length: Some(2),
                }),
            )
            .unwrap();
        let ty = Type::List(ListType {
            allowed: Some("row".to_string()),
            ..ListType::default()
        });
        let value = Value::List(vec![
            Value::List(vec![Value::Int(1)]),
            Value::List(vec![Value::Int(1), Value::from("x")]),
        ]);
        let err = validate(&value, &ty, &registry).unwrap_err();
        assert_eq!(err.path, vec![PathSegment::Index(1), PathSegment::Index(1)]);
        assert!(is_valid(&Value::List(vec![]), &ty, &registry));
    }

    #[test]
    fn test_bitfield_unassigned_bits() {
        let mut registry = registry();
        registry
            .define("bitInt", Type::Int(IntType::ranged(0, 6)))
            .unwrap();
        let field = |offset, width, name: &str| BitfieldField {
            offset,
            width,
            type_name: name.to_string(),
        };
        let ty = Type::Bitfield(BitfieldType {
            fields: vec![
                field(0, 1, "Bool"),
                field(1, 3, "bitInt"),
                field(4, 1, "Null"),
                field(5, 1, "Bool"),
                field(63, 1, "Bool"),
            ],
            enum_name: None,
        });
        for (bits, valid) in [
            (0x0u64, true),
            (0x1, true),
            (0x3, true),
            (0x11, false),
            (0x21, true),
            (0x8000_0000_0000_0000, true),
            (0x40, false),
        ] {
            assert_eq!(is_valid(&Value::UInt(bits), &ty, &registry), valid, "{bits:#x}");
        }
        assert!(!is_valid(&Value::from("one"), &ty, &registry));
        assert!(!is_valid(&Value::Int(-1), &ty, &registry));
    }

    #[test]
    fn test_depth_guard_on_hand_built_cycle() {
        let mut registry = registry();
        registry.define("a", Type::Alias("b".to_string())).unwrap();
        registry.define("b", Type::Alias("a".to_string())).unwrap();
        let err = registry.validate("a", &Value::Null).unwrap_err();
        assert_eq!(err.kind, Mismatch::TooDeep(MAX_DEPTH));
    }
}
