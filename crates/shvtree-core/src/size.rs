//! Upper bounds of the ChainPack encoded size of typed values
//!
//! `None` means the size can't be bounded. Pattern restricted strings count as
//! unbounded unless they also have a maximum length, as the pattern is never
//! inspected.

use crate::registry::TypeRegistry;
use crate::types::Type;
use crate::value::Value;

/// Encoded size of an integer in the `minimum..=maximum` range
pub fn int_size(minimum: i128, maximum: i128, unsigned: bool) -> Option<usize> {
    if minimum >= 0 && maximum < 64 {
        // Small non-negative integers are packed into the schema byte
        return Some(1);
    }
    let magnitude = minimum.unsigned_abs().max(maximum.unsigned_abs());
    let mut bits = (128 - magnitude.leading_zeros()) as usize - 1;
    if !unsigned {
        bits += 1;
    }
    match bits {
        0..=7 => Some(2),
        8..=14 => Some(3),
        15..=21 => Some(4),
        22..=28 => Some(5),
        _ => {
            let bytes = bits / 8 + 1;
            (bytes <= 17).then_some(2 + bytes)
        }
    }
}

/// Encoded size of a string or blob of at most `max_length` bytes
fn sequence_size(min_length: usize, max_length: usize) -> Option<usize> {
    let length = int_size(min_length as i128, max_length as i128, true)?;
    Some(1 + length + max_length)
}

/// Maximal encoded size of any value of the type registered as `name`
pub fn packed_size(registry: &TypeRegistry, name: &str) -> Option<usize> {
    Sizer {
        registry,
        stack: Vec::new(),
    }
    .size(name)
}

/// Encoded size of a concrete value
pub fn value_size(value: &Value) -> Option<usize> {
    match value {
        Value::Null | Value::Bool(_) => Some(1),
        Value::Int(v) => int_size(*v as i128, *v as i128, *v >= 0),
        Value::UInt(v) => int_size(*v as i128, *v as i128, true),
        Value::Double(_) | Value::DateTime(_) => Some(9),
        Value::Decimal(decimal) => {
            let mantissa = decimal.mantissa as i128;
            let exponent = decimal.exponent as i128;
            Some(1 + int_size(mantissa, mantissa, false)? + int_size(exponent, exponent, false)?)
        }
        Value::String(s) => sequence_size(s.len(), s.len()),
        Value::Blob(bytes) => sequence_size(bytes.len(), bytes.len()),
        Value::List(items) => container_size(items.iter().map(value_size)),
        Value::Map(entries) => container_size(entries.iter().map(|(key, item)| {
            Some(sequence_size(key.len(), key.len())? + value_size(item)?)
        })),
        Value::IMap(entries) => container_size(entries.iter().map(|(key, item)| {
            Some(int_size(*key as i128, *key as i128, *key >= 0)? + value_size(item)?)
        })),
    }
}

/// Container framing plus the sizes of its items
fn container_size(items: impl Iterator<Item = Option<usize>>) -> Option<usize> {
    items.fold(Some(2), |acc, size| Some(acc? + size?))
}

struct Sizer<'a> {
    registry: &'a TypeRegistry,
    stack: Vec<&'a str>,
}

impl<'a> Sizer<'a> {
    fn size(&mut self, name: &'a str) -> Option<usize> {
        if self.stack.contains(&name) {
            // Only reachable for registries assembled with `define`, loading rejects cycles
            return None;
        }
        let ty = self.registry.get(name)?;
        self.stack.push(name);
        let res = self.type_size(ty);
        self.stack.pop();
        res
    }

    fn type_size(&mut self, ty: &'a Type) -> Option<usize> {
        match ty {
            Type::Any | Type::Decimal(_) => None,
            Type::Null | Type::Bool => Some(1),
            Type::Int(int) => int_size(int.minimum?, int.maximum?, int.unsigned),
            Type::Double(_) | Type::DateTime => Some(9),
            Type::String(string) => sequence_size(string.min_length.unwrap_or(0), string.max_length?),
            Type::Blob(blob) => sequence_size(blob.min_length.unwrap_or(0), blob.max_length?),
            Type::Enum(enm) => int_size(0, enm.max_value()? as i128, true),
            Type::Bitfield(bitfield) => {
                let width = bitfield.bit_size();
                let maximum = if width >= 64 {
                    u64::MAX as i128
                } else {
                    (1i128 << width) - 1
                };
                int_size(0, maximum, true)
            }
            Type::List(list) => match (list.max_length?, &list.allowed) {
                (0, _) => Some(2),
                (count, Some(allowed)) => Some(2 + count * self.size(allowed)?),
                (_, None) => None,
            },
            Type::Tuple(tuple) => tuple
                .items
                .iter()
                .try_fold(2, |acc, item| Some(acc + self.size(item)?)),
            Type::Map(map) => map.fields.as_ref()?.iter().try_fold(2, |acc, (key, field)| {
                Some(acc + sequence_size(key.len(), key.len())? + self.size(field)?)
            }),
            Type::IMap(imap) => imap.fields.as_ref()?.iter().try_fold(2, |acc, (key, field)| {
                let key = *key as i128;
                Some(acc + int_size(key, key, key >= 0)? + self.size(field)?)
            }),
            Type::Alias(target) => self.size(target),
            Type::Union(members) => {
                let mut res = None;
                for member in members {
                    res = Some(res.unwrap_or(0).max(self.size(member)?));
                }
                res
            }
            Type::Constant(value) => value_size(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::types::{BitfieldField, BitfieldType, ListType, StringType, TupleType};

    #[test]
    fn test_int_sizes() {
        assert_eq!(int_size(0, 63, true), Some(1));
        assert_eq!(int_size(0, 255, true), Some(2));
        assert_eq!(int_size(-128, 127, false), Some(3));
        assert_eq!(int_size(0, u64::MAX as i128, true), Some(10));
        assert_eq!(int_size(i64::MIN as i128, i64::MAX as i128, false), Some(11));
    }

    #[test]
    fn test_builtin_sizes() {
        let registry = TypeRegistry::new();
        assert_eq!(packed_size(&registry, "Bool"), Some(1));
        assert_eq!(packed_size(&registry, "UInt8"), Some(2));
        assert_eq!(packed_size(&registry, "Int32"), Some(7));
        assert_eq!(packed_size(&registry, "DateTime"), Some(9));
        assert_eq!(packed_size(&registry, "Double"), Some(9));
        assert_eq!(packed_size(&registry, "Int"), None);
        assert_eq!(packed_size(&registry, "UInt"), None);
        assert_eq!(packed_size(&registry, "String"), None);
        assert_eq!(packed_size(&registry, "Any"), None);
        assert_eq!(packed_size(&registry, "OptionalString"), None);
    }

    #[test]
    fn test_composite_sizes() {
        let mut registry = TypeRegistry::new();
        registry
            .define(
                "name",
                Type::String(StringType {
                    max_length: Some(10),
                    ..StringType::default()
                }),
            )
            .unwrap();
        registry
            .define(
                "hex",
                Type::String(StringType {
                    pattern: Some(crate::types::Pattern::new("[0-9a-f]{4}").unwrap()),
                    ..StringType::default()
                }),
            )
            .unwrap();
        registry
            .define(
                "pair",
                Type::Tuple(TupleType {
                    items: vec!["name".to_string(), "UInt8".to_string()],
                    enum_name: None,
                }),
            )
            .unwrap();
        registry
            .define(
                "pairs",
                Type::List(ListType {
                    allowed: Some("pair".to_string()),
                    min_length: 0,
                    max_length: Some(3),
                }),
            )
            .unwrap();
        registry
            .define("maybe", Type::Union(vec!["Null".to_string(), "pair".to_string()]))
            .unwrap();
        assert_eq!(packed_size(&registry, "name"), Some(12));
        assert_eq!(packed_size(&registry, "hex"), None);
        assert_eq!(packed_size(&registry, "pair"), Some(16));
        assert_eq!(packed_size(&registry, "pairs"), Some(50));
        assert_eq!(packed_size(&registry, "maybe"), Some(16));
    }

    #[test]
    fn test_bitfield_and_constant_sizes() {
        let mut registry = TypeRegistry::new();
        registry
            .define(
                "bits",
                Type::Bitfield(BitfieldType {
                    fields: vec![BitfieldField {
                        offset: 4,
                        width: 8,
                        type_name: "UInt8".to_string(),
                    }],
                    enum_name: None,
                }),
            )
            .unwrap();
        registry
            .define("answer", Type::Constant(Value::Int(42)))
            .unwrap();
        assert_eq!(packed_size(&registry, "bits"), Some(3));
        assert_eq!(packed_size(&registry, "answer"), Some(1));
    }

    #[test]
    fn test_self_referencing_definition_unbounded() {
        let mut registry = TypeRegistry::new();
        registry
            .define(
                "nested",
                Type::List(ListType {
                    allowed: Some("nested".to_string()),
                    min_length: 0,
                    max_length: Some(2),
                }),
            )
            .unwrap();
        assert_eq!(packed_size(&registry, "nested"), None);
        assert!(matches!(registry.check_cycles(), Err(LoadError::CyclicType { .. })));
    }
}
