//! Type algebra of SHV trees
//!
//! Composite types never embed other types. They refer to them by name and
//! the [`TypeRegistry`](crate::registry::TypeRegistry) owning them resolves
//! those names.

use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeMap;

use crate::value::{Decimal, Value};

/// Integer bounded by an optional inclusive range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntType {
    pub minimum: Option<i128>,
    pub maximum: Option<i128>,
    pub multiple_of: Option<i128>,
    pub unsigned: bool,
}

impl IntType {
    pub fn ranged(minimum: i128, maximum: i128) -> Self {
        Self {
            minimum: Some(minimum),
            maximum: Some(maximum),
            multiple_of: None,
            unsigned: minimum >= 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoubleType {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub multiple_of: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecimalType {
    pub minimum: Option<Decimal>,
    pub maximum: Option<Decimal>,
}

/// Regular expression matched from the start of a string
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringType {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobType {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Ordered aliases of integer values
///
/// Several aliases may share one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumType {
    pub values: IndexMap<String, i64>,
}

impl EnumType {
    pub fn value(&self, alias: &str) -> Option<i64> {
        self.values.get(alias).copied()
    }

    pub fn alias(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(alias, _)| alias.as_str())
    }

    pub fn contains_value(&self, value: i128) -> bool {
        self.values.values().any(|v| *v as i128 == value)
    }

    pub fn max_value(&self) -> Option<i64> {
        self.values.values().copied().max()
    }
}

/// One field of a bitfield occupying `width` bits from bit `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldField {
    pub offset: u32,
    pub width: u32,
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitfieldType {
    /// Fields ordered by offset, never overlapping
    pub fields: Vec<BitfieldField>,
    /// Enum naming the fields by their offsets
    pub enum_name: Option<String>,
}

impl BitfieldType {
    /// Total number of bits covered by the fields
    pub fn bit_size(&self) -> u32 {
        self.fields
            .iter()
            .map(|field| field.offset + field.width)
            .max()
            .unwrap_or(0)
    }

    /// Field starting exactly at `offset`
    pub fn field_at(&self, offset: u32) -> Option<&BitfieldField> {
        self.fields.iter().find(|field| field.offset == offset)
    }

    /// Raw unsigned value of `field` extracted from `value`
    pub fn extract(field: &BitfieldField, value: u64) -> u64 {
        let shifted = value.checked_shr(field.offset).unwrap_or(0);
        if field.width >= 64 {
            shifted
        } else {
            shifted & ((1u64 << field.width) - 1)
        }
    }
}

/// List with optionally restricted element type and length
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListType {
    /// Element type, any value when absent
    pub allowed: Option<String>,
    pub min_length: usize,
    pub max_length: Option<usize>,
}

/// Fixed length list with a type per position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleType {
    pub items: Vec<String>,
    /// Enum naming the positions
    pub enum_name: Option<String>,
}

/// String keyed map, any content when `fields` is absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapType {
    pub fields: Option<IndexMap<String, String>>,
}

/// Integer keyed map, any content when `fields` is absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IMapType {
    pub fields: Option<BTreeMap<i64, String>>,
    /// Enum naming the keys
    pub enum_name: Option<String>,
}

/// Every type a tree document can describe
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Any,
    Null,
    Bool,
    Int(IntType),
    Double(DoubleType),
    Decimal(DecimalType),
    String(StringType),
    Blob(BlobType),
    DateTime,
    Enum(EnumType),
    Bitfield(BitfieldType),
    List(ListType),
    Tuple(TupleType),
    Map(MapType),
    IMap(IMapType),
    Alias(String),
    Union(Vec<String>),
    Constant(Value),
}

impl Type {
    pub fn kind(&self) -> &'static str {
        match self {
            Type::Any => "Any",
            Type::Null => "Null",
            Type::Bool => "Bool",
            Type::Int(_) => "Int",
            Type::Double(_) => "Double",
            Type::Decimal(_) => "Decimal",
            Type::String(_) => "String",
            Type::Blob(_) => "Blob",
            Type::DateTime => "DateTime",
            Type::Enum(_) => "Enum",
            Type::Bitfield(_) => "Bitfield",
            Type::List(_) => "List",
            Type::Tuple(_) => "Tuple",
            Type::Map(_) => "Map",
            Type::IMap(_) => "IMap",
            Type::Alias(_) => "Alias",
            Type::Union(_) => "Union",
            Type::Constant(_) => "Constant",
        }
    }

    /// Names of the types this type refers to
    pub fn references(&self) -> Vec<&str> {
        match self {
            Type::Bitfield(bitfield) => bitfield
                .fields
                .iter()
                .map(|field| field.type_name.as_str())
                .chain(bitfield.enum_name.as_deref())
                .collect(),
            Type::List(list) => list.allowed.as_deref().into_iter().collect(),
            Type::Tuple(tuple) => tuple
                .items
                .iter()
                .map(String::as_str)
                .chain(tuple.enum_name.as_deref())
                .collect(),
            Type::Map(map) => map
                .fields
                .iter()
                .flat_map(|fields| fields.values().map(String::as_str))
                .collect(),
            Type::IMap(imap) => imap
                .fields
                .iter()
                .flat_map(|fields| fields.values().map(String::as_str))
                .chain(imap.enum_name.as_deref())
                .collect(),
            Type::Alias(target) => vec![target.as_str()],
            Type::Union(members) => members.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Names that can never be defined by a document
pub const CORE_TYPES: [&str; 12] = [
    "Any", "Null", "Bool", "Int", "Double", "Decimal", "String", "Blob", "DateTime", "List",
    "Map", "IMap",
];

/// Shared type of a synthesized `get` parameter
pub const GET_PARAM: &str = "_getParam";

/// Core and builtin types in registration order
pub fn builtin_types() -> Vec<(&'static str, Type, bool)> {
    let int = |min: i128, max: i128| Type::Int(IntType::ranged(min, max));
    vec![
        ("Any", Type::Any, true),
        ("Null", Type::Null, true),
        ("Bool", Type::Bool, true),
        ("Int", Type::Int(IntType::default()), true),
        ("Double", Type::Double(DoubleType::default()), true),
        ("Decimal", Type::Decimal(DecimalType::default()), true),
        ("String", Type::String(StringType::default()), true),
        ("Blob", Type::Blob(BlobType::default()), true),
        ("DateTime", Type::DateTime, true),
        ("List", Type::List(ListType::default()), true),
        ("Map", Type::Map(MapType::default()), true),
        ("IMap", Type::IMap(IMapType::default()), true),
        ("Int8", int(i8::MIN as i128, i8::MAX as i128), false),
        ("Int16", int(i16::MIN as i128, i16::MAX as i128), false),
        ("Int32", int(i32::MIN as i128, i32::MAX as i128), false),
        ("Int64", int(i64::MIN as i128, i64::MAX as i128), false),
        (
            "UInt",
            Type::Int(IntType {
                minimum: Some(0),
                unsigned: true,
                ..IntType::default()
            }),
            false,
        ),
        ("UInt8", int(0, u8::MAX as i128), false),
        ("UInt16", int(0, u16::MAX as i128), false),
        ("UInt32", int(0, u32::MAX as i128), false),
        ("UInt64", int(0, u64::MAX as i128), false),
        (
            "OptionalString",
            Type::Union(vec!["Null".to_string(), "String".to_string()]),
            false,
        ),
        (GET_PARAM, Type::Alias("OptionalString".to_string()), false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_anchored_at_start() {
        let pattern = Pattern::new("[0-9]+").unwrap();
        assert!(pattern.matches("123"));
        assert!(pattern.matches("12a"));
        assert!(!pattern.matches("a12"));
        assert!(Pattern::new("(").is_err());
        assert_eq!(pattern, Pattern::new("[0-9]+").unwrap());
    }

    #[test]
    fn test_bitfield_extract() {
        let field = BitfieldField {
            offset: 1,
            width: 3,
            type_name: "Int".to_string(),
        };
        assert_eq!(BitfieldType::extract(&field, 0xD), 6);
        let last = BitfieldField {
            offset: 63,
            width: 1,
            type_name: "Bool".to_string(),
        };
        assert_eq!(BitfieldType::extract(&last, 0x8000_0000_0000_0000), 1);
    }

    #[test]
    fn test_builtins_cover_core() {
        let builtins = builtin_types();
        for core in CORE_TYPES {
            assert!(builtins.iter().any(|(name, _, is_core)| *name == core && *is_core));
        }
        assert_eq!(builtins.iter().filter(|(_, _, is_core)| *is_core).count(), CORE_TYPES.len());
    }

    #[test]
    fn test_references() {
        let tuple = Type::Tuple(TupleType {
            items: vec!["Int".to_string(), "String".to_string()],
            enum_name: Some("fooEnum".to_string()),
        });
        assert_eq!(tuple.references(), vec!["Int", "String", "fooEnum"]);
        assert!(Type::Bool.references().is_empty());
    }
}
