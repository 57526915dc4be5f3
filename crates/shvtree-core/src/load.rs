//! Interpretation of the `types` section of a tree document
//!
//! Loading runs in passes. All declared names are collected first, so custom
//! types may refer to each other in any order. Bodies are interpreted next,
//! registering companion types for inline unions and enum lists on the way.
//! Only then are references checked, cycles rejected and bitfield layouts
//! computed, as those need every body in place.

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::document::Entries;
use crate::error::{LoadError, Location};
use crate::registry::TypeRegistry;
use crate::types::{
    BitfieldField, BitfieldType, BlobType, DecimalType, DoubleType, EnumType, IMapType, IntType,
    ListType, MapType, Pattern, StringType, TupleType, Type,
};
use crate::value::{Decimal, Value};

/// Build a registry from the `types` section of a document
pub fn load_types(types: &Entries<Json>) -> Result<TypeRegistry, LoadError> {
    let mut loader = TypesLoader::new(types)?;
    for (name, spec) in types.iter() {
        loader.load(name, spec)?;
    }
    let registry = loader.finish()?;
    debug!(
        custom = registry.custom().count(),
        total = registry.len(),
        "Types loaded"
    );
    Ok(registry)
}

/// Counter assigning integers to enum aliases
///
/// Every alias takes the next value. A hole takes a value without naming it,
/// a skip of N takes N values and an explicit value restarts counting after it.
#[derive(Debug, Default)]
struct AutoNumber {
    next: i64,
}

impl AutoNumber {
    fn assign(&mut self) -> i64 {
        let value = self.next;
        self.next += 1;
        value
    }

    fn hole(&mut self) {
        self.next += 1;
    }

    fn skip(&mut self, count: i64) {
        self.next += count;
    }

    fn set(&mut self, value: i64) -> i64 {
        self.next = value + 1;
        value
    }
}

/// Interpret an enum-like list into `(alias, value)` pairs
fn enumlike(location: &Location, values: &Json) -> Result<Vec<(String, i64)>, LoadError> {
    let Json::Array(items) = values else {
        return Err(LoadError::invalid(location, "Invalid type, list expected"));
    };
    let mut counter = AutoNumber::default();
    let mut res = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Json::Null => counter.hole(),
            Json::Number(_) => counter.skip(non_negative(location, item)?),
            Json::String(alias) => res.push((alias.clone(), counter.assign())),
            Json::Object(explicit) => {
                for (alias, value) in explicit {
                    let value = value
                        .as_i64()
                        .ok_or_else(|| LoadError::invalid(&location.join(alias), "Expected int"))?;
                    res.push((alias.clone(), counter.set(value)));
                }
            }
            other => {
                return Err(LoadError::invalid(
                    location,
                    format!("Invalid value specifier: {}", other),
                ))
            }
        }
    }
    Ok(res)
}

fn non_negative(location: &Location, value: &Json) -> Result<i64, LoadError> {
    value
        .as_i64()
        .filter(|v| *v >= 0)
        .ok_or_else(|| LoadError::invalid(location, format!("Expected non-negative integer, got {}", value)))
}

fn enum_type(location: &Location, pairs: Vec<(String, i64)>) -> Result<EnumType, LoadError> {
    let mut values = IndexMap::with_capacity(pairs.len());
    for (alias, value) in pairs {
        if values.insert(alias.clone(), value).is_some() {
            return Err(LoadError::invalid(location, format!("Duplicate alias '{}'", alias)));
        }
    }
    Ok(EnumType { values })
}

/// Entry of a bitfield `types` list
#[derive(Debug)]
enum BitSlot {
    Skip(i64),
    Next(String),
    At(String, i64),
}

#[derive(Debug)]
struct PendingBitfield {
    location: Location,
    slots: Option<Vec<BitSlot>>,
    enum_name: Option<String>,
}

/// IMap whose fields are named by enum aliases, resolved once all enums exist
#[derive(Debug)]
struct PendingIMap {
    location: Location,
    enum_name: Option<String>,
    named: Vec<(String, String)>,
}

/// Attributes of a mapping type specification
struct Attrs<'a> {
    location: &'a Location,
    map: &'a Map<String, Json>,
    used: HashSet<&'a str>,
}

impl<'a> Attrs<'a> {
    fn new(location: &'a Location, map: &'a Map<String, Json>) -> Self {
        Self {
            location,
            map,
            used: HashSet::new(),
        }
    }

    /// Value of `key`, `null` counting as absent
    fn take(&mut self, key: &'a str) -> Option<&'a Json> {
        self.used.insert(key);
        self.map.get(key).filter(|value| !value.is_null())
    }

    fn expected(&self, key: &str, what: &str) -> LoadError {
        LoadError::invalid(&self.location.join(key), format!("Expected {}", what))
    }

    fn int(&mut self, key: &'a str) -> Result<Option<i128>, LoadError> {
        let Some(value) = self.take(key) else {
            return Ok(None);
        };
        value
            .as_i64()
            .map(i128::from)
            .or_else(|| value.as_u64().map(i128::from))
            .map(Some)
            .ok_or_else(|| self.expected(key, "integer"))
    }

    fn size(&mut self, key: &'a str) -> Result<Option<usize>, LoadError> {
        let Some(value) = self.take(key) else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| self.expected(key, "non-negative integer"))
    }

    fn float(&mut self, key: &'a str) -> Result<Option<f64>, LoadError> {
        let Some(value) = self.take(key) else {
            return Ok(None);
        };
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| self.expected(key, "number"))
    }

    fn decimal(&mut self, key: &'a str) -> Result<Option<Decimal>, LoadError> {
        let parsed = match self.take(key) {
            None => return Ok(None),
            Some(Json::Number(n)) => match n.as_i64() {
                Some(v) => Some(Decimal::from(v)),
                None => n.to_string().parse().ok(),
            },
            Some(Json::String(s)) => s.parse().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| self.expected(key, "decimal"))
    }

    fn boolean(&mut self, key: &'a str) -> Result<Option<bool>, LoadError> {
        let Some(value) = self.take(key) else {
            return Ok(None);
        };
        value
            .as_bool()
            .map(Some)
            .ok_or_else(|| self.expected(key, "bool"))
    }

    fn string(&mut self, key: &'a str) -> Result<Option<&'a str>, LoadError> {
        let Some(value) = self.take(key) else {
            return Ok(None);
        };
        value
            .as_str()
            .map(Some)
            .ok_or_else(|| self.expected(key, "string"))
    }

    /// Fail on keys that none of the accessors asked for
    fn finish(self) -> Result<(), LoadError> {
        let unused: Vec<&str> = self
            .map
            .keys()
            .map(String::as_str)
            .filter(|key| !self.used.contains(key))
            .collect();
        if unused.is_empty() {
            Ok(())
        } else {
            Err(LoadError::UnsupportedKeys {
                location: self.location.clone(),
                keys: unused.join(", "),
            })
        }
    }
}

fn check_order<T: PartialOrd>(
    location: &Location,
    minimum: Option<T>,
    maximum: Option<T>,
) -> Result<(), LoadError> {
    match (minimum, maximum) {
        (Some(min), Some(max)) if min > max => {
            Err(LoadError::invalid(location, "Minimum is greater than maximum"))
        }
        _ => Ok(()),
    }
}

struct TypesLoader {
    registry: TypeRegistry,
    declared: HashSet<String>,
    bitfields: IndexMap<String, PendingBitfield>,
    imaps: IndexMap<String, PendingIMap>,
    enum_refs: Vec<(Location, String)>,
}

impl TypesLoader {
    fn new(types: &Entries<Json>) -> Result<Self, LoadError> {
        let registry = TypeRegistry::new();
        let mut declared = HashSet::new();
        for name in types.keys() {
            if registry.contains(name) || !declared.insert(name.to_string()) {
                return Err(LoadError::DuplicateType {
                    location: Location::new("types").join(name),
                    name: name.to_string(),
                });
            }
        }
        Ok(Self {
            registry,
            declared,
            bitfields: IndexMap::new(),
            imaps: IndexMap::new(),
            enum_refs: Vec::new(),
        })
    }

    fn load(&mut self, name: &str, spec: &Json) -> Result<(), LoadError> {
        let location = Location::new("types").join(name);
        let ty = self.interpret(&location, name, spec)?;
        self.registry.define(name, ty)
    }

    /// Register a type whose name was derived from its owner
    fn define_derived(&mut self, location: &Location, name: &str, ty: Type) -> Result<(), LoadError> {
        if self.declared.contains(name) || self.registry.contains(name) {
            return Err(LoadError::DuplicateType {
                location: location.clone(),
                name: name.to_string(),
            });
        }
        self.registry.define(name, ty)
    }

    fn interpret(&mut self, location: &Location, name: &str, spec: &Json) -> Result<Type, LoadError> {
        match spec {
            Json::Null => Ok(Type::Alias("Null".to_string())),
            Json::String(target) => Ok(Type::Alias(target.clone())),
            Json::Array(members) => Ok(Type::Union(self.members(location, name, members)?)),
            Json::Object(attrs) => self.interpret_mapping(location, name, attrs),
            other => Err(LoadError::invalid(
                location,
                format!("Invalid type description format: {}", other),
            )),
        }
    }

    fn members(&mut self, location: &Location, owner: &str, members: &[Json]) -> Result<Vec<String>, LoadError> {
        members
            .iter()
            .enumerate()
            .map(|(idx, member)| {
                self.reference(
                    &location.join(format!("[{}]", idx)),
                    &format!("{}{}", owner, idx),
                    member,
                )
            })
            .collect()
    }

    /// Name of the type referenced by `spec`, registering inline types under `derived`
    fn reference(&mut self, location: &Location, derived: &str, spec: &Json) -> Result<String, LoadError> {
        match spec {
            Json::Null => Ok("Null".to_string()),
            Json::String(name) => Ok(name.clone()),
            Json::Array(members) => {
                let name = format!("{}OneOf", derived);
                let members = self.members(location, &name, members)?;
                self.define_derived(location, &name, Type::Union(members))?;
                Ok(name)
            }
            Json::Object(attrs) => {
                let name = format!("{}Type", derived);
                let ty = self.interpret_mapping(location, &name, attrs)?;
                self.define_derived(location, &name, ty)?;
                Ok(name)
            }
            other => Err(LoadError::invalid(
                location,
                format!("Invalid type reference: {}", other),
            )),
        }
    }

    /// Name of the enum given either by name or as a raw alias list
    fn subenum(&mut self, location: &Location, owner: &str, spec: &Json) -> Result<String, LoadError> {
        match spec {
            Json::String(name) => {
                self.enum_refs.push((location.clone(), name.clone()));
                Ok(name.clone())
            }
            Json::Array(_) => {
                let name = format!("{}Enum", owner);
                let ty = enum_type(location, enumlike(location, spec)?)?;
                self.define_derived(location, &name, Type::Enum(ty))?;
                Ok(name)
            }
            other => Err(LoadError::invalid(location, format!("Invalid enum: {}", other))),
        }
    }

    fn interpret_mapping(
        &mut self,
        location: &Location,
        name: &str,
        map: &Map<String, Json>,
    ) -> Result<Type, LoadError> {
        let mut attrs = Attrs::new(location, map);
        let kind = attrs
            .string("type")?
            .ok_or_else(|| LoadError::invalid(location, "Missing 'type'"))?;
        let ty = match kind {
            "Int" => {
                let minimum = attrs.int("minimum")?;
                let maximum = attrs.int("maximum")?;
                let multiple_of = attrs.int("multipleOf")?;
                let unsigned = attrs
                    .boolean("unsigned")?
                    .unwrap_or(minimum.is_some_and(|min| min >= 0));
                if unsigned && (minimum.is_some_and(|v| v < 0) || maximum.is_some_and(|v| v < 0)) {
                    return Err(LoadError::invalid(
                        location,
                        "Boundaries can't be less than zero for unsigned number",
                    ));
                }
                if multiple_of.is_some_and(|m| m <= 0) {
                    return Err(LoadError::invalid(&location.join("multipleOf"), "Expected positive integer"));
                }
                check_order(location, minimum, maximum)?;
                Type::Int(IntType {
                    minimum,
                    maximum,
                    multiple_of,
                    unsigned,
                })
            }
            "Double" => {
                let ty = DoubleType {
                    minimum: attrs.float("minimum")?,
                    maximum: attrs.float("maximum")?,
                    exclusive_minimum: attrs.float("exclusiveMinimum")?,
                    exclusive_maximum: attrs.float("exclusiveMaximum")?,
                    multiple_of: attrs.float("multipleOf")?,
                };
                if ty.multiple_of.is_some_and(|m| m <= 0.0) {
                    return Err(LoadError::invalid(&location.join("multipleOf"), "Expected positive number"));
                }
                check_order(location, ty.minimum, ty.maximum)?;
                Type::Double(ty)
            }
            "Decimal" => {
                let ty = DecimalType {
                    minimum: attrs.decimal("minimum")?,
                    maximum: attrs.decimal("maximum")?,
                };
                check_order(location, ty.minimum, ty.maximum)?;
                Type::Decimal(ty)
            }
            "String" => {
                let length = attrs.size("length")?;
                let min_length = attrs.size("minLength")?.or(length);
                let max_length = attrs.size("maxLength")?.or(length);
                check_order(location, min_length, max_length)?;
                let pattern = match attrs.string("pattern")? {
                    Some(source) => Some(Pattern::new(source).map_err(|err| {
                        LoadError::invalid(&location.join("pattern"), format!("Invalid pattern: {}", err))
                    })?),
                    None => None,
                };
                Type::String(StringType {
                    min_length,
                    max_length,
                    pattern,
                })
            }
            "Blob" => {
                let length = attrs.size("length")?;
                let min_length = attrs.size("minLength")?.or(length);
                let max_length = attrs.size("maxLength")?.or(length);
                check_order(location, min_length, max_length)?;
                Type::Blob(BlobType {
                    min_length,
                    max_length,
                })
            }
            "Enum" => {
                let values_location = location.join("values");
                let pairs = match attrs.take("values") {
                    Some(values) => enumlike(&values_location, values)?,
                    None => Vec::new(),
                };
                Type::Enum(enum_type(&values_location, pairs)?)
            }
            "Bitfield" => self.bitfield(location, name, &mut attrs)?,
            "List" => {
                let min_length = attrs.size("minlen")?.unwrap_or(0);
                let max_length = attrs.size("maxlen")?;
                check_order(location, Some(min_length), max_length)?;
                let allowed = match attrs.take("allowed") {
                    Some(spec) => Some(self.reference(&location.join("allowed"), name, spec)?),
                    None => None,
                };
                Type::List(ListType {
                    allowed,
                    min_length,
                    max_length,
                })
            }
            "Tuple" => {
                let items: &[Json] = match attrs.take("items") {
                    Some(Json::Array(items)) => items.as_slice(),
                    Some(_) => return Err(LoadError::invalid(&location.join("items"), "Invalid format")),
                    None => &[],
                };
                let items = items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        self.reference(
                            &location.join(format!("items[{}]", idx)),
                            &format!("{}{}", name, idx),
                            item,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let enum_name = match attrs.take("enum") {
                    Some(spec) => Some(self.subenum(&location.join("enum"), name, spec)?),
                    None => None,
                };
                Type::Tuple(TupleType { items, enum_name })
            }
            "Map" => {
                let fields = match attrs.take("fields") {
                    Some(Json::Object(fields)) => {
                        let fields_location = location.join("fields");
                        let mut res = IndexMap::with_capacity(fields.len());
                        for (key, spec) in fields {
                            let field_type = self.reference(
                                &fields_location.join(key),
                                &format!("{}{}", name, key),
                                spec,
                            )?;
                            res.insert(key.clone(), field_type);
                        }
                        Some(res)
                    }
                    Some(_) => return Err(LoadError::invalid(&location.join("fields"), "Expected mapping")),
                    None => None,
                };
                Type::Map(MapType { fields })
            }
            "IMap" => self.imap(location, name, &mut attrs)?,
            "Constant" => {
                let value = attrs.take("value").ok_or_else(|| {
                    LoadError::invalid(&location.join("value"), "Missing value, use Null type instead")
                })?;
                Type::Constant(Value::from(value.clone()))
            }
            other => {
                return Err(LoadError::invalid(
                    location,
                    format!("Invalid type '{}' of the '{}' type", other, name),
                ))
            }
        };
        attrs.finish()?;
        Ok(ty)
    }

    fn bitfield(&mut self, location: &Location, name: &str, attrs: &mut Attrs<'_>) -> Result<Type, LoadError> {
        let types_location = location.join("types");
        let slots = match attrs.take("types") {
            Some(Json::Array(items)) => {
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Json::Null => slots.push(BitSlot::Skip(1)),
                        Json::Number(_) => slots.push(BitSlot::Skip(non_negative(&types_location, item)?)),
                        Json::String(type_name) => slots.push(BitSlot::Next(type_name.clone())),
                        Json::Object(explicit) => {
                            for (type_name, offset) in explicit {
                                let offset = non_negative(&types_location.join(type_name), offset)?;
                                slots.push(BitSlot::At(type_name.clone(), offset));
                            }
                        }
                        other => {
                            return Err(LoadError::invalid(
                                &types_location,
                                format!("Invalid value specifier: {}", other),
                            ))
                        }
                    }
                }
                Some(slots)
            }
            Some(_) => return Err(LoadError::invalid(&types_location, "Invalid type, list expected")),
            None => None,
        };
        let enum_name = match attrs.take("enum") {
            Some(spec) => Some(self.subenum(&location.join("enum"), name, spec)?),
            None => None,
        };

        // Placeholder keeping the field types visible to reference and cycle checks
        let fields = slots
            .iter()
            .flatten()
            .filter_map(|slot| match slot {
                BitSlot::Next(type_name) | BitSlot::At(type_name, _) => Some(BitfieldField {
                    offset: 0,
                    width: 0,
                    type_name: type_name.clone(),
                }),
                BitSlot::Skip(_) => None,
            })
            .collect();
        self.bitfields.insert(
            name.to_string(),
            PendingBitfield {
                location: location.clone(),
                slots,
                enum_name: enum_name.clone(),
            },
        );
        Ok(Type::Bitfield(BitfieldType { fields, enum_name }))
    }

    fn imap(&mut self, location: &Location, name: &str, attrs: &mut Attrs<'_>) -> Result<Type, LoadError> {
        let enum_name = match attrs.take("enum") {
            Some(spec) => Some(self.subenum(&location.join("enum"), name, spec)?),
            None => None,
        };
        let fields_location = location.join("fields");
        let duplicate = |index: i64| LoadError::invalid(&fields_location, format!("Duplicate field index {}", index));
        let mut fields = BTreeMap::new();
        let mut named = Vec::new();
        match attrs.take("fields") {
            None => {
                return Ok(Type::IMap(IMapType {
                    fields: None,
                    enum_name,
                }))
            }
            Some(Json::Object(map)) => {
                for (key, spec) in map {
                    let field_type =
                        self.reference(&fields_location.join(key), &format!("{}{}", name, key), spec)?;
                    match key.parse::<i64>() {
                        Ok(index) => {
                            if fields.insert(index, field_type).is_some() {
                                return Err(duplicate(index));
                            }
                        }
                        Err(_) => named.push((key.clone(), field_type)),
                    }
                }
            }
            Some(Json::Array(items)) => {
                let mut counter = AutoNumber::default();
                for (idx, item) in items.iter().enumerate() {
                    let placed: Vec<(i64, &String)> = match item {
                        Json::String(type_name) => vec![(counter.assign(), type_name)],
                        Json::Object(explicit) => explicit
                            .iter()
                            .map(|(type_name, index)| {
                                let location = fields_location.join(format!("[{}]", idx)).join(type_name);
                                non_negative(&location, index).map(|index| (counter.set(index), type_name))
                            })
                            .collect::<Result<_, _>>()?,
                        _ => return Err(LoadError::invalid(&fields_location, "Invalid fields format")),
                    };
                    for (index, type_name) in placed {
                        if fields.insert(index, type_name.clone()).is_some() {
                            return Err(duplicate(index));
                        }
                    }
                }
            }
            Some(_) => return Err(LoadError::invalid(&fields_location, "Invalid format")),
        }
        if !named.is_empty() {
            self.imaps.insert(
                name.to_string(),
                PendingIMap {
                    location: fields_location.clone(),
                    enum_name: enum_name.clone(),
                    named,
                },
            );
        }
        Ok(Type::IMap(IMapType {
            fields: Some(fields),
            enum_name,
        }))
    }

    fn resolve_enum(&self, location: &Location, name: &str) -> Result<&EnumType, LoadError> {
        if !self.registry.contains(name) {
            return Err(LoadError::UnknownType {
                location: location.clone(),
                name: name.to_string(),
            });
        }
        match self.registry.resolve(name)? {
            Type::Enum(enm) => Ok(enm),
            _ => Err(LoadError::invalid(location, format!("Type '{}' is not Enum", name))),
        }
    }

    fn finish(mut self) -> Result<TypeRegistry, LoadError> {
        for (location, name) in &self.enum_refs {
            self.resolve_enum(location, name)?;
        }

        for (name, pending) in std::mem::take(&mut self.imaps) {
            let enm = match &pending.enum_name {
                Some(enum_name) => self.resolve_enum(&pending.location, enum_name)?.clone(),
                None => {
                    return Err(LoadError::invalid(
                        &pending.location,
                        "Field names require the 'enum' attribute",
                    ))
                }
            };
            let Some(Type::IMap(mut imap)) = self.registry.get(&name).cloned() else {
                continue;
            };
            let fields = imap.fields.get_or_insert_with(BTreeMap::new);
            for (alias, field_type) in pending.named {
                let index = enm.value(&alias).ok_or_else(|| {
                    LoadError::invalid(&pending.location.join(&alias), "Not an alias of the enum")
                })?;
                if fields.insert(index, field_type).is_some() {
                    return Err(LoadError::invalid(
                        &pending.location,
                        format!("Duplicate field index {}", index),
                    ));
                }
            }
            self.registry.redefine(&name, Type::IMap(imap));
        }

        self.registry.check_references()?;
        self.registry.check_cycles()?;

        let pending: Vec<String> = self.bitfields.keys().cloned().collect();
        for name in pending {
            self.layout_bitfield(&name)?;
        }
        Ok(self.registry)
    }

    /// Names on the alias chain starting at `name`
    fn alias_chain(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut current = name;
        while let Some(Type::Alias(target)) = self.registry.get(current) {
            if chain.contains(target) {
                break;
            }
            chain.push(target.clone());
            current = target.as_str();
        }
        chain
    }

    fn layout_bitfield(&mut self, name: &str) -> Result<(), LoadError> {
        let Some(pending) = self.bitfields.shift_remove(name) else {
            return Ok(());
        };
        let types_location = pending.location.join("types");

        // Nested bitfields need their own layout before their span is known
        for slot in pending.slots.iter().flatten() {
            if let BitSlot::Next(type_name) | BitSlot::At(type_name, _) = slot {
                for dependency in self.alias_chain(type_name) {
                    self.layout_bitfield(&dependency)?;
                }
            }
        }

        let mut fields = Vec::new();
        match (&pending.slots, &pending.enum_name) {
            (Some(slots), _) => {
                let mut position: i64 = 0;
                for slot in slots {
                    let type_name = match slot {
                        BitSlot::Skip(count) => {
                            position += count;
                            continue;
                        }
                        BitSlot::Next(type_name) => type_name,
                        BitSlot::At(type_name, offset) => {
                            position = *offset;
                            type_name
                        }
                    };
                    let width = self.registry.bit_span(type_name).ok_or_else(|| {
                        LoadError::invalid(
                            &types_location,
                            format!("Type {} can't be included in bitfield", type_name),
                        )
                    })?;
                    fields.push((position, width, type_name.clone()));
                    position += width as i64;
                }
            }
            (None, Some(enum_name)) => {
                let enm = self.resolve_enum(&pending.location.join("enum"), enum_name)?;
                let mut offsets: Vec<i64> = enm.values.values().copied().collect();
                offsets.sort_unstable();
                offsets.dedup();
                fields.extend(offsets.into_iter().map(|offset| (offset, 1, "Bool".to_string())));
            }
            (None, None) => {}
        }

        fields.sort_by_key(|(offset, _, _)| *offset);
        let mut end: i64 = 0;
        let mut layout = Vec::with_capacity(fields.len());
        for (offset, width, type_name) in fields {
            if offset < end {
                return Err(LoadError::invalid(
                    &types_location,
                    format!("Field at bit {} overlaps the previous field", offset),
                ));
            }
            end = offset + width as i64;
            if offset < 0 || end > 64 {
                return Err(LoadError::invalid(
                    &types_location,
                    format!("Field at bit {} doesn't fit into 64 bits", offset),
                ));
            }
            layout.push(BitfieldField {
                offset: offset as u32,
                width,
                type_name,
            });
        }
        self.registry.redefine(
            name,
            Type::Bitfield(BitfieldType {
                fields: layout,
                enum_name: pending.enum_name,
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(value: Json) -> Result<TypeRegistry, LoadError> {
        let Json::Object(map) = value else {
            panic!("expected object");
        };
        let entries: Entries<Json> = map.into_iter().collect();
        load_types(&entries)
    }

    fn enum_values(registry: &TypeRegistry, name: &str) -> Vec<(String, i64)> {
        match registry.get(name).unwrap() {
            Type::Enum(enm) => enm.values.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            other => panic!("expected enum, got {:?}", other),
        }
    }

    fn pairs(items: &[(&str, i64)]) -> Vec<(String, i64)> {
        items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_enum_numbering_with_holes_and_skips() {
        let registry = load(json!({
            "e": {
                "type": "Enum",
                "values": ["one", "two", null, "four", 3, "seven", {"eleven": 11}, "twelve"]
            }
        }))
        .unwrap();
        assert_eq!(
            enum_values(&registry, "e"),
            pairs(&[
                ("one", 0),
                ("two", 1),
                ("four", 3),
                ("seven", 7),
                ("eleven", 11),
                ("twelve", 12)
            ])
        );
    }

    #[test]
    fn test_enum_numbering_explicit_values() {
        let registry = load(json!({
            "e": {
                "type": "Enum",
                "values": ["one", "two", {"four": 4, "six": 6}, "seven", null, "nine", 6, "sixteen"]
            }
        }))
        .unwrap();
        assert_eq!(
            enum_values(&registry, "e"),
            pairs(&[
                ("one", 0),
                ("two", 1),
                ("four", 4),
                ("six", 6),
                ("seven", 7),
                ("nine", 9),
                ("sixteen", 16)
            ])
        );
    }

    #[test]
    fn test_redefining_builtin_fails() {
        for name in ["Int", "String", "UInt8", "OptionalString", "_getParam", "IMap"] {
            let err = load(json!({ name: "Bool" })).unwrap_err();
            assert!(
                matches!(&err, LoadError::DuplicateType { name: n, .. } if n == name),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn test_forward_references() {
        let registry = load(json!({
            "first": "second",
            "second": {"type": "List", "allowed": "third"},
            "third": {"type": "Int", "minimum": 0, "maximum": 3}
        }))
        .unwrap();
        assert!(registry.is_valid("first", &Value::List(vec![Value::Int(3)])));
        assert!(!registry.is_valid("first", &Value::List(vec![Value::Int(4)])));
    }

    #[test]
    fn test_unknown_reference() {
        let err = load(json!({"foo": {"type": "List", "allowed": "bar"}})).unwrap_err();
        assert!(matches!(err, LoadError::UnknownType { ref name, .. } if name == "bar"));
    }

    #[test]
    fn test_cycle_detected_at_load() {
        let err = load(json!({"a": "b", "b": ["Int", "a"]})).unwrap_err();
        assert!(matches!(err, LoadError::CyclicType { .. }));
        let err = load(json!({"node": {"type": "Map", "fields": {"children": {"type": "List", "allowed": "node"}}}}))
            .unwrap_err();
        assert!(matches!(err, LoadError::CyclicType { .. }));
    }

    #[test]
    fn test_inline_union_and_companion_enum() {
        let registry = load(json!({
            "point": {"type": "Tuple", "items": ["Int", ["Null", "Double"]], "enum": ["x", "y"]},
            "options": {"type": "List", "allowed": ["String", "Bool"]}
        }))
        .unwrap();
        assert_eq!(
            registry.get("point1OneOf"),
            Some(&Type::Union(vec!["Null".to_string(), "Double".to_string()]))
        );
        assert_eq!(enum_values(&registry, "pointEnum"), pairs(&[("x", 0), ("y", 1)]));
        assert!(registry.contains("optionsOneOf"));
        assert!(registry.is_valid("point", &Value::List(vec![Value::Int(1), Value::Null])));
    }

    #[test]
    fn test_companion_name_collision() {
        let err = load(json!({
            "point": {"type": "Tuple", "items": ["Int"], "enum": ["x"]},
            "pointEnum": "Int"
        }))
        .unwrap_err();
        assert!(matches!(err, LoadError::DuplicateType { ref name, .. } if name == "pointEnum"));
    }

    #[test]
    fn test_string_length_shortcut_and_pattern() {
        let registry = load(json!({
            "code": {"type": "String", "length": 3},
            "hex": {"type": "String", "pattern": "[0-9a-f]+$"}
        }))
        .unwrap();
        assert!(registry.is_valid("code", &Value::from("abc")));
        assert!(!registry.is_valid("code", &Value::from("ab")));
        assert!(registry.is_valid("hex", &Value::from("ff00")));
        assert!(!registry.is_valid("hex", &Value::from("xff")));

        let err = load(json!({"bad": {"type": "String", "pattern": "("}})).unwrap_err();
        assert_eq!(err.location().to_string(), "types.bad.pattern");
    }

    #[test]
    fn test_unsupported_keys() {
        let err = load(json!({"n": {"type": "Int", "minimum": 0, "color": "red"}})).unwrap_err();
        assert_eq!(err.to_string(), "types.n: unsupported keys: color");
    }

    #[test]
    fn test_unsigned_with_negative_bound() {
        let err = load(json!({"n": {"type": "Int", "minimum": -1, "unsigned": true}})).unwrap_err();
        assert!(matches!(err, LoadError::InvalidFormat { .. }));
    }

    #[test]
    fn test_bitfield_types_layout() {
        let registry = load(json!({
            "unknownbit": {"type": "Bitfield", "types": ["Bool", 2, "UInt8", {"Bool": 12}]}
        }))
        .unwrap();
        let Some(Type::Bitfield(bitfield)) = registry.get("unknownbit") else {
            panic!("expected bitfield");
        };
        let layout: Vec<_> = bitfield
            .fields
            .iter()
            .map(|f| (f.offset, f.width, f.type_name.as_str()))
            .collect();
        assert_eq!(layout, vec![(0, 1, "Bool"), (3, 8, "UInt8"), (12, 1, "Bool")]);
        assert_eq!(bitfield.bit_size(), 13);
        assert!(registry.is_valid("unknownbit", &Value::UInt(0x1009)));
        assert!(!registry.is_valid("unknownbit", &Value::UInt(0x2)));
    }

    #[test]
    fn test_bitfield_from_enum() {
        let registry = load(json!({
            "somebit": {"type": "Bitfield", "enum": ["one", "two", 2, "five", {"last": 63}]}
        }))
        .unwrap();
        assert_eq!(
            enum_values(&registry, "somebitEnum"),
            pairs(&[("one", 0), ("two", 1), ("five", 4), ("last", 63)])
        );
        let Some(Type::Bitfield(bitfield)) = registry.get("somebit") else {
            panic!("expected bitfield");
        };
        assert_eq!(bitfield.bit_size(), 64);
        assert!(registry.is_valid("somebit", &Value::UInt(0x8000_0000_0000_0013)));
        assert!(!registry.is_valid("somebit", &Value::UInt(0x4)));
    }

    #[test]
    fn test_bitfield_rejects_unbounded_types() {
        let err = load(json!({"b": {"type": "Bitfield", "types": ["String"]}})).unwrap_err();
        assert_eq!(err.location().to_string(), "types.b.types");
        let err = load(json!({"b": {"type": "Bitfield", "types": ["UInt8", {"Bool": 3}]}})).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_nested_bitfield_span() {
        let registry = load(json!({
            "outer": {"type": "Bitfield", "types": ["inner", "Bool"]},
            "inner": {"type": "Bitfield", "types": ["UInt8", "Bool"]}
        }))
        .unwrap();
        let Some(Type::Bitfield(outer)) = registry.get("outer") else {
            panic!("expected bitfield");
        };
        assert_eq!(outer.fields[1].offset, 9);
    }

    #[test]
    fn test_imap_fields() {
        let registry = load(json!({
            "myimap": {"type": "IMap", "enum": "myimapEnum", "fields": ["String", "DateTime", {"Blob": 7}]},
            "myimapEnum": {"type": "Enum", "values": ["one", "two", {"seven": 7}]},
            "named": {"type": "IMap", "enum": ["a", "b"], "fields": {"b": "Int", "5": "Bool"}}
        }))
        .unwrap();
        let Some(Type::IMap(imap)) = registry.get("myimap") else {
            panic!("expected imap");
        };
        let fields = imap.fields.as_ref().unwrap();
        assert_eq!(fields.get(&0).map(String::as_str), Some("String"));
        assert_eq!(fields.get(&1).map(String::as_str), Some("DateTime"));
        assert_eq!(fields.get(&7).map(String::as_str), Some("Blob"));

        let Some(Type::IMap(named)) = registry.get("named") else {
            panic!("expected imap");
        };
        let fields = named.fields.as_ref().unwrap();
        assert_eq!(fields.get(&1).map(String::as_str), Some("Int"));
        assert_eq!(fields.get(&5).map(String::as_str), Some("Bool"));
    }

    #[test]
    fn test_enum_reference_must_be_enum() {
        let err = load(json!({"t": {"type": "Tuple", "items": ["Int"], "enum": "Int"}})).unwrap_err();
        assert!(err.to_string().contains("is not Enum"));
    }

    #[test]
    fn test_constant() {
        let registry = load(json!({"answer": {"type": "Constant", "value": 42}})).unwrap();
        assert!(registry.is_valid("answer", &Value::UInt(42)));
        assert!(!registry.is_valid("answer", &Value::Int(41)));
        assert!(load(json!({"nothing": {"type": "Constant"}})).is_err());
    }
}
