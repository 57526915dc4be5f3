//! Runtime values carried by SHV calls
//!
//! The model mirrors the logical SHV data model without committing to any wire
//! encoding: integers keep their signedness, maps are keyed by strings and
//! integer maps by integers.

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decimal number with a base 10 exponent (`mantissa * 10^exponent`)
#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    pub mantissa: i64,
    pub exponent: i32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid decimal '{0}'")]
pub struct ParseDecimalError(pub String);

impl Decimal {
    pub fn new(mantissa: i64, exponent: i32) -> Self {
        Self { mantissa, exponent }
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        format!("{:e}", value).parse().ok()
    }

    /// Magnitude stripped of trailing zeros together with its exponent
    fn reduced(&self) -> (u128, i64) {
        let mut digits = self.mantissa.unsigned_abs() as u128;
        let mut exponent = self.exponent as i64;
        while digits != 0 && digits % 10 == 0 {
            digits /= 10;
            exponent += 1;
        }
        (digits, exponent)
    }
}

fn digit_count(mut value: u128) -> i64 {
    let mut count = 1;
    while value >= 10 {
        value /= 10;
        count += 1;
    }
    count
}

fn compare_magnitude(a: &Decimal, b: &Decimal) -> Ordering {
    let (mut da, ea) = a.reduced();
    let (mut db, eb) = b.reduced();
    match (da == 0, db == 0) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    let (la, lb) = (digit_count(da), digit_count(db));
    let order = (la + ea).cmp(&(lb + eb));
    if order != Ordering::Equal {
        return order;
    }
    // Same order of magnitude: pad the shorter mantissa so both share a scale.
    // Both hold at most 20 digits, so the product stays within u128.
    if la < lb {
        da *= 10u128.pow((lb - la) as u32);
    } else {
        db *= 10u128.pow((la - lb) as u32);
    }
    da.cmp(&db)
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (sa, sb) = (self.mantissa.signum(), other.mantissa.signum());
        if sa != sb {
            return sa.cmp(&sb);
        }
        match sa {
            0 => Ordering::Equal,
            1 => compare_magnitude(self, other),
            _ => compare_magnitude(other, self),
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self::new(value, 0)
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDecimalError(s.to_string());
        let text = s.trim();
        let (number, exponent) = match text.find(['e', 'E']) {
            Some(idx) => (&text[..idx], text[idx + 1..].parse::<i32>().map_err(|_| err())?),
            None => (text, 0),
        };
        let (negative, number) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.strip_prefix('+').unwrap_or(number)),
        };
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        let mut mantissa: i128 = 0;
        for ch in int_part.chars().chain(frac_part.chars()) {
            let digit = ch.to_digit(10).ok_or_else(err)?;
            mantissa = mantissa * 10 + digit as i128;
            if mantissa > i64::MAX as i128 {
                return Err(err());
            }
        }
        if negative {
            mantissa = -mantissa;
        }
        let exponent = exponent
            .checked_sub(frac_part.len() as i32)
            .ok_or_else(err)?;
        Ok(Decimal::new(mantissa as i64, exponent))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent == 0 {
            return write!(f, "{}", self.mantissa);
        }
        if self.exponent < 0 && self.exponent >= -18 {
            let scale = self.exponent.unsigned_abs() as usize;
            let digits = self.mantissa.unsigned_abs().to_string();
            let digits = format!("{:0>width$}", digits, width = scale + 1);
            let (int, frac) = digits.split_at(digits.len() - scale);
            let sign = if self.mantissa < 0 { "-" } else { "" };
            return write!(f, "{}{}.{}", sign, int, frac);
        }
        write!(f, "{}e{}", self.mantissa, self.exponent)
    }
}

/// A single SHV value
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Blob(Vec<u8>),
    DateTime(DateTime<FixedOffset>),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    IMap(BTreeMap<i64, Value>),
}

impl Value {
    /// Human readable name of the value kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::UInt(_) => "UInt",
            Value::Double(_) => "Double",
            Value::Decimal(_) => "Decimal",
            Value::String(_) => "String",
            Value::Blob(_) => "Blob",
            Value::DateTime(_) => "DateTime",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::IMap(_) => "IMap",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer value regardless of signedness
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v as i128),
            Value::UInt(v) => Some(*v as i128),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value that fits the signed range, unsigned values otherwise
    pub fn from_integer(value: i128) -> Value {
        match i64::try_from(value) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::UInt(value.clamp(0, u64::MAX as i128) as u64),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(_) | Value::UInt(_), Value::Int(_) | Value::UInt(_)) => {
                self.as_integer() == other.as_integer()
            }
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::IMap(a), Value::IMap(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTime(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Value::Int(v)
                } else if let Some(v) = n.as_u64() {
                    Value::UInt(v)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::UInt(v) => serializer.serialize_u64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Decimal(v) => serializer.collect_str(v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Blob(v) => {
                let mut seq = serializer.serialize_seq(Some(v.len()))?;
                for byte in v {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Value::DateTime(v) => serializer.serialize_str(&v.to_rfc3339()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::IMap(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_parse() {
        let d: Decimal = "12.50".parse().unwrap();
        assert_eq!(d.mantissa, 1250);
        assert_eq!(d.exponent, -2);

        let d: Decimal = "-3e4".parse().unwrap();
        assert_eq!(d, Decimal::new(-30000, 0));

        assert!("".parse::<Decimal>().is_err());
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("99999999999999999999".parse::<Decimal>().is_err());
    }

    #[test]
    fn test_decimal_ordering_is_exact() {
        let small: Decimal = "0.1".parse().unwrap();
        let same = Decimal::new(1000, -4);
        assert_eq!(small, same);
        assert!(Decimal::new(1, 1000) > Decimal::new(i64::MAX, 0));
        assert!(Decimal::new(-1, 1000) < Decimal::new(-5, 2));
        assert!(Decimal::new(123, -2) < Decimal::new(1231, -3));
        assert!(Decimal::new(0, 5) < Decimal::new(1, -50));
        assert_eq!(Decimal::new(0, 3), Decimal::new(0, -3));
    }

    #[test]
    fn test_decimal_display() {
        assert_eq!(Decimal::new(1250, -2).to_string(), "12.50");
        assert_eq!(Decimal::new(-5, -3).to_string(), "-0.005");
        assert_eq!(Decimal::new(7, 3).to_string(), "7e3");
        assert_eq!(Decimal::from_f64(1.5).unwrap(), Decimal::new(15, -1));
    }

    #[test]
    fn test_integer_equality_ignores_signedness() {
        assert_eq!(Value::Int(5), Value::UInt(5));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
        assert_ne!(Value::Int(1), Value::Bool(true));
    }

    #[test]
    fn test_from_json() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, 2.5, null], "b": 18446744073709551615}"#).unwrap();
        let value = Value::from(json);
        let Value::Map(fields) = &value else {
            panic!("expected map");
        };
        assert_eq!(
            fields["a"],
            Value::List(vec![Value::Int(1), Value::Double(2.5), Value::Null])
        );
        assert_eq!(fields["b"], Value::UInt(u64::MAX));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"a":[1,2.5,null],"b":18446744073709551615}"#
        );
    }
}
