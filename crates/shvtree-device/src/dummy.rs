//! Dummy device answering every method with a random value of its result type
//!
//! Useful to explore a tree before there is a real implementation. A few well
//! known nodes get a more plausible answer than noise: `serialNumber`,
//! `status`, `utcTime` and `localTime`.

use chrono::{DateTime, FixedOffset, Local, Utc};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shvtree_core::{Decimal, Tree, Type, TypeRegistry, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::context::CallContext;
use crate::device::Device;
use crate::handler::{HandlerError, RegistrationError};

/// Deepest type nesting values are generated for
const MAX_DEPTH: usize = 16;

/// Serial number reported when the result type allows it
const SERIAL_NUMBER: i64 = 0xFF42;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("can't generate a value of '{0}' matching its pattern")]
    Pattern(String),

    #[error("types nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("type '{0}' has no valid value")]
    Unsatisfiable(String),
}

/// Tighter of an inclusive and an exclusive bound, and whether it is exclusive
fn tighter(
    inclusive: Option<f64>,
    exclusive: Option<f64>,
    beyond: fn(f64, f64) -> bool,
) -> (Option<f64>, bool) {
    match (inclusive, exclusive) {
        (Some(i), Some(e)) if !beyond(i, e) => (Some(e), true),
        (Some(i), _) => (Some(i), false),
        (None, e) => (e, e.is_some()),
    }
}

impl From<GenerateError> for HandlerError {
    fn from(err: GenerateError) -> Self {
        HandlerError::Failed(err.to_string())
    }
}

/// Random values of registered types
pub struct Generator<'a, R: Rng> {
    registry: &'a TypeRegistry,
    rng: &'a mut R,
}

impl<'a, R: Rng> Generator<'a, R> {
    pub fn new(registry: &'a TypeRegistry, rng: &'a mut R) -> Self {
        Self { registry, rng }
    }

    /// Random value valid for the type registered as `name`
    pub fn generate(&mut self, name: &str) -> Result<Value, GenerateError> {
        self.value(name, 0)
    }

    fn value(&mut self, name: &str, depth: usize) -> Result<Value, GenerateError> {
        if depth > MAX_DEPTH {
            return Err(GenerateError::TooDeep(MAX_DEPTH));
        }
        let ty = self
            .registry
            .get(name)
            .ok_or_else(|| GenerateError::UnknownType(name.to_string()))?;
        let depth = depth + 1;
        let res = match ty {
            Type::Any | Type::Null => Value::Null,
            Type::Bool => Value::Bool(self.rng.gen()),
            Type::Int(int) => {
                let v = self.integer(name, int.minimum, int.maximum, int.multiple_of, int.unsigned)?;
                if int.unsigned {
                    Value::UInt(v.clamp(0, u64::MAX as i128) as u64)
                } else {
                    Value::from_integer(v)
                }
            }
            Type::Double(double) => {
                let (lo, lo_open) = tighter(double.minimum, double.exclusive_minimum, |a, b| a > b);
                let (hi, hi_open) = tighter(double.maximum, double.exclusive_maximum, |a, b| a < b);
                let lo = lo.unwrap_or_else(|| hi.map_or(-100.0, |hi| hi.min(0.0) - 100.0));
                let hi = hi.unwrap_or(lo.max(0.0) + 100.0);
                if let Some(m) = double.multiple_of.filter(|m| *m > 0.0) {
                    let mut first = (lo / m).ceil() as i64;
                    if lo_open && first as f64 * m <= lo {
                        first += 1;
                    }
                    let mut last = (hi / m).floor() as i64;
                    if hi_open && last as f64 * m >= hi {
                        last -= 1;
                    }
                    if first > last {
                        return Err(GenerateError::Unsatisfiable(name.to_string()));
                    }
                    Value::Double(self.rng.gen_range(first..=last) as f64 * m)
                } else if lo < hi {
                    let v = self.rng.gen_range(lo..hi);
                    Value::Double(if lo_open && v <= lo { (lo + hi) / 2.0 } else { v })
                } else if lo == hi && !lo_open && !hi_open {
                    Value::Double(lo)
                } else {
                    return Err(GenerateError::Unsatisfiable(name.to_string()));
                }
            }
            Type::Decimal(decimal) => {
                let v = Decimal::new(self.rng.gen_range(-10_000..=10_000), -2);
                let v = match (decimal.minimum, decimal.maximum) {
                    (Some(min), _) if v < min => min,
                    (_, Some(max)) if v > max => max,
                    _ => v,
                };
                Value::Decimal(v)
            }
            Type::String(string) => {
                if string.pattern.is_some() {
                    return Err(GenerateError::Pattern(name.to_string()));
                }
                let len = self.length(string.min_length, string.max_length);
                let text = (0..len)
                    .map(|_| LETTERS[self.rng.gen_range(0..LETTERS.len())] as char)
                    .collect();
                Value::String(text)
            }
            Type::Blob(blob) => {
                let len = self.length(blob.min_length, blob.max_length);
                Value::Blob((0..len).map(|_| self.rng.gen()).collect())
            }
            Type::DateTime => Value::DateTime(Utc::now().into()),
            Type::Enum(enm) => {
                let values: Vec<i64> = enm.values.values().copied().collect();
                let v = values
                    .choose(&mut *self.rng)
                    .ok_or_else(|| GenerateError::Unsatisfiable(name.to_string()))?;
                Value::from(*v)
            }
            Type::Bitfield(bitfield) => {
                let mut bits = 0u64;
                for field in &bitfield.fields {
                    let raw = match self.value(&field.type_name, depth)? {
                        Value::Bool(b) => b as u64,
                        Value::Int(v) => v as u64,
                        Value::UInt(v) => v,
                        _ => 0,
                    };
                    let mask = if field.width >= 64 { u64::MAX } else { (1u64 << field.width) - 1 };
                    bits |= (raw & mask) << field.offset;
                }
                Value::UInt(bits)
            }
            Type::List(list) => {
                let items = (0..list.min_length)
                    .map(|_| match &list.allowed {
                        Some(allowed) => self.value(allowed, depth),
                        None => Ok(Value::Null),
                    })
                    .collect::<Result<_, _>>()?;
                Value::List(items)
            }
            Type::Tuple(tuple) => Value::List(
                tuple
                    .items
                    .iter()
                    .map(|item| self.value(item, depth))
                    .collect::<Result<_, _>>()?,
            ),
            Type::Map(map) => {
                let mut res = IndexMap::new();
                for (key, field) in map.fields.iter().flatten() {
                    res.insert(key.clone(), self.value(field, depth)?);
                }
                Value::Map(res)
            }
            Type::IMap(imap) => {
                let mut res = BTreeMap::new();
                for (key, field) in imap.fields.iter().flatten() {
                    res.insert(*key, self.value(field, depth)?);
                }
                Value::IMap(res)
            }
            Type::Alias(target) => self.value(target, depth)?,
            Type::Union(members) => {
                let mut order: Vec<&String> = members.iter().collect();
                order.shuffle(&mut *self.rng);
                let mut last = GenerateError::Unsatisfiable(name.to_string());
                for member in order {
                    match self.value(member, depth) {
                        Ok(v) => return Ok(v),
                        Err(err) => last = err,
                    }
                }
                return Err(last);
            }
            Type::Constant(value) => value.clone(),
        };
        Ok(res)
    }

    fn integer(
        &mut self,
        name: &str,
        minimum: Option<i128>,
        maximum: Option<i128>,
        multiple_of: Option<i128>,
        unsigned: bool,
    ) -> Result<i128, GenerateError> {
        let mut lo = minimum.unwrap_or(if unsigned { 0 } else { -100 });
        let mut hi = maximum.unwrap_or(100);
        if maximum.is_none() && hi < lo {
            hi = lo.saturating_add(100);
        }
        if minimum.is_none() && lo > hi {
            lo = if unsigned { 0 } else { hi.saturating_sub(100) };
        }
        if lo > hi {
            return Err(GenerateError::Unsatisfiable(name.to_string()));
        }
        match multiple_of.filter(|m| *m > 0) {
            Some(m) => {
                let first = lo.div_euclid(m) + i128::from(lo.rem_euclid(m) != 0);
                let last = hi.div_euclid(m);
                if first > last {
                    return Err(GenerateError::Unsatisfiable(name.to_string()));
                }
                Ok(self.rng.gen_range(first..=last) * m)
            }
            None => Ok(self.rng.gen_range(lo..=hi)),
        }
    }

    fn length(&mut self, min_length: Option<usize>, max_length: Option<usize>) -> usize {
        let min = min_length.unwrap_or(0);
        let max = max_length.unwrap_or(min + 16).max(min);
        self.rng.gen_range(min..=max)
    }
}

struct DummyState {
    rng: Mutex<StdRng>,
    /// Difference of the device time from the system time
    time_offset: Mutex<chrono::Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DummyState {
    fn generate(&self, registry: &TypeRegistry, name: &str) -> Result<Value, GenerateError> {
        let mut rng = lock(&self.rng);
        Generator::new(registry, &mut *rng).generate(name)
    }

    fn offset(&self) -> chrono::Duration {
        *lock(&self.time_offset)
    }
}

/// Parameter and result type names of the called method
fn signature(ctx: &CallContext) -> Result<(String, String), HandlerError> {
    let method = ctx
        .method()
        .ok_or_else(|| HandlerError::Failed("method not available".to_string()))?;
    Ok((method.param.clone(), method.result.clone()))
}

fn is_datetime(registry: &TypeRegistry, name: &str) -> bool {
    matches!(registry.resolve(name), Ok(Type::DateTime))
}

async fn any_method(state: Arc<DummyState>, ctx: CallContext) -> Result<Value, HandlerError> {
    let (_, result) = signature(&ctx)?;
    Ok(state.generate(ctx.registry(), &result)?)
}

async fn serial_number(state: Arc<DummyState>, ctx: CallContext) -> Result<Value, HandlerError> {
    let (_, result) = signature(&ctx)?;
    let serial = Value::Int(SERIAL_NUMBER);
    if ctx.registry().is_valid(&result, &serial) {
        return Ok(serial);
    }
    Ok(state.generate(ctx.registry(), &result)?)
}

async fn status(state: Arc<DummyState>, ctx: CallContext) -> Result<Value, HandlerError> {
    let (_, result) = signature(&ctx)?;
    if let Ok(Type::Enum(enm)) = ctx.registry().resolve(&result) {
        if let Some(ok) = enm.value("ok") {
            return Ok(Value::from(ok));
        }
    }
    Ok(state.generate(ctx.registry(), &result)?)
}

async fn utc_time(state: Arc<DummyState>, ctx: CallContext) -> Result<Value, HandlerError> {
    let (_, result) = signature(&ctx)?;
    if is_datetime(ctx.registry(), &result) {
        let now: DateTime<FixedOffset> = (Utc::now() + state.offset()).into();
        return Ok(Value::DateTime(now));
    }
    Ok(state.generate(ctx.registry(), &result)?)
}

async fn set_utc_time(state: Arc<DummyState>, mut ctx: CallContext) -> Result<Value, HandlerError> {
    let (param, result) = signature(&ctx)?;
    if is_datetime(ctx.registry(), &param) {
        if let Some(Value::DateTime(time)) = ctx.take_param() {
            if time.offset().local_minus_utc() != 0 {
                return Err(HandlerError::InvalidParam("DateTime must be in UTC".to_string()));
            }
            let offset = time.with_timezone(&Utc) - Utc::now();
            *lock(&state.time_offset) = offset;
            debug!(offset = %offset, "Dummy time offset set");
        }
    }
    Ok(state.generate(ctx.registry(), &result)?)
}

async fn local_time(state: Arc<DummyState>, ctx: CallContext) -> Result<Value, HandlerError> {
    let (_, result) = signature(&ctx)?;
    if is_datetime(ctx.registry(), &result) {
        let now: DateTime<FixedOffset> = (Local::now() + state.offset()).into();
        return Ok(Value::DateTime(now));
    }
    Ok(state.generate(ctx.registry(), &result)?)
}

/// Device for `tree` answering every call with a dummy value
///
/// A `seed` makes the generated values reproducible.
pub fn dummy_device(tree: Tree, seed: Option<u64>) -> Result<Device, RegistrationError> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let state = Arc::new(DummyState {
        rng: Mutex::new(rng),
        time_offset: Mutex::new(chrono::Duration::zero()),
    });
    let mut device = Device::new(tree);

    let st = Arc::clone(&state);
    device.set_default_handler(&["method"], move |ctx| any_method(Arc::clone(&st), ctx))?;

    let handlers = device.handlers_mut();
    let st = Arc::clone(&state);
    handlers.register("_serialNumber_get", &["method"], move |ctx| {
        serial_number(Arc::clone(&st), ctx)
    })?;
    let st = Arc::clone(&state);
    handlers.register("_status_get", &["method"], move |ctx| status(Arc::clone(&st), ctx))?;
    let st = Arc::clone(&state);
    handlers.register("_utcTime_get", &["method"], move |ctx| utc_time(Arc::clone(&st), ctx))?;
    let st = Arc::clone(&state);
    handlers.register("_utcTime_set", &["method", "param"], move |ctx| {
        set_utc_time(Arc::clone(&st), ctx)
    })?;
    let st = Arc::clone(&state);
    handlers.register("_localTime_get", &["method"], move |ctx| {
        local_time(Arc::clone(&st), ctx)
    })?;

    debug!(handlers = device.handlers().len(), "Dummy device ready");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CallRequest, DispatchError};
    use shvtree_core::{AccessLevel, Document};

    const DOCUMENT: &str = r#"
types:
  status:
    type: Enum
    values: [unknown, ok, error]
  even:
    type: Int
    minimum: 1
    maximum: 9
    multipleOf: 2
  name:
    type: String
    minLength: 2
    maxLength: 5
  hex:
    type: String
    pattern: "[0-9a-f]+"
  quarter:
    type: Double
    minimum: 0
    maximum: 2
    multipleOf: 0.25
  deep:
    type: Double
    maximum: -200
  half:
    type: Double
    exclusiveMinimum: 0
    exclusiveMaximum: 1
    multipleOf: 0.5
  open:
    type: Double
    exclusiveMinimum: 3
    exclusiveMaximum: 4
  narrow:
    type: Double
    exclusiveMinimum: 0
    exclusiveMaximum: 1
    multipleOf: 1
  flags:
    type: Bitfield
    types: [Bool, status, Bool]
  record:
    type: Map
    fields:
      name: name
      values:
        type: List
        allowed: even
        minlen: 3
        maxlen: 5
      tag: [Null, Int8]
  pair:
    type: Tuple
    items: [Int8, Bool]
  slots:
    type: IMap
    fields: [name, Blob]
  price:
    type: Decimal
    minimum: 0
    maximum: 5
nodes:
  serialNumber:
    property: UInt32
    readonly: true
  status:
    property: status
    readonly: true
  utcTime:
    property: DateTime
  localTime:
    property: DateTime
    readonly: true
  data:
    methods:
      record:
        result: record
      pair:
        result: pair
      slots:
        result: slots
      flags:
        result: flags
      quarter:
        result: quarter
      price:
        result: price
      hex:
        result: hex
"#;

    fn tree() -> Tree {
        Tree::from_document(&Document::from_yaml(DOCUMENT).unwrap()).unwrap()
    }

    fn registry() -> TypeRegistry {
        tree().registry().clone()
    }

    #[test]
    fn test_generated_values_are_valid() {
        let registry = registry();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            for name in ["status", "even", "name", "quarter", "flags", "record", "pair", "slots", "price", "UInt8", "Int64", "OptionalString", "deep", "half", "open"] {
                let value = Generator::new(&registry, &mut rng).generate(name).unwrap();
                assert!(registry.is_valid(name, &value), "{name}: {value:?}");
            }
        }
    }

    #[test]
    fn test_double_bounds_respected() {
        let registry = registry();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let Value::Double(v) = Generator::new(&registry, &mut rng).generate("deep").unwrap() else {
                panic!("deep must be a double");
            };
            assert!((-300.0..=-200.0).contains(&v), "{v}");
            assert_eq!(
                Generator::new(&registry, &mut rng).generate("half").unwrap(),
                Value::Double(0.5)
            );
        }
        assert_eq!(
            Generator::new(&registry, &mut rng).generate("narrow").unwrap_err(),
            GenerateError::Unsatisfiable("narrow".to_string())
        );
    }

    #[test]
    fn test_list_has_minimal_length() {
        let registry = registry();
        let mut rng = StdRng::seed_from_u64(1);
        let Value::Map(record) = Generator::new(&registry, &mut rng).generate("record").unwrap() else {
            panic!("record must be a map");
        };
        let Some(Value::List(values)) = record.get("values") else {
            panic!("values must be a list");
        };
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_pattern_unsupported() {
        let registry = registry();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            Generator::new(&registry, &mut rng).generate("hex").unwrap_err(),
            GenerateError::Pattern("hex".to_string())
        );
    }

    #[test]
    fn test_seed_reproducible() {
        let registry = registry();
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        assert_eq!(
            Generator::new(&registry, &mut first).generate("record").unwrap(),
            Generator::new(&registry, &mut second).generate("record").unwrap()
        );
    }

    #[tokio::test]
    async fn test_preset_handlers() {
        let device = dummy_device(tree(), Some(3)).unwrap();
        let read = |path: &str| CallRequest::new(path, "get").with_access(AccessLevel::Read);
        assert_eq!(device.call(read("serialNumber")).await.unwrap(), Value::UInt(0xFF42));
        assert_eq!(device.call(read("status")).await.unwrap(), Value::UInt(1));
        assert!(matches!(
            device.call(read("localTime")).await.unwrap(),
            Value::DateTime(_)
        ));
    }

    #[tokio::test]
    async fn test_utc_time_offset() {
        let device = dummy_device(tree(), None).unwrap();
        let future: DateTime<FixedOffset> = (Utc::now() + chrono::Duration::days(365)).into();
        device
            .call(
                CallRequest::new("utcTime", "set")
                    .with_param(future)
                    .with_access(AccessLevel::Write),
            )
            .await
            .unwrap();
        let Value::DateTime(now) = device
            .call(CallRequest::new("utcTime", "get").with_access(AccessLevel::Read))
            .await
            .unwrap()
        else {
            panic!("utcTime must be a DateTime");
        };
        assert!(now > (Utc::now() + chrono::Duration::days(364)).fixed_offset());

        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = Utc::now().with_timezone(&offset);
        let err = device
            .call(
                CallRequest::new("utcTime", "set")
                    .with_param(local)
                    .with_access(AccessLevel::Write),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler(HandlerError::InvalidParam(_))));
    }

    #[tokio::test]
    async fn test_default_handler_answers_everything() {
        let device = dummy_device(tree(), Some(11)).unwrap();
        for method in ["record", "pair", "slots", "flags", "quarter", "price"] {
            device
                .call(CallRequest::new("data", method))
                .await
                .unwrap();
        }
        assert!(matches!(
            device.call(CallRequest::new("data", "hex")).await.unwrap_err(),
            DispatchError::Handler(HandlerError::Failed(_))
        ));
    }
}
