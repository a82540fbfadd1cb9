use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Hashable projection of a value used as a dict key.
///
/// Numbers that compare equal hash equal (`True`, `1` and `1.0` are one key).
/// Objects without value semantics hash by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(Rc<str>),
    Tuple(Box<[HashKey]>),
    Identity(usize),
}

impl HashKey {
    /// Projects a value onto its key, failing for mutable containers.
    pub fn from_value(value: &Value) -> RunResult<Self> {
        Ok(match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Int(i64::from(*b)),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => Self::Str(s.clone()),
            Value::Tuple(items) => Self::Tuple(items.iter().map(Self::from_value).collect::<RunResult<_>>()?),
            Value::List(_) | Value::Dict(_) => return Err(ExcType::type_error_unhashable(&value.py_type_name())),
            other => Self::Identity(other.identity()),
        })
    }
}

#[expect(clippy::cast_possible_truncation, reason = "guarded by the range and fract checks")]
fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f >= -9.223_372_036_854_776e18 && f < 9.223_372_036_854_776e18 {
        HashKey::Int(f as i64)
    } else {
        HashKey::Float(f.to_bits())
    }
}

/// Insertion-ordered mapping; each entry keeps the original key value.
#[derive(Debug, Clone, Default)]
pub struct Dict(IndexMap<HashKey, (Value, Value), ahash::RandomState>);

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &Value) -> RunResult<Option<Value>> {
        let hash_key = HashKey::from_value(key)?;
        Ok(self.0.get(&hash_key).map(|(_, v)| v.clone()))
    }

    pub fn contains(&self, key: &Value) -> RunResult<bool> {
        Ok(self.0.contains_key(&HashKey::from_value(key)?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> RunResult<()> {
        let hash_key = HashKey::from_value(&key)?;
        match self.0.get_mut(&hash_key) {
            // an existing entry keeps its original key object
            Some(entry) => entry.1 = value,
            None => {
                self.0.insert(hash_key, (key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        let hash_key = HashKey::from_value(key)?;
        Ok(self.0.shift_remove(&hash_key).map(|(_, v)| v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.0.values().map(|(k, _)| k)
    }

    pub fn items(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.0.values().map(|(k, v)| (k, v))
    }
}
