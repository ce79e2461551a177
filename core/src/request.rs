//! Incoming decision requests and their raw scalar inputs.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single raw input value. Only scalars are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    /// Explicit `null`, treated like an absent field.
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// Integral number.
    Integer(i64),
    /// Non-integral number.
    Float(f64),
    /// Free text, also used for comma-separated lists.
    Text(String),
}

impl InputValue {
    /// Encodes the value for the `decision_inputs.input_value` column.
    ///
    /// JSON keeps the scalar's type, so `3` and `"3"` stay distinguishable
    /// when a record is read back. `None` for NaN and infinities, which JSON
    /// cannot hold.
    pub fn to_column(&self) -> Option<String> {
        if !self.is_finite() {
            return None;
        }
        serde_json::to_string(self).ok()
    }

    /// `false` only for a NaN or infinite float.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    /// Inverse of [`InputValue::to_column`].
    pub fn from_column(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for InputValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Raw inputs of a request, in the order they were received.
///
/// Keys are unique. Order only matters for audit display; feature
/// extraction looks keys up by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    entries: Vec<(String, InputValue)>,
}

impl Inputs {
    /// Creates an empty input set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<InputValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`Inputs::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Looks up a value; `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .filter(|v| !matches!(v, InputValue::Null))
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First key holding a NaN or infinite float, if any.
    pub fn first_non_finite(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(k, _)| k.as_str())
    }

    /// Number of entries, nulls included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Inputs
where
    K: Into<String>,
    V: Into<InputValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut inputs = Self::new();
        for (k, v) in iter {
            inputs.insert(k, v);
        }
        inputs
    }
}

impl Serialize for Inputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct InputsVisitor;

impl<'de> Visitor<'de> for InputsVisitor {
    type Value = Inputs;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of string keys to scalar values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Inputs, A::Error> {
        let mut entries: Vec<(String, InputValue)> =
            Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, InputValue>()? {
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(de::Error::custom(format!("duplicate input key `{key}`")));
            }
            entries.push((key, value));
        }
        Ok(Inputs { entries })
    }
}

impl<'de> Deserialize<'de> for Inputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(InputsVisitor)
    }
}

/// One request to be decided. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Tag selecting the feature schema and policy cascade.
    pub decision_type: String,
    /// Raw inputs.
    #[serde(default)]
    pub inputs: Inputs,
}

impl DecisionRequest {
    /// Creates a request.
    pub fn new(decision_type: impl Into<String>, inputs: Inputs) -> Self {
        Self {
            decision_type: decision_type.into(),
            inputs,
        }
    }
}
