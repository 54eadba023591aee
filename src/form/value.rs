//! Field values and the combined values record.

use crate::hash::FastHashBuilder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of value a field holds, fixed when the field is declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// [`String`]
    Text,
    /// [`f64`]
    Number,
    /// [`bool`]
    Bool,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Bool => "bool",
        })
    }
}

/// A field value with its type erased.
///
/// Serializes as the bare JSON scalar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Checkbox-like fields
    Bool(bool),
    /// Numeric inputs
    Number(f64),
    /// Text inputs
    Text(String),
}

impl FieldValue {
    /// Kind of the held value
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Number(_) => ValueKind::Number,
            FieldValue::Text(_) => ValueKind::Text,
        }
    }

    /// The text, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The number, if this is a numeric value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The flag, if this is a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Types a field can hold.
pub trait FieldType: Clone + PartialEq + fmt::Debug + 'static {
    /// Kind tag used for type-checked lookups
    const KIND: ValueKind;

    /// Erase into a [`FieldValue`]
    fn into_value(self) -> FieldValue;

    /// Recover from a [`FieldValue`] of the matching kind
    fn from_value(value: &FieldValue) -> Option<Self>;
}

impl FieldType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn into_value(self) -> FieldValue {
        FieldValue::Text(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        value.as_text().map(str::to_owned)
    }
}

impl FieldType for f64 {
    const KIND: ValueKind = ValueKind::Number;

    fn into_value(self) -> FieldValue {
        FieldValue::Number(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        value.as_number()
    }
}

impl FieldType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn into_value(self) -> FieldValue {
        FieldValue::Bool(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        value.as_bool()
    }
}

/// Snapshot of every field's value, keyed by field key in declaration order.
///
/// This is what whole-form validators receive and what a transport layer
/// sends on `submitted`. Serializes as a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(IndexMap<String, FieldValue, FastHashBuilder>);

impl Values {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value for `key`, keeping its position if already present
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for `key`
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Value for `key`, if it has type `T`
    pub fn get_as<T: FieldType>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(T::from_value)
    }

    /// Text value for `key`
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    /// Numeric value for `key`
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_number)
    }

    /// Boolean value for `key`
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(FieldValue::as_bool)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-field form
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for Values
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = Values::new();
        for (key, value) in iter {
            values.insert(key, value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_serialize_as_plain_object_in_declaration_order() {
        let values: Values = [
            ("email", FieldValue::from("jane@example.com")),
            ("age", FieldValue::from(31.0)),
            ("terms", FieldValue::from(true)),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"email":"jane@example.com","age":31.0,"terms":true}"#);

        let back: Values = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn typed_getters_check_kind() {
        let mut values = Values::new();
        values.insert("age", 31.0);
        values.insert("name", "Jane");

        assert_eq!(values.number("age"), Some(31.0));
        assert_eq!(values.text("age"), None);
        assert_eq!(values.get_as::<String>("name").as_deref(), Some("Jane"));
        assert_eq!(values.get_as::<bool>("name"), None);
        assert_eq!(values.get("missing"), None);
    }
}
