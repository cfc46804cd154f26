//! Contains the values and records which flow through the query pipeline.
//!
//! Each input turns its raw data into [Records](Record), which are ordered maps from property
//! names to [Values](Value). Values are produced by the [parsers](crate::parsers) and finally
//! encoded as JSON when a response is written.
//!
//! # Example
//! ```
//! # use rods::record::{Record, Value};
//! let mut record = Record::new();
//! record.insert("id", Value::Integer(1));
//! record.insert("name", Value::from("Alice"));
//!
//! assert_eq!(record.property("id"), Some(&Value::Integer(1)));
//! assert_eq!(
//!     serde_json::to_string(&record).unwrap(),
//!     r#"{"id":1,"name":"Alice"}"#
//! );
//! ```
use linked_hash_map::LinkedHashMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};

/// Represents the location of a record within its input.
///
/// For CSV and XML inputs this is the byte offset of the row or element, for JSON inputs it is
/// the index of the element within the top-level array. Positions of a single input are totally
/// ordered and only valid for the input which emitted them.
pub type Position = u64;

/// Represents a parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Represents an absent or empty value.
    Null,
    /// Represents a string.
    String(String),
    /// Represents a signed 64 bit integer.
    Integer(i64),
    /// Represents a 64 bit floating point number.
    Float(f64),
    /// Represents a boolean.
    Boolean(bool),
    /// Represents an ordered sequence of values.
    List(Vec<Value>),
    /// Represents a nested object.
    Map(LinkedHashMap<String, Value>),
}

impl Value {
    /// Returns the name of the kind of this value, as used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Determines if this is [Value::Null].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string if this is a [Value::String].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the integer if this is a [Value::Integer].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the canonical text of a scalar value which is used as key by all indexes.
    ///
    /// Comparing keys instead of values permits to match an integer parameter against a column
    /// which is parsed as string (and vice versa). Null values, lists and maps have no key.
    ///
    /// # Example
    /// ```
    /// # use rods::record::Value;
    /// assert_eq!(Value::Integer(42).filter_key().unwrap(), "42");
    /// assert_eq!(Value::from("42").filter_key().unwrap(), "42");
    /// assert_eq!(Value::Null.filter_key(), None);
    /// ```
    pub fn filter_key(&self) -> Option<Cow<str>> {
        match self {
            Value::String(value) => Some(Cow::Borrowed(value.as_str())),
            Value::Integer(value) => Some(Cow::Owned(value.to_string())),
            Value::Float(value) => Some(Cow::Owned(value.to_string())),
            Value::Boolean(value) => Some(Cow::Borrowed(if *value { "true" } else { "false" })),
            _ => None,
        }
    }

    /// Invokes the callback for each key provided by this value.
    ///
    /// A scalar provides its own key, a list provides the keys of all of its scalar elements.
    pub fn for_each_key<C>(&self, mut callback: C)
    where
        C: FnMut(&str),
    {
        match self {
            Value::List(items) => {
                for item in items {
                    if let Some(key) = item.filter_key() {
                        callback(key.as_ref());
                    }
                }
            }
            _ => {
                if let Some(key) = self.filter_key() {
                    callback(key.as_ref());
                }
            }
        }
    }

    /// Determines if this value satisfies a filter for the given expected value.
    pub fn matches(&self, expected: &Value) -> bool {
        let expected = match expected.filter_key() {
            Some(key) => key,
            None => return false,
        };

        let mut matching = false;
        self.for_each_key(|key| matching |= key == expected.as_ref());
        matching
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<serde_json::Value> for Value {
    /// Transforms a generic JSON value into a value.
    ///
    /// Numbers which fit into an `i64` become integers, all others become floats.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Boolean(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Integer(value),
                None => number.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(value) => Value::String(value),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(value) => write!(f, "{}", value),
            Value::Integer(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::Boolean(value) => write!(f, "{}", value),
            _ => write!(
                f,
                "{}",
                serde_json::to_string(self).map_err(|_| std::fmt::Error)?
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::String(value) => serializer.serialize_str(value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Float(value) => serializer.serialize_f64(*value),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => serialize_entries(entries, serializer),
        }
    }
}

fn serialize_entries<S>(entries: &LinkedHashMap<String, Value>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Represents a single row or entry of an input.
///
/// The properties keep their insertion order, which is the declaration order of the input's
/// schema (or the key order of a JSON object). Relationships are appended as additional
/// properties once they have been resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    properties: LinkedHashMap<String, Value>,
}

impl Record {
    /// Creates a new and empty record.
    pub fn new() -> Self {
        Record::default()
    }

    /// Returns the value of the given property or `None` if the property is missing.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Provides access to all properties of this record.
    pub fn all(&self) -> &LinkedHashMap<String, Value> {
        &self.properties
    }

    /// Sets the given property. An existing value is replaced in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(existing) = self.properties.get_mut(&name) {
            *existing = value;
        } else {
            let _ = self.properties.insert(name, value);
        }
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Determines if this record has no properties at all.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Converts this record into a nested [Value::Map].
    pub fn into_value(self) -> Value {
        Value::Map(self.properties)
    }
}

impl From<LinkedHashMap<String, Value>> for Record {
    fn from(properties: LinkedHashMap<String, Value>) -> Self {
        Record { properties }
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize_entries(&self.properties, serializer)
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{Record, Value};

    #[test]
    fn records_keep_their_property_order() {
        let mut record = Record::new();
        record.insert("z", Value::from("last"));
        record.insert("a", Value::Integer(1));
        record.insert("z", Value::from("replaced"));

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"z":"replaced","a":1}"#
        );
    }

    #[test]
    fn nested_values_are_serialized() {
        let mut inner = Record::new();
        inner.insert("flag", Value::Boolean(true));
        let mut record = Record::new();
        record.insert("list", Value::List(vec![Value::Integer(1), Value::Null]));
        record.insert("inner", inner.into_value());
        record.insert("float", Value::Float(1.5));

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"list":[1,null],"inner":{"flag":true},"float":1.5}"#
        );
    }

    #[test]
    fn matching_uses_canonical_keys() {
        assert!(Value::from("2").matches(&Value::Integer(2)));
        assert!(Value::Integer(2).matches(&Value::from("2")));
        assert!(Value::List(vec![Value::from("a"), Value::from("b")]).matches(&Value::from("b")));
        assert!(!Value::Null.matches(&Value::Null));
        assert!(!Value::from("x").matches(&Value::Null));
        assert!(Value::Boolean(false).matches(&Value::from("false")));
    }

    #[test]
    fn json_values_are_converted() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": [true, null], "d": {"e": "x"}}"#)
                .unwrap();
        let value = Value::from(json);
        if let Value::Map(entries) = value {
            assert_eq!(entries["a"], Value::Integer(1));
            assert_eq!(entries["b"], Value::Float(1.5));
            assert_eq!(
                entries["c"],
                Value::List(vec![Value::Boolean(true), Value::Null])
            );
            assert_eq!(entries["d"].kind(), "map");
        } else {
            panic!("Expected a map");
        }
    }
}
