use std::fmt;

use docflow_cbor::{Signature, encoded_len};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use thiserror::Error;

use crate::pointer;

/// JSON keys that carry node structure rather than named properties.
pub const TYPE_KEY: &str = "type";
pub const VALUE_KEY: &str = "value";
pub const ITEMS_KEY: &str = "items";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("number {0} is not a signed 64-bit integer")]
    UnsupportedNumber(String),
    #[error("'{key}' must be {expected}")]
    InvalidReservedKey {
        key: &'static str,
        expected: &'static str,
    },
    #[error("canonical encoding failed: {0}")]
    Encoding(String),
}

/// Scalar payload of a node. Floats are excluded so canonical bytes never depend on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl Scalar {
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Integer(_) => "integer",
            Scalar::Text(_) => "text",
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Scalar::Null => JsonValue::Null,
            Scalar::Bool(b) => JsonValue::Bool(*b),
            Scalar::Integer(i) => JsonValue::Number(Number::from(*i)),
            Scalar::Text(s) => JsonValue::String(s.clone()),
        }
    }

    fn from_json(value: &JsonValue) -> Result<Option<Self>, NodeError> {
        Ok(Some(match value {
            JsonValue::Null => Scalar::Null,
            JsonValue::Bool(b) => Scalar::Bool(*b),
            JsonValue::Number(n) => Scalar::Integer(
                n.as_i64()
                    .ok_or_else(|| NodeError::UnsupportedNumber(n.to_string()))?,
            ),
            JsonValue::String(s) => Scalar::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => return Ok(None),
        }))
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(i64::from(value))
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// Document tree element.
///
/// Equality is structural: `IndexMap` equality ignores property insertion order, while the
/// order itself is kept because contract declaration order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub type_ref: Option<String>,
    pub value: Option<Scalar>,
    pub properties: IndexMap<String, Node>,
    pub items: Option<Vec<Node>>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Node {
            value: Some(value.into()),
            ..Node::default()
        }
    }

    pub fn list(items: impl IntoIterator<Item = Node>) -> Self {
        Node {
            items: Some(items.into_iter().collect()),
            ..Node::default()
        }
    }

    pub fn typed(type_ref: impl Into<String>) -> Self {
        Node {
            type_ref: Some(type_ref.into()),
            ..Node::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Node) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_value(mut self, value: impl Into<Scalar>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn type_ref(&self) -> Option<&str> {
        self.type_ref.as_deref()
    }

    pub fn property(&self, name: &str) -> Option<&Node> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.properties.get_mut(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Node) -> Option<Node> {
        self.properties.insert(name.into(), value)
    }

    /// Removes a property, keeping the order of the remaining ones.
    pub fn remove_property(&mut self, name: &str) -> Option<Node> {
        self.properties.shift_remove(name)
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            Some(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            Some(Scalar::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            Some(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Text of a named scalar property.
    pub fn text_property(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(Node::as_text)
    }

    pub fn is_empty(&self) -> bool {
        self.type_ref.is_none()
            && self.value.is_none()
            && self.properties.is_empty()
            && self.items.is_none()
    }

    /// Looks up a descendant by pointer. Numeric segments index into items.
    pub fn get(&self, ptr: &str) -> Option<&Node> {
        let segments = pointer::segments(ptr).ok()?;
        let mut current = self;
        for segment in &segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn get_mut(&mut self, ptr: &str) -> Option<&mut Node> {
        let segments = pointer::segments(ptr).ok()?;
        let mut current = self;
        for segment in &segments {
            current = current.child_mut(segment)?;
        }
        Some(current)
    }

    pub fn child(&self, segment: &str) -> Option<&Node> {
        if let Some(items) = &self.items {
            if let Ok(index) = segment.parse::<usize>() {
                return items.get(index);
            }
        }
        self.properties.get(segment)
    }

    pub fn child_mut(&mut self, segment: &str) -> Option<&mut Node> {
        if self.items.is_some() {
            if let Ok(index) = segment.parse::<usize>() {
                return self.items.as_mut().and_then(|items| items.get_mut(index));
            }
        }
        self.properties.get_mut(segment)
    }

    /// True when every part of `pattern` is present in `self` with equal content.
    pub fn contains_structurally(&self, pattern: &Node) -> bool {
        if pattern.type_ref.is_some() && pattern.type_ref != self.type_ref {
            return false;
        }
        if pattern.value.is_some() && pattern.value != self.value {
            return false;
        }
        for (name, expected) in &pattern.properties {
            match self.properties.get(name) {
                Some(actual) if actual.contains_structurally(expected) => {}
                _ => return false,
            }
        }
        if let Some(expected_items) = &pattern.items {
            let Some(actual_items) = &self.items else {
                return false;
            };
            if expected_items.len() != actual_items.len() {
                return false;
            }
            return expected_items
                .iter()
                .zip(actual_items)
                .all(|(expected, actual)| actual.contains_structurally(expected));
        }
        true
    }

    /// Builds a node from its JSON view.
    pub fn from_json(json: &JsonValue) -> Result<Self, NodeError> {
        if let Some(scalar) = Scalar::from_json(json)? {
            return Ok(Node::scalar(scalar));
        }
        match json {
            JsonValue::Array(values) => {
                let items = values.iter().map(Node::from_json).collect::<Result<_, _>>()?;
                Ok(Node {
                    items: Some(items),
                    ..Node::default()
                })
            }
            JsonValue::Object(map) => {
                let mut node = Node::default();
                for (key, value) in map {
                    match key.as_str() {
                        TYPE_KEY => {
                            let type_ref =
                                value.as_str().ok_or(NodeError::InvalidReservedKey {
                                    key: TYPE_KEY,
                                    expected: "a string",
                                })?;
                            node.type_ref = Some(type_ref.to_owned());
                        }
                        VALUE_KEY => {
                            node.value = Some(Scalar::from_json(value)?.ok_or(
                                NodeError::InvalidReservedKey {
                                    key: VALUE_KEY,
                                    expected: "a scalar",
                                },
                            )?);
                        }
                        ITEMS_KEY => {
                            let values =
                                value.as_array().ok_or(NodeError::InvalidReservedKey {
                                    key: ITEMS_KEY,
                                    expected: "an array",
                                })?;
                            node.items = Some(
                                values
                                    .iter()
                                    .map(Node::from_json)
                                    .collect::<Result<_, _>>()?,
                            );
                        }
                        _ => {
                            node.properties.insert(key.clone(), Node::from_json(value)?);
                        }
                    }
                }
                Ok(node)
            }
            _ => unreachable!("scalars handled above"),
        }
    }

    /// Renders the JSON view. Bare value nodes become scalars and bare item lists become arrays.
    pub fn to_json(&self) -> JsonValue {
        let bare = self.type_ref.is_none() && self.properties.is_empty();
        if bare {
            match (&self.value, &self.items) {
                (Some(scalar), None) => return scalar.to_json(),
                (None, Some(items)) => {
                    return JsonValue::Array(items.iter().map(Node::to_json).collect());
                }
                _ => {}
            }
        }
        let mut map = JsonMap::new();
        if let Some(type_ref) = &self.type_ref {
            map.insert(TYPE_KEY.into(), JsonValue::String(type_ref.clone()));
        }
        if let Some(value) = &self.value {
            map.insert(VALUE_KEY.into(), value.to_json());
        }
        if let Some(items) = &self.items {
            map.insert(
                ITEMS_KEY.into(),
                JsonValue::Array(items.iter().map(Node::to_json).collect()),
            );
        }
        for (key, value) in &self.properties {
            map.insert(key.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Content hash of the canonical encoding, rendered as `sha256:<hex>`.
    pub fn signature(&self) -> Result<String, NodeError> {
        Signature::of(self)
            .map(|signature| signature.to_string())
            .map_err(|err| NodeError::Encoding(err.to_string()))
    }

    /// Size in bytes of the canonical encoding.
    pub fn canonical_size(&self) -> Result<usize, NodeError> {
        encoded_len(self).map_err(|err| NodeError::Encoding(err.to_string()))
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bare = self.type_ref.is_none() && self.properties.is_empty();
        if bare {
            match (&self.value, &self.items) {
                (Some(scalar), None) => return scalar.serialize(serializer),
                (None, Some(items)) => return items.serialize(serializer),
                _ => {}
            }
        }
        let len = self.properties.len()
            + usize::from(self.type_ref.is_some())
            + usize::from(self.value.is_some())
            + usize::from(self.items.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(type_ref) = &self.type_ref {
            map.serialize_entry(TYPE_KEY, type_ref)?;
        }
        if let Some(value) = &self.value {
            map.serialize_entry(VALUE_KEY, value)?;
        }
        if let Some(items) = &self.items {
            map.serialize_entry(ITEMS_KEY, items)?;
        }
        for (key, value) in &self.properties {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Integer(i) => serializer.serialize_i64(*i),
            Scalar::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Node::from_json(&json).map_err(D::Error::custom)
    }
}

impl TryFrom<JsonValue> for Node {
    type Error = NodeError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        Node::from_json(&value)
    }
}

impl From<&Node> for JsonValue {
    fn from(node: &Node) -> Self {
        node.to_json()
    }
}
