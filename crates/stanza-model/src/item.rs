//! Source items: the content units the engine compiles.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a source item: a unique path-like key such as `/donkey.md`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An attribute value attached to an item.
///
/// Attribute maps come from the site loader (front matter and friends);
/// the engine only ever hashes and passes them through to filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl AttributeValue {
    /// String form used by filters when interpolating attribute values.
    pub fn to_display_string(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Integer(n) => n.to_string(),
            AttributeValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

/// A content unit with identifier, raw content, and attributes.
///
/// Immutable once loaded for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub content: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_value_parses_untagged() {
        let raw = r#"{"title":"Donkey","order":3,"draft":false}"#;
        let attrs: BTreeMap<String, AttributeValue> = serde_json::from_str(raw).unwrap();
        assert_eq!(attrs["title"], AttributeValue::String("Donkey".into()));
        assert_eq!(attrs["order"], AttributeValue::Integer(3));
        assert_eq!(attrs["draft"], AttributeValue::Bool(false));
    }

    #[test]
    fn item_id_is_transparent_in_json() {
        let id = ItemId::new("/donkey.md");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"/donkey.md\"");
    }
}
