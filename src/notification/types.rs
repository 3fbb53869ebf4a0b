use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{keys, NotificationKind};

/// Default address management notifications are published to.
pub const MANAGEMENT_NOTIFICATION_ADDRESS: &str = "embermq.notifications";

/// Typed attribute value carried in a notification record or message header.
///
/// `Null` marks a required attribute the event source failed to supply; it is
/// emitted rather than failing the triggering operation, and selector
/// comparisons against it evaluate to false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// Ordered attribute map shared by notification records and message headers.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Immutable record describing one broker lifecycle or delivery event.
///
/// Created once per event by [`NotificationBuilder`](super::NotificationBuilder),
/// consumed by the dispatcher, never persisted. The `_NOTIF_TIMESTAMP`
/// attribute always equals `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub kind: NotificationKind,
    /// Wall-clock millis at construction
    pub created_at: i64,
    pub attributes: AttrMap,
}

impl NotificationRecord {
    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    /// The `_NOTIF_TIMESTAMP` attribute as stamped by the builder.
    pub fn notification_timestamp(&self) -> Option<i64> {
        self.attributes
            .get(keys::NOTIFICATION_TIMESTAMP)
            .and_then(AttrValue::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_value_accessors() {
        assert_eq!(AttrValue::from("q1").as_str(), Some("q1"));
        assert_eq!(AttrValue::from(42i64).as_i64(), Some(42));
        assert_eq!(AttrValue::from(true).as_bool(), Some(true));
        assert!(AttrValue::Null.is_null());
        assert_eq!(AttrValue::from("q1").as_i64(), None);
    }

    #[test]
    fn test_attr_value_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&AttrValue::Str("a".into())).unwrap(),
            "\"a\""
        );
        assert_eq!(serde_json::to_string(&AttrValue::Int(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&AttrValue::Null).unwrap(), "null");
    }
}
