use chrono::Utc;

use crate::schema::{keys, NotificationKind};

use super::types::{AttrMap, AttrValue, NotificationRecord};

/// Builder assembling a [`NotificationRecord`] from a raw event plus
/// contextual metadata.
///
/// `build` stamps the record with the current wall clock and mirrors it into
/// the `_NOTIF_TIMESTAMP` attribute, so the two are always equal. Construction
/// never fails: in debug builds a required attribute left unset trips an
/// assertion, in release it is emitted as a null marker and the triggering
/// broker operation proceeds untouched.
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    kind: NotificationKind,
    attributes: AttrMap,
}

impl NotificationBuilder {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            attributes: AttrMap::new(),
        }
    }

    pub fn address(self, address: impl Into<String>) -> Self {
        self.attr(keys::ADDRESS, AttrValue::Str(address.into()))
    }

    pub fn routing_name(self, name: impl Into<String>) -> Self {
        self.attr(keys::ROUTING_NAME, AttrValue::Str(name.into()))
    }

    pub fn routing_type(self, wire_value: i64) -> Self {
        self.attr(keys::ROUTING_TYPE, AttrValue::Int(wire_value))
    }

    pub fn consumer_count(self, count: i64) -> Self {
        self.attr(keys::CONSUMER_COUNT, AttrValue::Int(count))
    }

    pub fn consumer_name(self, name: impl Into<String>) -> Self {
        self.attr(keys::CONSUMER_NAME, AttrValue::Str(name.into()))
    }

    pub fn user(self, user: impl Into<String>) -> Self {
        self.attr(keys::USER, AttrValue::Str(user.into()))
    }

    /// Identity established by the security layer; absent when the connection
    /// was not authenticated beyond its declared user.
    pub fn validated_user(self, user: Option<String>) -> Self {
        match user {
            Some(u) => self.attr(keys::VALIDATED_USER, AttrValue::Str(u)),
            None => self,
        }
    }

    pub fn remote_address(self, addr: impl Into<String>) -> Self {
        self.attr(keys::REMOTE_ADDRESS, AttrValue::Str(addr.into()))
    }

    pub fn session_name(self, name: impl Into<String>) -> Self {
        self.attr(keys::SESSION_NAME, AttrValue::Str(name.into()))
    }

    pub fn cert_subject_dn(self, dn: impl Into<String>) -> Self {
        self.attr(keys::CERT_SUBJECT_DN, AttrValue::Str(dn.into()))
    }

    pub fn connection_name(self, name: impl Into<String>) -> Self {
        self.attr(keys::CONNECTION_NAME, AttrValue::Str(name.into()))
    }

    pub fn message_id(self, id: i64) -> Self {
        self.attr(keys::MESSAGE_ID, AttrValue::Int(id))
    }

    /// Set an arbitrary attribute.
    pub fn attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Build the record, stamped with the current time.
    pub fn build(mut self) -> NotificationRecord {
        let created_at = Utc::now().timestamp_millis();

        self.attributes.insert(
            keys::NOTIFICATION_TYPE.to_string(),
            AttrValue::Str(self.kind.as_str().to_string()),
        );
        self.attributes.insert(
            keys::NOTIFICATION_TIMESTAMP.to_string(),
            AttrValue::Int(created_at),
        );

        for (key, _) in self.kind.required_attributes() {
            if !self.attributes.contains_key(*key) {
                debug_assert!(
                    false,
                    "{} notification built without required attribute {}",
                    self.kind, key
                );
                tracing::warn!(
                    kind = %self.kind,
                    attribute = %key,
                    "Required notification attribute missing, emitting null marker"
                );
                self.attributes.insert(key.to_string(), AttrValue::Null);
            }
        }

        NotificationRecord {
            kind: self.kind,
            created_at,
            attributes: self.attributes,
        }
    }
}
