//! Notification schema registry.
//!
//! Defines the notification kinds a broker can emit, the well-known attribute
//! keys they carry, and the required attribute set per kind. The registry is a
//! read-only process-wide table used for validation and documentation; the
//! notification builder is responsible for actually populating attributes.

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};

/// Well-known notification attribute keys, as they appear in message headers.
pub mod keys {
    /// Kind of the notification, always present
    pub const NOTIFICATION_TYPE: &str = "_NOTIF_TYPE";
    /// Wall-clock millis at record construction, equals the message timestamp
    pub const NOTIFICATION_TIMESTAMP: &str = "_NOTIF_TIMESTAMP";
    pub const ROUTING_NAME: &str = "_ROUTING_NAME";
    pub const ADDRESS: &str = "_ADDRESS";
    pub const ROUTING_TYPE: &str = "_ROUTING_TYPE";
    pub const CONSUMER_COUNT: &str = "_CONSUMER_COUNT";
    pub const CONSUMER_NAME: &str = "_CONSUMER_NAME";
    pub const USER: &str = "_USER";
    pub const VALIDATED_USER: &str = "_VALIDATED_USER";
    pub const REMOTE_ADDRESS: &str = "_REMOTE_ADDRESS";
    pub const SESSION_NAME: &str = "_SESSION_NAME";
    pub const CERT_SUBJECT_DN: &str = "_CERT_SUBJECT_DN";
    pub const CONNECTION_NAME: &str = "_CONNECTION_NAME";
    pub const MESSAGE_ID: &str = "_MESSAGE_ID";
}

/// Value type an attribute is declared with in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    Str,
    Int,
    Bool,
}

/// Enumerated tag identifying what a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    AddressAdded,
    AddressRemoved,
    BindingAdded,
    BindingRemoved,
    ConsumerCreated,
    ConsumerClosed,
    ConnectionCreated,
    ConnectionDestroyed,
    SessionCreated,
    SessionClosed,
    MessageDelivered,
    MessageExpired,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 12] = [
        NotificationKind::AddressAdded,
        NotificationKind::AddressRemoved,
        NotificationKind::BindingAdded,
        NotificationKind::BindingRemoved,
        NotificationKind::ConsumerCreated,
        NotificationKind::ConsumerClosed,
        NotificationKind::ConnectionCreated,
        NotificationKind::ConnectionDestroyed,
        NotificationKind::SessionCreated,
        NotificationKind::SessionClosed,
        NotificationKind::MessageDelivered,
        NotificationKind::MessageExpired,
    ];

    /// Wire name of the kind, carried in the `_NOTIF_TYPE` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AddressAdded => "ADDRESS_ADDED",
            NotificationKind::AddressRemoved => "ADDRESS_REMOVED",
            NotificationKind::BindingAdded => "BINDING_ADDED",
            NotificationKind::BindingRemoved => "BINDING_REMOVED",
            NotificationKind::ConsumerCreated => "CONSUMER_CREATED",
            NotificationKind::ConsumerClosed => "CONSUMER_CLOSED",
            NotificationKind::ConnectionCreated => "CONNECTION_CREATED",
            NotificationKind::ConnectionDestroyed => "CONNECTION_DESTROYED",
            NotificationKind::SessionCreated => "SESSION_CREATED",
            NotificationKind::SessionClosed => "SESSION_CLOSED",
            NotificationKind::MessageDelivered => "MESSAGE_DELIVERED",
            NotificationKind::MessageExpired => "MESSAGE_EXPIRED",
        }
    }

    /// Look up a kind by its wire name.
    pub fn parse(name: &str) -> Result<Self> {
        NotificationKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| BrokerError::UnknownNotificationKind(name.to_string()))
    }

    /// Required attribute keys and their declared types for this kind.
    ///
    /// `_NOTIF_TYPE` and `_NOTIF_TIMESTAMP` are required for every kind and
    /// stamped by the builder itself, so they are not listed here.
    pub fn required_attributes(&self) -> &'static [(&'static str, AttrType)] {
        use AttrType::*;
        match self {
            NotificationKind::AddressAdded | NotificationKind::AddressRemoved => {
                &[(keys::ADDRESS, Str), (keys::ROUTING_TYPE, Int)]
            }
            NotificationKind::BindingAdded | NotificationKind::BindingRemoved => {
                &[(keys::ROUTING_NAME, Str), (keys::ADDRESS, Str)]
            }
            NotificationKind::ConsumerCreated | NotificationKind::ConsumerClosed => &[
                (keys::ROUTING_NAME, Str),
                (keys::ADDRESS, Str),
                (keys::CONSUMER_COUNT, Int),
                (keys::USER, Str),
                (keys::REMOTE_ADDRESS, Str),
                (keys::SESSION_NAME, Str),
                (keys::CERT_SUBJECT_DN, Str),
            ],
            NotificationKind::ConnectionCreated | NotificationKind::ConnectionDestroyed => {
                &[(keys::CONNECTION_NAME, Str)]
            }
            NotificationKind::SessionCreated | NotificationKind::SessionClosed => &[
                (keys::CONNECTION_NAME, Str),
                (keys::SESSION_NAME, Str),
                (keys::USER, Str),
            ],
            NotificationKind::MessageDelivered => &[
                (keys::MESSAGE_ID, Int),
                (keys::CONSUMER_NAME, Str),
                (keys::ADDRESS, Str),
                (keys::ROUTING_NAME, Str),
                (keys::ROUTING_TYPE, Int),
            ],
            NotificationKind::MessageExpired => &[
                (keys::MESSAGE_ID, Int),
                (keys::ADDRESS, Str),
                (keys::ROUTING_NAME, Str),
                (keys::ROUTING_TYPE, Int),
            ],
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
