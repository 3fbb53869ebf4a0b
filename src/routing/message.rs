//! Message and routing-type primitives shared by the routing fabric and the
//! notification subsystem.

use serde::{Deserialize, Serialize};

use crate::notification::{AttrMap, AttrValue};

/// Delivery semantics of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingType {
    /// Every bound queue receives a copy
    Multicast,
    /// Exactly one bound queue receives the message, round-robin
    Anycast,
}

impl RoutingType {
    /// Numeric encoding carried in the `_ROUTING_TYPE` header.
    pub fn wire_value(self) -> i64 {
        match self {
            RoutingType::Multicast => 0,
            RoutingType::Anycast => 1,
        }
    }
}

/// A routable message.
///
/// Headers share the attribute value type with notification records, so
/// selector filters evaluate uniformly over both. `expiration` is an absolute
/// wall-clock milli timestamp, `0` meaning the message never expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned id, stamped at publish time
    pub id: u64,
    pub address: String,
    /// Wall-clock millis, stamped at publish time unless pre-set
    pub timestamp: i64,
    pub expiration: i64,
    pub headers: AttrMap,
    pub body: serde_json::Value,
}

impl Message {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            id: 0,
            address: String::new(),
            timestamp: 0,
            expiration: 0,
            headers: AttrMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the absolute expiration time in wall-clock millis.
    pub fn with_expiration(mut self, expiration_ms: i64) -> Self {
        self.expiration = expiration_ms;
        self
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiration != 0 && now_ms >= self.expiration
    }

    pub fn header(&self, key: &str) -> Option<&AttrValue> {
        self.headers.get(key)
    }

    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(AttrValue::as_str)
    }

    pub fn header_i64(&self, key: &str) -> Option<i64> {
        self.headers.get(key).and_then(AttrValue::as_i64)
    }
}
