//! Broker plugin chain.
//!
//! Plugins observe broker lifecycle events through one callback per event
//! category, every callback defaulting to a no-op. The chain holds an ordered,
//! immutable snapshot of registered plugins, swapped atomically on
//! registration; steady-state dispatch clones the snapshot and never blocks
//! registration. Each invocation is isolated: a callback that returns an error
//! or panics is logged and counted, and neither sibling plugins nor the
//! triggering broker operation ever see the failure.
//!
//! [`NotificationPlugin`] is the built-in plugin that turns events into
//! management notifications, honoring the per-category toggles from
//! [`NotificationConfig`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::metrics::PLUGIN_FAILURES_TOTAL;
use crate::notification::{NotificationBuilder, NotificationDispatcher};
use crate::routing::{DeliveryObserver, Message, Queue, RoutingType};
use crate::schema::NotificationKind;

/// Identity and transport metadata of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_name: String,
    pub user: String,
    pub validated_user: Option<String>,
    pub remote_address: String,
    pub cert_subject_dn: String,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub connection: ConnectionInfo,
    pub session_name: String,
}

#[derive(Debug, Clone)]
pub struct AddressInfo {
    pub address: String,
    pub routing_type: RoutingType,
}

#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub routing_name: String,
    pub address: String,
    pub durable: bool,
}

#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub routing_name: String,
    pub address: String,
    /// Queue consumer count after the attach/detach this event describes
    pub consumer_count: i64,
    pub consumer_name: String,
    pub session: SessionInfo,
}

#[derive(Debug, Clone)]
pub struct DeliveryInfo {
    pub address: String,
    pub routing_name: String,
    pub routing_type: RoutingType,
    pub consumer_name: String,
    pub message_id: u64,
}

#[derive(Debug, Clone)]
pub struct ExpiryInfo {
    pub address: String,
    pub routing_name: String,
    pub routing_type: RoutingType,
    pub message_id: u64,
}

/// Observer of broker lifecycle events, one callback per category.
///
/// All callbacks run synchronously on the thread executing the triggering
/// operation and must stay cheap: no I/O, no blocking.
pub trait BrokerPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn after_add_address(&self, _address: &AddressInfo) -> Result<()> {
        Ok(())
    }

    fn after_remove_address(&self, _address: &AddressInfo) -> Result<()> {
        Ok(())
    }

    fn after_add_binding(&self, _binding: &BindingInfo) -> Result<()> {
        Ok(())
    }

    fn after_remove_binding(&self, _binding: &BindingInfo) -> Result<()> {
        Ok(())
    }

    fn after_create_connection(&self, _connection: &ConnectionInfo) -> Result<()> {
        Ok(())
    }

    fn after_destroy_connection(&self, _connection: &ConnectionInfo) -> Result<()> {
        Ok(())
    }

    fn after_create_session(&self, _session: &SessionInfo) -> Result<()> {
        Ok(())
    }

    fn after_close_session(&self, _session: &SessionInfo) -> Result<()> {
        Ok(())
    }

    fn after_create_consumer(&self, _consumer: &ConsumerInfo) -> Result<()> {
        Ok(())
    }

    fn after_close_consumer(&self, _consumer: &ConsumerInfo) -> Result<()> {
        Ok(())
    }

    fn after_deliver(&self, _delivery: &DeliveryInfo) -> Result<()> {
        Ok(())
    }

    fn message_expired(&self, _expiry: &ExpiryInfo) -> Result<()> {
        Ok(())
    }
}

/// Ordered registry of plugins with isolated fan-out.
pub struct PluginChain {
    plugins: RwLock<Arc<Vec<Arc<dyn BrokerPlugin>>>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Append a plugin. Registration happens at broker setup, not on the
    /// steady-state event path.
    pub fn register(&self, plugin: Arc<dyn BrokerPlugin>) {
        let mut guard = self.plugins.write().expect("plugin registry poisoned");
        let mut next = guard.as_ref().clone();
        tracing::info!(plugin = plugin.name(), "Broker plugin registered");
        next.push(plugin);
        *guard = Arc::new(next);
    }

    /// Remove a plugin by name. Returns `true` if one was removed.
    pub fn deregister(&self, name: &str) -> bool {
        let mut guard = self.plugins.write().expect("plugin registry poisoned");
        let mut next = guard.as_ref().clone();
        let before = next.len();
        next.retain(|p| p.name() != name);
        let removed = next.len() != before;
        if removed {
            tracing::info!(plugin = name, "Broker plugin deregistered");
            *guard = Arc::new(next);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn BrokerPlugin>>> {
        self.plugins.read().expect("plugin registry poisoned").clone()
    }

    /// Invoke one callback on every registered plugin, in registration order,
    /// isolating failures and panics per plugin.
    fn invoke(&self, callback: &'static str, f: impl Fn(&dyn BrokerPlugin) -> Result<()>) {
        for plugin in self.snapshot().iter() {
            match catch_unwind(AssertUnwindSafe(|| f(plugin.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    PLUGIN_FAILURES_TOTAL.with_label_values(&[callback]).inc();
                    tracing::warn!(
                        plugin = plugin.name(),
                        callback = callback,
                        error = %error,
                        "Plugin callback failed"
                    );
                }
                Err(_) => {
                    PLUGIN_FAILURES_TOTAL.with_label_values(&[callback]).inc();
                    tracing::warn!(
                        plugin = plugin.name(),
                        callback = callback,
                        "Plugin callback panicked"
                    );
                }
            }
        }
    }

    pub fn after_add_address(&self, address: &AddressInfo) {
        self.invoke("after_add_address", |p| p.after_add_address(address));
    }

    pub fn after_remove_address(&self, address: &AddressInfo) {
        self.invoke("after_remove_address", |p| p.after_remove_address(address));
    }

    pub fn after_add_binding(&self, binding: &BindingInfo) {
        self.invoke("after_add_binding", |p| p.after_add_binding(binding));
    }

    pub fn after_remove_binding(&self, binding: &BindingInfo) {
        self.invoke("after_remove_binding", |p| p.after_remove_binding(binding));
    }

    pub fn after_create_connection(&self, connection: &ConnectionInfo) {
        self.invoke("after_create_connection", |p| {
            p.after_create_connection(connection)
        });
    }

    pub fn after_destroy_connection(&self, connection: &ConnectionInfo) {
        self.invoke("after_destroy_connection", |p| {
            p.after_destroy_connection(connection)
        });
    }

    pub fn after_create_session(&self, session: &SessionInfo) {
        self.invoke("after_create_session", |p| p.after_create_session(session));
    }

    pub fn after_close_session(&self, session: &SessionInfo) {
        self.invoke("after_close_session", |p| p.after_close_session(session));
    }

    pub fn after_create_consumer(&self, consumer: &ConsumerInfo) {
        self.invoke("after_create_consumer", |p| p.after_create_consumer(consumer));
    }

    pub fn after_close_consumer(&self, consumer: &ConsumerInfo) {
        self.invoke("after_close_consumer", |p| p.after_close_consumer(consumer));
    }

    pub fn after_deliver(&self, delivery: &DeliveryInfo) {
        self.invoke("after_deliver", |p| p.after_deliver(delivery));
    }

    pub fn expired(&self, expiry: &ExpiryInfo) {
        self.invoke("message_expired", |p| p.message_expired(expiry));
    }
}

impl Default for PluginChain {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryObserver for PluginChain {
    fn message_delivered(&self, queue: &Queue, consumer_name: &str, message: &Message) {
        self.after_deliver(&DeliveryInfo {
            address: queue.address().to_string(),
            routing_name: queue.name().to_string(),
            routing_type: queue.routing_type(),
            consumer_name: consumer_name.to_string(),
            message_id: message.id,
        });
    }

    fn message_expired(&self, queue: &Queue, message: &Message) {
        self.expired(&ExpiryInfo {
            address: queue.address().to_string(),
            routing_name: queue.name().to_string(),
            routing_type: queue.routing_type(),
            message_id: message.id,
        });
    }
}

/// Built-in plugin translating broker events into management notifications.
///
/// Address, connection, delivered, and expired categories honor their toggle
/// from [`NotificationConfig`], read on every event; binding, consumer, and
/// session notifications are unconditionally enabled. Deliveries and expiries
/// of messages on the management notification address itself are never
/// reported, otherwise every notification would notify about its own
/// delivery.
pub struct NotificationPlugin {
    config: NotificationConfig,
    dispatcher: Arc<NotificationDispatcher>,
}

impl NotificationPlugin {
    pub fn new(config: NotificationConfig, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { config, dispatcher }
    }

    fn session_builder(&self, kind: NotificationKind, session: &SessionInfo) -> NotificationBuilder {
        NotificationBuilder::new(kind)
            .connection_name(&session.connection.connection_name)
            .session_name(&session.session_name)
            .user(&session.connection.user)
    }
}

impl BrokerPlugin for NotificationPlugin {
    fn name(&self) -> &'static str {
        "management-notifications"
    }

    fn after_add_address(&self, address: &AddressInfo) -> Result<()> {
        if !self.config.send_address_notifications {
            return Ok(());
        }
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::AddressAdded)
                .address(&address.address)
                .routing_type(address.routing_type.wire_value())
                .build(),
        );
        Ok(())
    }

    fn after_remove_address(&self, address: &AddressInfo) -> Result<()> {
        if !self.config.send_address_notifications {
            return Ok(());
        }
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::AddressRemoved)
                .address(&address.address)
                .routing_type(address.routing_type.wire_value())
                .build(),
        );
        Ok(())
    }

    fn after_add_binding(&self, binding: &BindingInfo) -> Result<()> {
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::BindingAdded)
                .routing_name(&binding.routing_name)
                .address(&binding.address)
                .build(),
        );
        Ok(())
    }

    fn after_remove_binding(&self, binding: &BindingInfo) -> Result<()> {
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::BindingRemoved)
                .routing_name(&binding.routing_name)
                .address(&binding.address)
                .build(),
        );
        Ok(())
    }

    fn after_create_connection(&self, connection: &ConnectionInfo) -> Result<()> {
        if !self.config.send_connection_notifications {
            return Ok(());
        }
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::ConnectionCreated)
                .connection_name(&connection.connection_name)
                .build(),
        );
        Ok(())
    }

    fn after_destroy_connection(&self, connection: &ConnectionInfo) -> Result<()> {
        if !self.config.send_connection_notifications {
            return Ok(());
        }
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::ConnectionDestroyed)
                .connection_name(&connection.connection_name)
                .build(),
        );
        Ok(())
    }

    fn after_create_session(&self, session: &SessionInfo) -> Result<()> {
        self.dispatcher
            .dispatch(self.session_builder(NotificationKind::SessionCreated, session).build());
        Ok(())
    }

    fn after_close_session(&self, session: &SessionInfo) -> Result<()> {
        self.dispatcher
            .dispatch(self.session_builder(NotificationKind::SessionClosed, session).build());
        Ok(())
    }

    fn after_create_consumer(&self, consumer: &ConsumerInfo) -> Result<()> {
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::ConsumerCreated)
                .routing_name(&consumer.routing_name)
                .address(&consumer.address)
                .consumer_count(consumer.consumer_count)
                .user(&consumer.session.connection.user)
                .validated_user(consumer.session.connection.validated_user.clone())
                .remote_address(&consumer.session.connection.remote_address)
                .session_name(&consumer.session.session_name)
                .cert_subject_dn(&consumer.session.connection.cert_subject_dn)
                .build(),
        );
        Ok(())
    }

    fn after_close_consumer(&self, consumer: &ConsumerInfo) -> Result<()> {
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::ConsumerClosed)
                .routing_name(&consumer.routing_name)
                .address(&consumer.address)
                .consumer_count(consumer.consumer_count)
                .user(&consumer.session.connection.user)
                .validated_user(consumer.session.connection.validated_user.clone())
                .remote_address(&consumer.session.connection.remote_address)
                .session_name(&consumer.session.session_name)
                .cert_subject_dn(&consumer.session.connection.cert_subject_dn)
                .build(),
        );
        Ok(())
    }

    fn after_deliver(&self, delivery: &DeliveryInfo) -> Result<()> {
        if !self.config.send_delivered_notifications
            || delivery.address == self.dispatcher.address()
        {
            return Ok(());
        }
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::MessageDelivered)
                .message_id(delivery.message_id as i64)
                .consumer_name(&delivery.consumer_name)
                .address(&delivery.address)
                .routing_name(&delivery.routing_name)
                .routing_type(delivery.routing_type.wire_value())
                .build(),
        );
        Ok(())
    }

    fn message_expired(&self, expiry: &ExpiryInfo) -> Result<()> {
        if !self.config.send_expired_notifications || expiry.address == self.dispatcher.address() {
            return Ok(());
        }
        self.dispatcher.dispatch(
            NotificationBuilder::new(NotificationKind::MessageExpired)
                .message_id(expiry.message_id as i64)
                .address(&expiry.address)
                .routing_name(&expiry.routing_name)
                .routing_type(expiry.routing_type.wire_value())
                .build(),
        );
        Ok(())
    }
}
