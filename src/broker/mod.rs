//! Embedded broker facade.
//!
//! Wires the routing fabric, the plugin chain, and the notification
//! subsystem together and exposes the client-facing object model:
//! [`Broker`] -> [`Connection`] -> [`Session`] -> consumers and producers.
//! Every lifecycle operation fires its plugin callbacks synchronously before
//! returning, so causally related notifications (address before binding on
//! create, binding before address on delete) reach subscribers in order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{BrokerError, Result};
use crate::filter::CompiledFilter;
use crate::metrics::{CONNECTIONS_ACTIVE, FILTER_REJECTED_TOTAL};
use crate::notification::{DispatcherStatsSnapshot, NotificationDispatcher};
use crate::plugin::{
    AddressInfo, BindingInfo, BrokerPlugin, ConnectionInfo, ConsumerInfo, NotificationPlugin,
    PluginChain, SessionInfo,
};
use crate::routing::{
    ConsumerHandle, DeliveryObserver, Message, PostOffice, QueueDefinition, RoutingType,
};

/// Default remote address for in-VM connections
const IN_VM_REMOTE_ADDRESS: &str = "invm:0";
/// Placeholder when no client certificate was presented
const CERT_DN_UNAVAILABLE: &str = "unavailable";

struct BrokerCore {
    settings: Settings,
    post_office: Arc<PostOffice>,
    plugins: Arc<PluginChain>,
    dispatcher: Arc<NotificationDispatcher>,
    connections: DashMap<String, Arc<ConnectionInner>>,
    next_connection_seq: AtomicU64,
    next_session_seq: AtomicU64,
    next_consumer_seq: AtomicU64,
}

/// Embedded message broker with management notifications.
pub struct Broker {
    core: Arc<BrokerCore>,
}

impl Broker {
    pub fn new(settings: Settings) -> Self {
        let post_office = Arc::new(PostOffice::new());
        let plugins = Arc::new(PluginChain::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            post_office.clone(),
            settings.notification.address.clone(),
        ));

        plugins.register(Arc::new(NotificationPlugin::new(
            settings.notification.clone(),
            dispatcher.clone(),
        )));
        // The broker owns the chain; the post office only observes into it
        let observer: Weak<dyn DeliveryObserver> =
            Arc::downgrade(&(plugins.clone() as Arc<dyn DeliveryObserver>));
        post_office.set_observer(observer);

        tracing::info!(
            notification_address = %settings.notification.address,
            "Broker started"
        );

        Self {
            core: Arc::new(BrokerCore {
                settings,
                post_office,
                plugins,
                dispatcher,
                connections: DashMap::new(),
                next_connection_seq: AtomicU64::new(0),
                next_session_seq: AtomicU64::new(0),
                next_consumer_seq: AtomicU64::new(0),
            }),
        }
    }

    /// The address management notifications are published to.
    pub fn notification_address(&self) -> &str {
        self.core.dispatcher.address()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStatsSnapshot {
        self.core.dispatcher.stats()
    }

    /// Register an additional plugin behind the built-in notification plugin.
    pub fn register_plugin(&self, plugin: Arc<dyn BrokerPlugin>) {
        self.core.plugins.register(plugin);
    }

    pub fn deregister_plugin(&self, name: &str) -> bool {
        self.core.plugins.deregister(name)
    }

    /// Open an in-VM connection with default transport identity.
    pub fn connect(&self, user: &str) -> Connection {
        self.connect_with_identity(user, None, IN_VM_REMOTE_ADDRESS, CERT_DN_UNAVAILABLE)
    }

    /// Open a connection with explicit transport identity.
    pub fn connect_with_identity(
        &self,
        user: &str,
        validated_user: Option<String>,
        remote_address: &str,
        cert_subject_dn: &str,
    ) -> Connection {
        let seq = self.core.next_connection_seq.fetch_add(1, Ordering::Relaxed);
        let info = ConnectionInfo {
            connection_name: format!("connection.{}.{}", seq, Uuid::new_v4()),
            user: user.to_string(),
            validated_user,
            remote_address: remote_address.to_string(),
            cert_subject_dn: cert_subject_dn.to_string(),
        };

        let inner = Arc::new(ConnectionInner {
            core: self.core.clone(),
            info: info.clone(),
            sessions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.core
            .connections
            .insert(info.connection_name.clone(), inner.clone());
        CONNECTIONS_ACTIVE.inc();

        tracing::debug!(connection = %info.connection_name, user = %info.user, "Connection opened");
        self.core.plugins.after_create_connection(&info);
        Connection { inner }
    }

    pub fn connection_count(&self) -> usize {
        self.core.connections.len()
    }

    /// Discard expired backlog messages across all queues.
    pub fn run_expiry_scan(&self) -> usize {
        self.core.post_office.expire_scan()
    }

    /// Spawn the periodic expiry reaper using the configured scan period.
    pub fn start_expiry_reaper(&self) -> tokio::task::JoinHandle<()> {
        let post_office = self.core.post_office.clone();
        let period = Duration::from_millis(self.core.settings.expiry.scan_period_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let expired = post_office.expire_scan();
                if expired > 0 {
                    tracing::debug!(expired, "Expiry scan discarded messages");
                }
            }
        })
    }
}

struct ConnectionInner {
    core: Arc<BrokerCore>,
    info: ConnectionInfo,
    sessions: Mutex<Vec<Arc<SessionInner>>>,
    closed: AtomicBool,
}

impl ConnectionInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<Arc<SessionInner>> = {
            let mut guard = self.sessions.lock().expect("session list poisoned");
            std::mem::take(&mut *guard)
        };
        for session in sessions {
            session.close();
        }

        self.core.connections.remove(&self.info.connection_name);
        CONNECTIONS_ACTIVE.dec();
        tracing::debug!(connection = %self.info.connection_name, "Connection closed");
        self.core.plugins.after_destroy_connection(&self.info);
    }
}

/// Client connection handle.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.inner.info.connection_name
    }

    pub fn create_session(&self) -> Result<Session> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ObjectClosed("connection"));
        }
        let seq = self
            .inner
            .core
            .next_session_seq
            .fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo {
            connection: self.inner.info.clone(),
            session_name: format!("{}.session.{}", self.inner.info.connection_name, seq),
        };

        let session = Arc::new(SessionInner {
            core: self.inner.core.clone(),
            info: info.clone(),
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.inner
            .sessions
            .lock()
            .expect("session list poisoned")
            .push(session.clone());

        tracing::debug!(session = %info.session_name, "Session created");
        self.inner.core.plugins.after_create_session(&info);
        Ok(Session { inner: session })
    }

    /// Close the connection, closing any open sessions first.
    pub fn close(&self) {
        self.inner.close();
    }
}

struct ConsumerRegistration {
    consumer_id: Uuid,
    info: ConsumerInfo,
}

struct SessionInner {
    core: Arc<BrokerCore>,
    info: SessionInfo,
    consumers: Mutex<Vec<ConsumerRegistration>>,
    closed: AtomicBool,
}

impl SessionInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ObjectClosed("session"));
        }
        Ok(())
    }

    /// Detach one consumer and fire its close notification. No-op when the
    /// consumer was already detached.
    fn close_consumer(&self, consumer_id: Uuid) {
        let registration = {
            let mut guard = self.consumers.lock().expect("consumer list poisoned");
            let position = guard.iter().position(|r| r.consumer_id == consumer_id);
            position.map(|i| guard.remove(i))
        };
        let Some(mut registration) = registration else {
            return;
        };

        if let Some(count) = self
            .core
            .post_office
            .detach_consumer(&registration.info.routing_name, consumer_id)
        {
            registration.info.consumer_count = count as i64;
            tracing::debug!(
                consumer = %registration.info.consumer_name,
                queue = %registration.info.routing_name,
                "Consumer closed"
            );
            self.core.plugins.after_close_consumer(&registration.info);
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let consumer_ids: Vec<Uuid> = {
            let guard = self.consumers.lock().expect("consumer list poisoned");
            guard.iter().map(|r| r.consumer_id).collect()
        };
        for id in consumer_ids {
            self.close_consumer(id);
        }

        tracing::debug!(session = %self.info.session_name, "Session closed");
        self.core.plugins.after_close_session(&self.info);
    }
}

/// Unit of work for queue management, producing, and consuming.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_name", &self.inner.info.session_name)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn name(&self) -> &str {
        &self.inner.info.session_name
    }

    /// Register an address. Returns `true` if the address was created, `false`
    /// if it already existed.
    pub fn create_address(&self, name: &str, routing_type: RoutingType) -> Result<bool> {
        self.inner.check_open()?;
        let created = self.inner.core.post_office.add_address(name, routing_type);
        if created {
            self.inner.core.plugins.after_add_address(&AddressInfo {
                address: name.to_string(),
                routing_type,
            });
        }
        Ok(created)
    }

    /// Remove an address with no bound queues.
    pub fn remove_address(&self, name: &str) -> Result<()> {
        self.inner.check_open()?;
        let address = self.inner.core.post_office.remove_address(name)?;
        self.inner.core.plugins.after_remove_address(&AddressInfo {
            address: address.name.clone(),
            routing_type: address.routing_type,
        });
        Ok(())
    }

    /// Bind a queue, implicitly creating its address when unknown. The
    /// address-added notification (if any) precedes the binding-added one.
    pub fn create_queue(&self, definition: QueueDefinition) -> Result<()> {
        self.inner.check_open()?;
        let bound = self.inner.core.post_office.add_queue(definition)?;
        let queue = &bound.queue;

        if bound.address_created {
            self.inner.core.plugins.after_add_address(&AddressInfo {
                address: queue.address().to_string(),
                routing_type: queue.routing_type(),
            });
        }
        self.inner.core.plugins.after_add_binding(&BindingInfo {
            routing_name: queue.name().to_string(),
            address: queue.address().to_string(),
            durable: queue.is_durable(),
        });
        Ok(())
    }

    /// Unbind a queue. When this orphans an auto-created address, the
    /// binding-removed notification precedes the address-removed one.
    pub fn delete_queue(&self, name: &str) -> Result<()> {
        self.inner.check_open()?;
        let unbound = self.inner.core.post_office.remove_queue(name)?;
        let queue = &unbound.queue;

        self.inner.core.plugins.after_remove_binding(&BindingInfo {
            routing_name: queue.name().to_string(),
            address: queue.address().to_string(),
            durable: queue.is_durable(),
        });
        if let Some(address) = unbound.address_removed {
            self.inner.core.plugins.after_remove_address(&AddressInfo {
                address: address.name.clone(),
                routing_type: address.routing_type,
            });
        }
        Ok(())
    }

    pub fn create_consumer(&self, queue_name: &str) -> Result<Consumer> {
        self.consumer(queue_name, None)
    }

    /// Attach a consumer with a selector over message headers. A selector
    /// that does not parse rejects the subscription.
    pub fn create_consumer_with_filter(&self, queue_name: &str, selector: &str) -> Result<Consumer> {
        let filter = CompiledFilter::compile(selector).map_err(|e| {
            FILTER_REJECTED_TOTAL.inc();
            tracing::debug!(selector = %selector, error = %e, "Selector rejected");
            e
        })?;
        self.consumer(queue_name, Some(filter))
    }

    fn consumer(&self, queue_name: &str, filter: Option<CompiledFilter>) -> Result<Consumer> {
        self.inner.check_open()?;
        let seq = self
            .inner
            .core
            .next_consumer_seq
            .fetch_add(1, Ordering::Relaxed);
        let consumer_name = format!("{}.consumer.{}", self.inner.info.session_name, seq);

        let (handle, receiver) = ConsumerHandle::new(consumer_name.clone(), filter);
        let consumer_id = handle.id;
        let (queue, count) = self
            .inner
            .core
            .post_office
            .attach_consumer(queue_name, handle)?;

        let info = ConsumerInfo {
            routing_name: queue.name().to_string(),
            address: queue.address().to_string(),
            consumer_count: count as i64,
            consumer_name: consumer_name.clone(),
            session: self.inner.info.clone(),
        };
        self.inner
            .consumers
            .lock()
            .expect("consumer list poisoned")
            .push(ConsumerRegistration {
                consumer_id,
                info: info.clone(),
            });

        tracing::debug!(consumer = %consumer_name, queue = %queue_name, "Consumer created");
        self.inner.core.plugins.after_create_consumer(&info);

        Ok(Consumer {
            session: self.inner.clone(),
            consumer_id,
            receiver,
            closed: false,
        })
    }

    pub fn create_producer(&self, address: &str) -> Result<Producer> {
        self.inner.check_open()?;
        Ok(Producer {
            core: self.inner.core.clone(),
            address: address.to_string(),
        })
    }

    /// Close the session, closing its consumers first.
    pub fn close(&self) {
        self.inner.close();
    }
}

/// Producer bound to one address.
pub struct Producer {
    core: Arc<BrokerCore>,
    address: String,
}

impl Producer {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Publish a message to the producer's address. Returns the number of
    /// queues it was routed to.
    pub fn send(&self, mut message: Message) -> usize {
        message.address = self.address.clone();
        self.core.post_office.publish(message)
    }
}

/// Consumer holding the receiving end of its queue subscription.
pub struct Consumer {
    session: Arc<SessionInner>,
    consumer_id: Uuid,
    receiver: tokio::sync::mpsc::UnboundedReceiver<Message>,
    closed: bool,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("consumer_id", &self.consumer_id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Consumer {
    /// Await the next message, up to `timeout`. `None` on timeout.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        if self.closed {
            return Err(BrokerError::ObjectClosed("consumer"));
        }
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(message) => Ok(message),
            Err(_) => Ok(None),
        }
    }

    /// Take an already-buffered message without waiting.
    pub fn receive_immediate(&mut self) -> Result<Option<Message>> {
        if self.closed {
            return Err(BrokerError::ObjectClosed("consumer"));
        }
        Ok(self.receiver.try_recv().ok())
    }

    /// Detach from the queue. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.close_consumer(self.consumer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker() -> Broker {
        Broker::new(Settings::default())
    }

    #[test]
    fn test_connection_session_lifecycle() {
        let broker = broker();
        let connection = broker.connect("myUser");
        assert_eq!(broker.connection_count(), 1);

        let session = connection.create_session().unwrap();
        session.close();
        connection.close();
        assert_eq!(broker.connection_count(), 0);

        // Closed connection refuses new sessions
        let err = connection.create_session().unwrap_err();
        assert!(matches!(err, BrokerError::ObjectClosed("connection")));
    }

    #[test]
    fn test_closed_session_refuses_operations() {
        let broker = broker();
        let connection = broker.connect("myUser");
        let session = connection.create_session().unwrap();
        session.close();

        let err = session.create_queue(QueueDefinition::new("q1", "a1")).unwrap_err();
        assert!(matches!(err, BrokerError::ObjectClosed("session")));
        let err = session.create_consumer("q1").unwrap_err();
        assert!(matches!(err, BrokerError::ObjectClosed("session")));
    }

    #[test]
    fn test_queue_round_trip() {
        let broker = broker();
        let connection = broker.connect("myUser");
        let session = connection.create_session().unwrap();

        session.create_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let err = session.create_queue(QueueDefinition::new("q1", "a1")).unwrap_err();
        assert!(matches!(err, BrokerError::QueueExists(_)));
        session.delete_queue("q1").unwrap();
        let err = session.delete_queue("q1").unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotFound(_)));
    }

    #[test]
    fn test_bad_selector_rejected() {
        let broker = broker();
        let connection = broker.connect("myUser");
        let session = connection.create_session().unwrap();
        session.create_queue(QueueDefinition::new("q1", "a1")).unwrap();

        let err = session
            .create_consumer_with_filter("q1", "_ADDRESS = ")
            .unwrap_err();
        assert!(matches!(err, BrokerError::FilterSyntax(_)));
    }

    #[tokio::test]
    async fn test_produce_consume() {
        let broker = broker();
        let connection = broker.connect("myUser");
        let session = connection.create_session().unwrap();
        session.create_queue(QueueDefinition::new("q1", "a1")).unwrap();

        let mut consumer = session.create_consumer("q1").unwrap();
        let producer = session.create_producer("a1").unwrap();
        assert_eq!(producer.send(Message::new(json!({"n": 1}))), 1);

        let message = consumer
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.body, json!({"n": 1}));

        consumer.close();
        let err = consumer.receive_immediate().unwrap_err();
        assert!(matches!(err, BrokerError::ObjectClosed("consumer")));
    }

    #[test]
    fn test_session_close_detaches_consumers() {
        let broker = broker();
        let connection = broker.connect("myUser");
        let session = connection.create_session().unwrap();
        session.create_queue(QueueDefinition::new("q1", "a1")).unwrap();

        let _consumer = session.create_consumer("q1").unwrap();
        let queue = broker.core.post_office.get_queue("q1").unwrap();
        assert_eq!(queue.consumer_count(), 1);

        session.close();
        assert_eq!(queue.consumer_count(), 0);
    }

    #[test]
    fn test_expiry_scan_via_broker() {
        let broker = broker();
        let connection = broker.connect("myUser");
        let session = connection.create_session().unwrap();
        session.create_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let producer = session.create_producer("a1").unwrap();

        let message = Message::new(json!({})).with_expiration(
            chrono::Utc::now().timestamp_millis() + 5,
        );
        producer.send(message);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(broker.run_expiry_scan(), 1);
    }
}
