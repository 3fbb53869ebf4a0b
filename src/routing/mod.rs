//! In-process routing fabric.
//!
//! The post office owns the address and queue registries and fans published
//! messages out to bound queues: every bound queue for a multicast address,
//! one queue round-robin for anycast. Within a queue, each message is handed
//! to a single consumer whose selector matches; messages matching no attached
//! consumer park in a FIFO backlog until a matching consumer attaches or the
//! expiry scan discards them.
//!
//! The entire publish path is synchronous and non-blocking: consumer buffers
//! are unbounded channels, so enqueuing never suspends the publishing thread.
//! Delivery and expiry events are raised through a [`DeliveryObserver`] after
//! queue locks are released.

mod message;

pub use message::{Message, RoutingType};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::Utc;
use dashmap::DashMap;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{BrokerError, Result};
use crate::filter::CompiledFilter;
use crate::metrics::{
    ADDRESSES_ACTIVE, CONSUMERS_ACTIVE, MESSAGES_DELIVERED_TOTAL, MESSAGES_EXPIRED_TOTAL,
    MESSAGES_PUBLISHED_TOTAL, MESSAGES_UNROUTED_TOTAL, QUEUES_ACTIVE,
};

/// Observer for message-level routing outcomes, wired to the plugin chain.
pub trait DeliveryObserver: Send + Sync {
    fn message_delivered(&self, queue: &Queue, consumer_name: &str, message: &Message);
    fn message_expired(&self, queue: &Queue, message: &Message);
}

/// A registered address.
pub struct Address {
    pub name: String,
    pub routing_type: RoutingType,
    /// Created implicitly by the first queue bound to it; removed again when
    /// the last such queue goes away
    pub auto_created: bool,
    rotation: AtomicUsize,
}

impl Address {
    fn next_rotation(&self, len: usize) -> usize {
        self.rotation.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Definition used when binding a new queue.
#[derive(Debug, Clone)]
pub struct QueueDefinition {
    pub name: String,
    pub address: String,
    pub durable: bool,
    /// Queue-level selector, composed with each consumer's own selector
    pub filter: Option<CompiledFilter>,
}

impl QueueDefinition {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            durable: false,
            filter: None,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn filter(mut self, filter: CompiledFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Server-side handle for one attached consumer.
pub struct ConsumerHandle {
    pub id: Uuid,
    pub name: String,
    pub filter: Option<CompiledFilter>,
    sender: mpsc::UnboundedSender<Message>,
}

impl ConsumerHandle {
    pub fn new(name: impl Into<String>, filter: Option<CompiledFilter>) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                name: name.into(),
                filter,
                sender: tx,
            }),
            rx,
        )
    }

    fn accepts(&self, message: &Message) -> bool {
        self.filter
            .as_ref()
            .map(|f| f.matches(&message.headers))
            .unwrap_or(true)
    }
}

enum QueueEvent {
    Delivered { consumer_name: String, message: Message },
    Expired { message: Message },
}

type QueueEvents = SmallVec<[(Arc<Queue>, QueueEvent); 2]>;

struct QueueState {
    backlog: VecDeque<Message>,
    consumers: Vec<Arc<ConsumerHandle>>,
    rotation: usize,
}

/// A queue bound to an address.
pub struct Queue {
    name: String,
    address: String,
    routing_type: RoutingType,
    durable: bool,
    filter: Option<CompiledFilter>,
    state: Mutex<QueueState>,
}

impl Queue {
    fn new(definition: QueueDefinition, routing_type: RoutingType) -> Self {
        Self {
            name: definition.name,
            address: definition.address,
            routing_type,
            durable: definition.durable,
            filter: definition.filter,
            state: Mutex::new(QueueState {
                backlog: VecDeque::new(),
                consumers: Vec::new(),
                rotation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn routing_type(&self) -> RoutingType {
        self.routing_type
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").consumers.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").backlog.len()
    }

    /// Attach a consumer, draining any backlog messages its selector matches.
    /// Returns the consumer count after attaching.
    fn add_consumer(
        self: &Arc<Self>,
        handle: Arc<ConsumerHandle>,
        now_ms: i64,
        events: &mut QueueEvents,
    ) -> usize {
        let mut state = self.state.lock().expect("queue lock poisoned");

        let mut remaining = VecDeque::with_capacity(state.backlog.len());
        while let Some(message) = state.backlog.pop_front() {
            if message.is_expired(now_ms) {
                events.push((self.clone(), QueueEvent::Expired { message }));
            } else if handle.accepts(&message) && handle.sender.send(message.clone()).is_ok() {
                events.push((
                    self.clone(),
                    QueueEvent::Delivered {
                        consumer_name: handle.name.clone(),
                        message,
                    },
                ));
            } else {
                remaining.push_back(message);
            }
        }
        state.backlog = remaining;

        state.consumers.push(handle);
        CONSUMERS_ACTIVE.inc();
        state.consumers.len()
    }

    /// Detach a consumer. Returns the consumer count after detaching, or
    /// `None` if the consumer was not attached.
    fn remove_consumer(&self, consumer_id: Uuid) -> Option<usize> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let before = state.consumers.len();
        state.consumers.retain(|c| c.id != consumer_id);
        if state.consumers.len() == before {
            return None;
        }
        CONSUMERS_ACTIVE.dec();
        Some(state.consumers.len())
    }

    /// Route one message into this queue.
    ///
    /// Expired messages are diverted to the expiry event immediately and are
    /// never delivered. A live message goes to one consumer whose selector
    /// matches (round-robin); with no matching consumer it parks in the
    /// backlog.
    fn enqueue(self: &Arc<Self>, message: Message, now_ms: i64, events: &mut QueueEvents) {
        if let Some(filter) = &self.filter {
            if !filter.matches(&message.headers) {
                return;
            }
        }

        if message.is_expired(now_ms) {
            events.push((self.clone(), QueueEvent::Expired { message }));
            return;
        }

        let mut state = self.state.lock().expect("queue lock poisoned");
        let len = state.consumers.len();
        let start = state.rotation;
        for i in 0..len {
            let idx = (start + i) % len;
            let consumer = state.consumers[idx].clone();
            if !consumer.accepts(&message) {
                continue;
            }
            if consumer.sender.send(message.clone()).is_err() {
                // Receiver dropped without a close; detach lazily
                state.consumers.retain(|c| c.id != consumer.id);
                CONSUMERS_ACTIVE.dec();
                continue;
            }
            state.rotation = idx + 1;
            events.push((
                self.clone(),
                QueueEvent::Delivered {
                    consumer_name: consumer.name.clone(),
                    message,
                },
            ));
            return;
        }

        state.backlog.push_back(message);
    }

    /// Discard expired backlog messages, raising an expiry event for each.
    fn expire(self: &Arc<Self>, now_ms: i64, events: &mut QueueEvents) -> usize {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let before = state.backlog.len();
        let mut remaining = VecDeque::with_capacity(before);
        while let Some(message) = state.backlog.pop_front() {
            if message.is_expired(now_ms) {
                events.push((self.clone(), QueueEvent::Expired { message }));
            } else {
                remaining.push_back(message);
            }
        }
        let expired = before - remaining.len();
        state.backlog = remaining;
        expired
    }
}

/// Result of binding a queue.
pub struct QueueBound {
    pub queue: Arc<Queue>,
    /// Set when binding the queue implicitly created its address
    pub address_created: bool,
}

impl std::fmt::Debug for QueueBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBound")
            .field("address_created", &self.address_created)
            .finish_non_exhaustive()
    }
}

/// Result of unbinding a queue.
pub struct QueueUnbound {
    pub queue: Arc<Queue>,
    /// Set when unbinding orphaned an auto-created address, which is removed
    /// as part of the same causal chain
    pub address_removed: Option<Arc<Address>>,
}

/// Address and queue registries plus the fan-out logic.
pub struct PostOffice {
    addresses: DashMap<String, Arc<Address>>,
    queues: DashMap<String, Arc<Queue>>,
    /// address name -> bound queue names, in binding order
    bindings: DashMap<String, Vec<String>>,
    observer: RwLock<Weak<dyn DeliveryObserver>>,
    next_message_id: AtomicU64,
}

impl PostOffice {
    pub fn new() -> Self {
        Self {
            addresses: DashMap::new(),
            queues: DashMap::new(),
            bindings: DashMap::new(),
            observer: RwLock::new(Weak::<NoopObserver>::new()),
            next_message_id: AtomicU64::new(0),
        }
    }

    /// Wire the delivery observer. Held weakly: the broker owns the plugin
    /// chain, the post office only reports into it.
    pub fn set_observer(&self, observer: Weak<dyn DeliveryObserver>) {
        *self.observer.write().expect("observer lock poisoned") = observer;
    }

    /// Register an address. Returns `false` if it already existed.
    pub fn add_address(&self, name: &str, routing_type: RoutingType) -> bool {
        self.register_address(name, routing_type, false)
    }

    fn register_address(&self, name: &str, routing_type: RoutingType, auto_created: bool) -> bool {
        if self.addresses.contains_key(name) {
            return false;
        }
        self.addresses.insert(
            name.to_string(),
            Arc::new(Address {
                name: name.to_string(),
                routing_type,
                auto_created,
                rotation: AtomicUsize::new(0),
            }),
        );
        ADDRESSES_ACTIVE.inc();
        tracing::debug!(address = %name, routing_type = ?routing_type, auto_created, "Address registered");
        true
    }

    pub fn get_address(&self, name: &str) -> Option<Arc<Address>> {
        self.addresses.get(name).map(|a| a.clone())
    }

    /// Remove an address with no remaining queue bindings.
    pub fn remove_address(&self, name: &str) -> Result<Arc<Address>> {
        let bound = self.bindings.get(name).map(|q| q.len()).unwrap_or(0);
        if bound > 0 {
            return Err(BrokerError::Internal(format!(
                "address {} still has {} bound queues",
                name, bound
            )));
        }
        let (_, address) = self
            .addresses
            .remove(name)
            .ok_or_else(|| BrokerError::AddressNotFound(name.to_string()))?;
        self.bindings.remove(name);
        ADDRESSES_ACTIVE.dec();
        tracing::debug!(address = %name, "Address removed");
        Ok(address)
    }

    /// Bind a new queue, implicitly creating a multicast address when the
    /// target address is unknown.
    pub fn add_queue(&self, definition: QueueDefinition) -> Result<QueueBound> {
        if self.queues.contains_key(&definition.name) {
            return Err(BrokerError::QueueExists(definition.name));
        }

        let address_created =
            self.register_address(&definition.address, RoutingType::Multicast, true);
        let routing_type = self
            .addresses
            .get(&definition.address)
            .map(|a| a.routing_type)
            .unwrap_or(RoutingType::Multicast);

        let queue = Arc::new(Queue::new(definition, routing_type));
        self.queues.insert(queue.name.clone(), queue.clone());
        self.bindings
            .entry(queue.address.clone())
            .or_default()
            .push(queue.name.clone());
        QUEUES_ACTIVE.inc();

        tracing::debug!(queue = %queue.name, address = %queue.address, "Queue bound");
        Ok(QueueBound {
            queue,
            address_created,
        })
    }

    /// Unbind a queue, removing its auto-created address when this orphans it.
    pub fn remove_queue(&self, name: &str) -> Result<QueueUnbound> {
        let (_, queue) = self
            .queues
            .remove(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))?;
        QUEUES_ACTIVE.dec();

        let mut orphaned = false;
        if let Some(mut bound) = self.bindings.get_mut(&queue.address) {
            bound.retain(|q| q != name);
            orphaned = bound.is_empty();
        }

        let mut address_removed = None;
        if orphaned {
            let auto_created = self
                .addresses
                .get(&queue.address)
                .map(|a| a.auto_created)
                .unwrap_or(false);
            if auto_created {
                address_removed = self.remove_address(&queue.address).ok();
            }
        }

        tracing::debug!(queue = %name, address = %queue.address, "Queue unbound");
        Ok(QueueUnbound {
            queue,
            address_removed,
        })
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|q| q.clone())
    }

    /// Attach a consumer to a queue. Returns the queue and the consumer count
    /// after attaching.
    pub fn attach_consumer(
        &self,
        queue_name: &str,
        handle: Arc<ConsumerHandle>,
    ) -> Result<(Arc<Queue>, usize)> {
        let queue = self
            .get_queue(queue_name)
            .ok_or_else(|| BrokerError::QueueNotFound(queue_name.to_string()))?;
        let now = Utc::now().timestamp_millis();
        let mut events = QueueEvents::new();
        let count = queue.add_consumer(handle, now, &mut events);
        self.fire(events);
        Ok((queue, count))
    }

    /// Detach a consumer. Returns the consumer count after detaching.
    pub fn detach_consumer(&self, queue_name: &str, consumer_id: Uuid) -> Option<usize> {
        self.get_queue(queue_name)?.remove_consumer(consumer_id)
    }

    /// Publish a message to its address.
    ///
    /// Returns the number of queues the message was routed to; `0` means the
    /// message was dropped (unknown address or nothing bound). Publishing is
    /// best-effort and never fails.
    pub fn publish(&self, mut message: Message) -> usize {
        let now = Utc::now().timestamp_millis();
        if message.timestamp == 0 {
            message.timestamp = now;
        }
        if message.id == 0 {
            message.id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        }
        MESSAGES_PUBLISHED_TOTAL.inc();

        let Some(address) = self.get_address(&message.address) else {
            MESSAGES_UNROUTED_TOTAL.inc();
            tracing::debug!(address = %message.address, "Dropping message for unknown address");
            return 0;
        };

        let queue_names: Vec<String> = self
            .bindings
            .get(&message.address)
            .map(|names| names.clone())
            .unwrap_or_default();
        let bound: Vec<Arc<Queue>> = queue_names
            .iter()
            .filter_map(|name| self.get_queue(name))
            .collect();

        if bound.is_empty() {
            MESSAGES_UNROUTED_TOTAL.inc();
            tracing::debug!(address = %message.address, "Dropping message, no queue bound");
            return 0;
        }

        let targets: Vec<Arc<Queue>> = match address.routing_type {
            RoutingType::Multicast => bound,
            RoutingType::Anycast => {
                let idx = address.next_rotation(bound.len());
                vec![bound[idx].clone()]
            }
        };

        let mut events = QueueEvents::new();
        let routed = targets.len();
        for queue in &targets {
            queue.enqueue(message.clone(), now, &mut events);
        }
        self.fire(events);
        routed
    }

    /// Discard expired backlog messages across all queues. Returns the number
    /// discarded.
    pub fn expire_scan(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        let queues: Vec<Arc<Queue>> = self.queues.iter().map(|q| q.value().clone()).collect();
        let mut events = QueueEvents::new();
        let mut expired = 0;
        for queue in &queues {
            expired += queue.expire(now, &mut events);
        }
        self.fire(events);
        expired
    }

    fn fire(&self, events: QueueEvents) {
        if events.is_empty() {
            return;
        }
        let observer = self.observer.read().expect("observer lock poisoned").upgrade();
        for (queue, event) in events {
            match event {
                QueueEvent::Delivered {
                    consumer_name,
                    message,
                } => {
                    MESSAGES_DELIVERED_TOTAL.inc();
                    if let Some(observer) = &observer {
                        observer.message_delivered(&queue, &consumer_name, &message);
                    }
                }
                QueueEvent::Expired { message } => {
                    MESSAGES_EXPIRED_TOTAL.inc();
                    tracing::debug!(
                        queue = %queue.name(),
                        message_id = message.id,
                        "Message expired"
                    );
                    if let Some(observer) = &observer {
                        observer.message_expired(&queue, &message);
                    }
                }
            }
        }
    }
}

impl Default for PostOffice {
    fn default() -> Self {
        Self::new()
    }
}

struct NoopObserver;

impl DeliveryObserver for NoopObserver {
    fn message_delivered(&self, _queue: &Queue, _consumer_name: &str, _message: &Message) {}
    fn message_expired(&self, _queue: &Queue, _message: &Message) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_office() -> PostOffice {
        PostOffice::new()
    }

    #[test]
    fn test_queue_binding_auto_creates_address() {
        let po = post_office();
        let bound = po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        assert!(bound.address_created);
        assert_eq!(
            po.get_address("a1").unwrap().routing_type,
            RoutingType::Multicast
        );

        // Second queue on the same address does not create it again
        let bound = po.add_queue(QueueDefinition::new("q2", "a1")).unwrap();
        assert!(!bound.address_created);
    }

    #[test]
    fn test_duplicate_queue_rejected() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let err = po.add_queue(QueueDefinition::new("q1", "a2")).unwrap_err();
        assert!(matches!(err, BrokerError::QueueExists(_)));
    }

    #[test]
    fn test_remove_last_queue_removes_auto_created_address() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let unbound = po.remove_queue("q1").unwrap();
        assert!(unbound.address_removed.is_some());
        assert!(po.get_address("a1").is_none());
    }

    #[test]
    fn test_explicit_address_survives_queue_removal() {
        let po = post_office();
        po.add_address("a1", RoutingType::Anycast);
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let unbound = po.remove_queue("q1").unwrap();
        assert!(unbound.address_removed.is_none());
        assert!(po.get_address("a1").is_some());
    }

    #[test]
    fn test_remove_address_with_bound_queues_fails() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        assert!(po.remove_address("a1").is_err());
    }

    #[test]
    fn test_publish_without_binding_is_dropped() {
        let po = post_office();
        let mut msg = Message::new(json!({}));
        msg.address = "nowhere".to_string();
        assert_eq!(po.publish(msg), 0);
    }

    #[test]
    fn test_multicast_fans_out_to_all_queues() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        po.add_queue(QueueDefinition::new("q2", "a1")).unwrap();

        let mut msg = Message::new(json!({"k": "v"}));
        msg.address = "a1".to_string();
        assert_eq!(po.publish(msg), 2);

        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 1);
        assert_eq!(po.get_queue("q2").unwrap().backlog_len(), 1);
    }

    #[test]
    fn test_anycast_routes_round_robin() {
        let po = post_office();
        po.add_address("a1", RoutingType::Anycast);
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        po.add_queue(QueueDefinition::new("q2", "a1")).unwrap();

        for _ in 0..4 {
            let mut msg = Message::new(json!({}));
            msg.address = "a1".to_string();
            assert_eq!(po.publish(msg), 1);
        }

        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 2);
        assert_eq!(po.get_queue("q2").unwrap().backlog_len(), 2);
    }

    #[test]
    fn test_consumer_receives_published_message() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let (handle, mut rx) = ConsumerHandle::new("c1", None);
        let (_, count) = po.attach_consumer("q1", handle).unwrap();
        assert_eq!(count, 1);

        let mut msg = Message::new(json!({}));
        msg.address = "a1".to_string();
        po.publish(msg);

        let received = rx.try_recv().unwrap();
        assert!(received.id > 0);
        assert!(received.timestamp > 0);
    }

    #[test]
    fn test_consumer_selector_skips_non_matching() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let filter = CompiledFilter::compile("kind = 'wanted'").unwrap();
        let (handle, mut rx) = ConsumerHandle::new("c1", Some(filter));
        po.attach_consumer("q1", handle).unwrap();

        let mut unwanted = Message::new(json!({})).with_header("kind", "unwanted");
        unwanted.address = "a1".to_string();
        po.publish(unwanted);
        assert!(rx.try_recv().is_err());
        // Non-matching message parks in the backlog
        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 1);

        let mut wanted = Message::new(json!({})).with_header("kind", "wanted");
        wanted.address = "a1".to_string();
        po.publish(wanted);
        assert_eq!(rx.try_recv().unwrap().header_str("kind"), Some("wanted"));
    }

    #[test]
    fn test_queue_selector_composes_with_consumer_selector() {
        let po = post_office();
        let queue_filter = CompiledFilter::compile("region = 'eu'").unwrap();
        po.add_queue(QueueDefinition::new("q1", "a1").filter(queue_filter))
            .unwrap();
        let consumer_filter = CompiledFilter::compile("kind = 'wanted'").unwrap();
        let (handle, mut rx) = ConsumerHandle::new("c1", Some(consumer_filter));
        po.attach_consumer("q1", handle).unwrap();

        // Fails the queue selector: not even parked
        let mut msg = Message::new(json!({})).with_header("kind", "wanted");
        msg.address = "a1".to_string();
        po.publish(msg);
        assert!(rx.try_recv().is_err());
        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 0);

        // Passes both selectors
        let mut msg = Message::new(json!({}))
            .with_header("region", "eu")
            .with_header("kind", "wanted");
        msg.address = "a1".to_string();
        po.publish(msg);
        assert_eq!(rx.try_recv().unwrap().header_str("region"), Some("eu"));
    }

    #[test]
    fn test_late_consumer_drains_backlog() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();

        let mut msg = Message::new(json!({})).with_header("n", 1i64);
        msg.address = "a1".to_string();
        po.publish(msg);

        let (handle, mut rx) = ConsumerHandle::new("c1", None);
        po.attach_consumer("q1", handle).unwrap();
        assert_eq!(rx.try_recv().unwrap().header_i64("n"), Some(1));
        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 0);
    }

    #[test]
    fn test_expired_message_never_delivered() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let (handle, mut rx) = ConsumerHandle::new("c1", None);
        po.attach_consumer("q1", handle).unwrap();

        let mut msg = Message::new(json!({})).with_expiration(1);
        msg.address = "a1".to_string();
        po.publish(msg);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_expire_scan_discards_backlog() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();

        let mut msg = Message::new(json!({}));
        msg.address = "a1".to_string();
        msg.expiration = Utc::now().timestamp_millis() + 5;
        po.publish(msg);
        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 1);

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(po.expire_scan(), 1);
        assert_eq!(po.get_queue("q1").unwrap().backlog_len(), 0);
    }

    #[test]
    fn test_fifo_order_preserved_per_consumer() {
        let po = post_office();
        po.add_queue(QueueDefinition::new("q1", "a1")).unwrap();
        let (handle, mut rx) = ConsumerHandle::new("c1", None);
        po.attach_consumer("q1", handle).unwrap();

        for n in 0..5i64 {
            let mut msg = Message::new(json!({})).with_header("n", n);
            msg.address = "a1".to_string();
            po.publish(msg);
        }
        for n in 0..5i64 {
            assert_eq!(rx.try_recv().unwrap().header_i64("n"), Some(n));
        }
    }
}
