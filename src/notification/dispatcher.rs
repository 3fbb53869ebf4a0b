use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;

use crate::metrics::{NOTIFICATIONS_DROPPED_TOTAL, NOTIFICATIONS_EMITTED_TOTAL};
use crate::routing::{Message, PostOffice};

use super::types::NotificationRecord;

/// Statistics for the notification dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Notifications published to at least one bound queue
    pub total_emitted: AtomicU64,
    /// Notifications dropped because nothing was bound to the address
    pub total_dropped: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_emitted: self.total_emitted.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_emitted: u64,
    pub total_dropped: u64,
}

/// Publishes notification records onto the management notification address.
///
/// The dispatcher rides the same routing fabric as ordinary messages: the
/// post office fans the record out to every queue bound to the notification
/// address, and per-consumer selectors are evaluated there. Delivery is
/// best-effort and synchronous with the triggering operation; a record with
/// no subscriber is silently dropped, and nothing here ever fails the
/// operation that raised the event.
pub struct NotificationDispatcher {
    post_office: Arc<PostOffice>,
    address: String,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    pub fn new(post_office: Arc<PostOffice>, address: impl Into<String>) -> Self {
        Self {
            post_office,
            address: address.into(),
            stats: DispatcherStats::default(),
        }
    }

    /// The management notification address this dispatcher publishes to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Publish one notification record.
    pub fn dispatch(&self, record: NotificationRecord) {
        let kind = record.kind;
        let message = self.to_message(record);
        let routed = self.post_office.publish(message);

        if routed == 0 {
            self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
            NOTIFICATIONS_DROPPED_TOTAL.inc();
            tracing::debug!(kind = %kind, "Notification dropped, no subscriber queue bound");
        } else {
            self.stats.total_emitted.fetch_add(1, Ordering::Relaxed);
            NOTIFICATIONS_EMITTED_TOTAL
                .with_label_values(&[kind.as_str()])
                .inc();
            tracing::debug!(kind = %kind, routed = routed, "Notification published");
        }
    }

    /// Publish the records of one causal chain, in order.
    ///
    /// Records are handed to the post office sequentially and every queue
    /// buffer is FIFO, so each subscriber observes the chain in this order.
    /// Nothing is guaranteed about interleaving with unrelated chains.
    pub fn dispatch_chain(&self, records: SmallVec<[NotificationRecord; 2]>) {
        for record in records {
            self.dispatch(record);
        }
    }

    /// Convert a record into a routable message. The message timestamp is the
    /// record's construction time, so it always equals the
    /// `_NOTIF_TIMESTAMP` header.
    fn to_message(&self, record: NotificationRecord) -> Message {
        let mut message = Message::new(serde_json::Value::Null);
        message.address = self.address.clone();
        message.timestamp = record.created_at;
        message.headers = record.attributes;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationBuilder;
    use crate::routing::{ConsumerHandle, QueueDefinition};
    use crate::schema::{keys, NotificationKind};

    fn record() -> NotificationRecord {
        NotificationBuilder::new(NotificationKind::BindingAdded)
            .routing_name("q1")
            .address("a1")
            .build()
    }

    #[test]
    fn test_dispatch_without_subscriber_is_dropped() {
        let po = Arc::new(PostOffice::new());
        let dispatcher = NotificationDispatcher::new(po, "notif");

        dispatcher.dispatch(record());

        let stats = dispatcher.stats();
        assert_eq!(stats.total_emitted, 0);
        assert_eq!(stats.total_dropped, 1);
    }

    #[test]
    fn test_dispatch_reaches_bound_subscriber() {
        let po = Arc::new(PostOffice::new());
        po.add_queue(QueueDefinition::new("notif-q", "notif")).unwrap();
        let (handle, mut rx) = ConsumerHandle::new("sub", None);
        po.attach_consumer("notif-q", handle).unwrap();

        let dispatcher = NotificationDispatcher::new(po, "notif");
        let built = record();
        let created_at = built.created_at;
        dispatcher.dispatch(built);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.header_str(keys::NOTIFICATION_TYPE), Some("BINDING_ADDED"));
        assert_eq!(message.timestamp, created_at);
        assert_eq!(
            message.header_i64(keys::NOTIFICATION_TIMESTAMP),
            Some(created_at)
        );
        assert_eq!(dispatcher.stats().total_emitted, 1);
    }

    #[test]
    fn test_chain_order_preserved() {
        let po = Arc::new(PostOffice::new());
        po.add_queue(QueueDefinition::new("notif-q", "notif")).unwrap();
        let (handle, mut rx) = ConsumerHandle::new("sub", None);
        po.attach_consumer("notif-q", handle).unwrap();

        let dispatcher = NotificationDispatcher::new(po, "notif");
        let first = NotificationBuilder::new(NotificationKind::AddressAdded)
            .address("a1")
            .routing_type(0)
            .build();
        let second = record();
        dispatcher.dispatch_chain(smallvec::smallvec![first, second]);

        assert_eq!(
            rx.try_recv().unwrap().header_str(keys::NOTIFICATION_TYPE),
            Some("ADDRESS_ADDED")
        );
        assert_eq!(
            rx.try_recv().unwrap().header_str(keys::NOTIFICATION_TYPE),
            Some("BINDING_ADDED")
        );
    }
}
