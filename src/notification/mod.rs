//! Management notification records, building, and dispatching.
//!
//! Broker lifecycle events are turned into immutable [`NotificationRecord`]s
//! by the [`NotificationBuilder`], then published to the management
//! notification address by the [`NotificationDispatcher`]. Subscribers are
//! ordinary consumers on that address, optionally filtered with selector
//! expressions over the record's attributes (see [`crate::filter`]).

mod builder;
mod dispatcher;
mod types;

pub use builder::NotificationBuilder;
pub use dispatcher::{DispatcherStats, DispatcherStatsSnapshot, NotificationDispatcher};
pub use types::{AttrMap, AttrValue, NotificationRecord, MANAGEMENT_NOTIFICATION_ADDRESS};
