// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain layer (business logic)
pub mod broker;
pub mod filter;
pub mod notification;
pub mod plugin;
pub mod routing;
pub mod schema;

pub use broker::{Broker, Connection, Consumer, Producer, Session};
pub use error::{BrokerError, Result};
