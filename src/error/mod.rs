use thiserror::Error;

/// Crate-wide error type.
///
/// No variant of this enum is ever allowed to unwind out of the notification
/// path into the broker operation that triggered it; failures there are logged
/// and swallowed at the plugin chain boundary. The variants that do reach
/// callers surface at subscription or lifecycle time.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unknown notification kind: {0}")]
    UnknownNotificationKind(String),

    #[error("Filter syntax error: {0}")]
    FilterSyntax(String),

    #[error("Queue already exists: {0}")]
    QueueExists(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("{0} is closed")]
    ObjectClosed(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
