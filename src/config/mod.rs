mod settings;

pub use settings::{ExpiryConfig, NotificationConfig, Settings};
