use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub expiry: ExpiryConfig,
}

/// Management notification configuration.
///
/// The category toggles are read once into this struct at broker construction
/// and never mutated afterwards; the notification plugin consults them on
/// every event. Binding, consumer, and session notifications have no toggle
/// and are always emitted.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Address every management notification is published to
    #[serde(default = "default_notification_address")]
    pub address: String,
    /// Emit ADDRESS_ADDED / ADDRESS_REMOVED
    #[serde(default)]
    pub send_address_notifications: bool,
    /// Emit CONNECTION_CREATED / CONNECTION_DESTROYED
    #[serde(default)]
    pub send_connection_notifications: bool,
    /// Emit MESSAGE_DELIVERED
    #[serde(default)]
    pub send_delivered_notifications: bool,
    /// Emit MESSAGE_EXPIRED
    #[serde(default)]
    pub send_expired_notifications: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiryConfig {
    /// Interval between backlog expiry scans in milliseconds
    #[serde(default = "default_scan_period_ms")]
    pub scan_period_ms: u64,
}

fn default_notification_address() -> String {
    crate::notification::MANAGEMENT_NOTIFICATION_ADDRESS.to_string()
}

fn default_scan_period_ms() -> u64 {
    30_000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default(
                "notification.address",
                crate::notification::MANAGEMENT_NOTIFICATION_ADDRESS,
            )?
            .set_default("notification.send_address_notifications", false)?
            .set_default("notification.send_connection_notifications", false)?
            .set_default("notification.send_delivered_notifications", false)?
            .set_default("notification.send_expired_notifications", false)?
            .set_default("expiry.scan_period_ms", 30_000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // NOTIFICATION_ADDRESS, EXPIRY_SCAN_PERIOD_MS, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// Settings for an embedded broker with every notification category on.
    pub fn all_notifications() -> Self {
        Self {
            notification: NotificationConfig {
                send_address_notifications: true,
                send_connection_notifications: true,
                send_delivered_notifications: true,
                send_expired_notifications: true,
                ..Default::default()
            },
            expiry: ExpiryConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            address: default_notification_address(),
            send_address_notifications: false,
            send_connection_notifications: false,
            send_delivered_notifications: false,
            send_expired_notifications: false,
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            scan_period_ms: default_scan_period_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let notification = NotificationConfig::default();
        assert_eq!(
            notification.address,
            crate::notification::MANAGEMENT_NOTIFICATION_ADDRESS
        );
        assert!(!notification.send_address_notifications);
        assert!(!notification.send_delivered_notifications);

        let expiry = ExpiryConfig::default();
        assert_eq!(expiry.scan_period_ms, 30_000);
    }

    #[test]
    fn test_all_notifications() {
        let settings = Settings::all_notifications();
        assert!(settings.notification.send_address_notifications);
        assert!(settings.notification.send_connection_notifications);
        assert!(settings.notification.send_delivered_notifications);
        assert!(settings.notification.send_expired_notifications);
    }
}
