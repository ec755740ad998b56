//! Outbound notifications to account owners.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// A message addressed to a single recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Alert sent when a refresh comes from a different address than the one the
    /// access token was issued to.
    #[must_use]
    pub fn ip_change(to: &str, previous_ip: &str, current_ip: &str) -> Self {
        let previous_ip = if previous_ip.is_empty() {
            "unknown"
        } else {
            previous_ip
        };
        let current_ip = if current_ip.is_empty() {
            "unknown"
        } else {
            current_ip
        };
        Self {
            to: to.to_string(),
            subject: "New sign-in location detected".to_string(),
            body: format!(
                "Your session was refreshed from {current_ip}; it was previously used from {previous_ip}. \
                 If this was not you, sign in again and change your password."
            ),
        }
    }
}

/// Delivery abstraction. Callers treat failures as non-fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// # Errors
    /// Returns an error if the message could not be delivered.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Logs the notification instead of delivering it.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            to_email = %notification.to,
            subject = %notification.subject,
            body = %notification.body,
            "notification send stub"
        );
        Ok(())
    }
}
