//! Best-effort delivery of migration outcomes to chat and HTTP sinks
//!
//! Delivery failures are reported to the caller as [`NotifyError`] but the
//! manager only logs them; a broken webhook never fails a migration.

mod webhook;

pub use webhook::{DiscordNotifier, SlackNotifier, WebhookNotifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{sink} webhook status {status}")]
    Status { sink: &'static str, status: u16 },
    #[error("{sink} webhook request failed: {message}")]
    Transport { sink: &'static str, message: String },
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a migration call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Fail,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventStatus::Success => "success",
            EventStatus::Fail => "fail",
        })
    }
}

/// What happened, by whom, where
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationEvent {
    pub status: EventStatus,
    pub user: String,
    /// Version after the call, empty when unknown
    pub version: String,
    pub database: String,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl MigrationEvent {
    pub fn new(status: EventStatus, user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            status,
            user: user.into(),
            version: String::new(),
            database: database.into(),
            duration: Duration::ZERO,
            error: None,
            time: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// One-line human summary used by the chat sinks
///
/// `success migration version 3 on orders by alice`
pub fn format_message(event: &MigrationEvent) -> String {
    let mut msg = format!("{} migration", event.status);
    if !event.version.is_empty() {
        msg.push_str(&format!(" version {}", event.version));
    }
    if !event.database.is_empty() {
        msg.push_str(&format!(" on {}", event.database));
    }
    if !event.user.is_empty() {
        msg.push_str(&format!(" by {}", event.user));
    }
    if let Some(err) = &event.error {
        msg.push_str(&format!(": {}", err));
    }
    msg
}

/// A sink for migration events
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &MigrationEvent) -> Result<(), NotifyError>;
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &MigrationEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// `notifier.*` configuration keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// `slack`, `discord` or `webhook`
    pub kind: String,
    pub slack: ChatWebhookConfig,
    pub discord: ChatWebhookConfig,
    pub webhook: HttpWebhookConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChatWebhookConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpWebhookConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Pick the configured sink
///
/// Falls back to [`NoopNotifier`] when notifications are disabled, the kind
/// is unknown, or the selected sink has no URL.
pub fn notifier_from_config(cfg: &NotifierConfig) -> Box<dyn Notifier> {
    if !cfg.enabled {
        return Box::new(NoopNotifier);
    }
    match cfg.kind.to_lowercase().as_str() {
        "slack" if !cfg.slack.webhook_url.is_empty() => {
            Box::new(SlackNotifier::new(cfg.slack.webhook_url.clone()))
        }
        "discord" if !cfg.discord.webhook_url.is_empty() => {
            Box::new(DiscordNotifier::new(cfg.discord.webhook_url.clone()))
        }
        "webhook" if !cfg.webhook.url.is_empty() => Box::new(WebhookNotifier::new(
            cfg.webhook.url.clone(),
            cfg.webhook.headers.clone(),
        )),
        other => {
            tracing::debug!(kind = other, "notifier incomplete, notifications disabled");
            Box::new(NoopNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message() {
        let event = MigrationEvent::new(EventStatus::Success, "alice", "orders").with_version("3");
        assert_eq!(format_message(&event), "success migration version 3 on orders by alice");

        let event = MigrationEvent::new(EventStatus::Fail, "", "").with_error("dirty at version 2");
        assert_eq!(format_message(&event), "fail migration: dirty at version 2");
    }

    #[test]
    fn test_event_json_shape() {
        let event = MigrationEvent::new(EventStatus::Fail, "bob", "app")
            .with_version("7")
            .with_duration(Duration::from_millis(1500))
            .with_error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["error"], "boom");
        assert!(json["time"].is_string());
    }

    #[test]
    fn test_factory_falls_back_to_noop() {
        let disabled = NotifierConfig {
            enabled: false,
            kind: "slack".into(),
            ..Default::default()
        };
        assert!(notifier_from_config(&disabled)
            .notify(&MigrationEvent::new(EventStatus::Success, "a", "b"))
            .is_ok());

        let missing_url = NotifierConfig {
            enabled: true,
            kind: "discord".into(),
            ..Default::default()
        };
        // Would fail with a transport error if a real sink had been built
        assert!(notifier_from_config(&missing_url)
            .notify(&MigrationEvent::new(EventStatus::Success, "a", "b"))
            .is_ok());
    }
}
