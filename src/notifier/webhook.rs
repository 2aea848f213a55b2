//! HTTP sinks: Slack, Discord and a generic JSON webhook

use super::{format_message, MigrationEvent, Notifier, NotifyError};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build()
}

fn deliver(sink: &'static str, result: Result<ureq::Response, ureq::Error>) -> Result<(), NotifyError> {
    match result {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(status, _)) => Err(NotifyError::Status { sink, status }),
        Err(e) => Err(NotifyError::Transport {
            sink,
            message: e.to_string(),
        }),
    }
}

/// Posts `{"text": ...}` to a Slack incoming webhook
pub struct SlackNotifier {
    webhook_url: String,
    agent: ureq::Agent,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            agent: agent(),
        }
    }
}

impl Notifier for SlackNotifier {
    fn notify(&self, event: &MigrationEvent) -> Result<(), NotifyError> {
        let payload = json!({ "text": format_message(event) });
        deliver("slack", self.agent.post(&self.webhook_url).send_json(payload))
    }
}

/// Posts `{"content": ...}` to a Discord webhook
pub struct DiscordNotifier {
    webhook_url: String,
    agent: ureq::Agent,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            agent: agent(),
        }
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, event: &MigrationEvent) -> Result<(), NotifyError> {
        let payload = json!({ "content": format_message(event) });
        deliver("discord", self.agent.post(&self.webhook_url).send_json(payload))
    }
}

/// Posts the raw event as JSON with caller-supplied headers
pub struct WebhookNotifier {
    url: String,
    headers: HashMap<String, String>,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self {
            url,
            headers,
            agent: agent(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: &MigrationEvent) -> Result<(), NotifyError> {
        let body = serde_json::to_string(event)?;

        let mut request = self.agent.post(&self.url);
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }
        if !self.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            request = request.set("Content-Type", "application/json");
        }
        deliver("webhook", request.send_string(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::EventStatus;

    #[test]
    fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook".into(), HashMap::new());
        let err = notifier
            .notify(&MigrationEvent::new(EventStatus::Success, "ci", "app"))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport { sink: "webhook", .. }));
    }
}
