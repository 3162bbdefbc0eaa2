//! Platform-agnostic notification transport (`spec.md` §6) and the
//! Slack-like block payload it carries. Grounded on the teacher's
//! `IncidentNotifier`: channel-keyed dispatch with a retry-on-failure and
//! a dedup marker (here, `ChangeEvent.notified_at`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AlertChannel, ChangeEvent, Severity};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header { text: String },
    Section { fields: Vec<MrkdwnField> },
    Actions { buttons: Vec<ActionButton> },
    Context { text: String },
    Divider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MrkdwnField {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl MrkdwnField {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionButton {
    pub text: String,
    pub url: String,
    pub action_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub blocks: Vec<Block>,
    pub text: String,
}

/// Builds the payload for a single `ChangeEvent`, per `spec.md` §6.
pub fn build_payload(event: &ChangeEvent, tenant_display_name: &str, page_url: &str) -> NotificationPayload {
    let severity_label = match event.severity {
        Severity::Critical => "CRITICAL",
        Severity::High => "HIGH",
        Severity::Medium => "MEDIUM",
        Severity::Low => "LOW",
    };
    let header = format!("{severity_label}: {tenant_display_name} — {}", event.entity_type.as_str());
    let blocks = vec![
        Block::Header { text: header },
        Block::Section {
            fields: vec![
                MrkdwnField::new(format!("*Event*\n{}", event.event_type.as_str())),
                MrkdwnField::new(format!("*Summary*\n{}", event.summary)),
            ],
        },
        Block::Actions {
            buttons: vec![ActionButton {
                text: "View page".into(),
                url: page_url.to_string(),
                action_id: "view_page".into(),
            }],
        },
        Block::Divider,
    ];
    NotificationPayload {
        text: event.summary.clone(),
        blocks,
    }
}

/// Builds a single payload summarizing a batch of accumulated events for
/// the hourly/daily channels.
pub fn build_batch_payload(tenant_display_name: &str, events: &[ChangeEvent]) -> NotificationPayload {
    let header = format!("{tenant_display_name}: {} changes", events.len());
    let mut blocks = vec![Block::Header { text: header }];
    for event in events {
        blocks.push(Block::Context {
            text: event.summary.clone(),
        });
    }
    let text = events
        .iter()
        .map(|e| e.summary.clone())
        .collect::<Vec<_>>()
        .join("; ");
    NotificationPayload { blocks, text }
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn post(&self, channel: AlertChannel, payload: NotificationPayload) -> Result<()>;
}

pub struct WebhookTransport {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookTransport {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn post(&self, _channel: AlertChannel, payload: NotificationPayload) -> Result<()> {
        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// No-op transport used in tests and dry-run CLI invocations.
pub struct NullTransport {
    pub sent: tokio::sync::Mutex<Vec<(AlertChannel, NotificationPayload)>>,
}

impl Default for NullTransport {
    fn default() -> Self {
        Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NotificationTransport for NullTransport {
    async fn post(&self, channel: AlertChannel, payload: NotificationPayload) -> Result<()> {
        self.sent.lock().await.push((channel, payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use crate::types::EventType;
    use chrono::Utc;

    fn event() -> ChangeEvent {
        ChangeEvent {
            id: "evt1".into(),
            tenant_id: "bmw".into(),
            import_run_id: "run1".into(),
            entity_type: EntityKind::Product,
            entity_id: "p1".into(),
            event_type: EventType::PriceChanged,
            severity: Severity::Critical,
            summary: "product X5: price changed from $50000 to $49000".into(),
            diff: vec![],
            notified_at: None,
            notification_channel: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn payload_includes_severity_and_summary() {
        let payload = build_payload(&event(), "BMW", "https://bmw.example/x5");
        assert!(payload.text.contains("price changed"));
        assert!(matches!(payload.blocks[0], Block::Header { .. }));
    }

    #[tokio::test]
    async fn null_transport_records_dispatch() {
        let transport = NullTransport::default();
        let payload = build_payload(&event(), "BMW", "https://bmw.example/x5");
        transport.post(AlertChannel::SlackImmediate, payload).await.unwrap();
        assert_eq!(transport.sent.lock().await.len(), 1);
    }
}
