//! Ordered alert-routing rule table plus the hourly/daily batcher
//! (`spec.md` §4.6). A flat table replaces the inheritance hierarchy the
//! original `AlertRule` class used (`spec.md` §9).

use std::collections::HashMap;

use crate::types::{AlertChannel, ChangeEvent, EntityKind, FieldDiff};

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub entity_type: EntityKind,
    pub field: &'static str,
    pub channel: AlertChannel,
}

/// Scanned linearly (≤ 30 entries); the first meaningful change with a
/// matching rule wins.
pub fn rule_table() -> Vec<AlertRule> {
    vec![
        AlertRule {
            entity_type: EntityKind::Product,
            field: "price_amount",
            channel: AlertChannel::SlackImmediate,
        },
        AlertRule {
            entity_type: EntityKind::Product,
            field: "availability",
            channel: AlertChannel::SlackImmediate,
        },
        AlertRule {
            entity_type: EntityKind::Product,
            field: "title",
            channel: AlertChannel::SlackImmediate,
        },
        AlertRule {
            entity_type: EntityKind::Offer,
            field: "price_amount",
            channel: AlertChannel::SlackImmediate,
        },
        AlertRule {
            entity_type: EntityKind::Offer,
            field: "saving_amount",
            channel: AlertChannel::SlackImmediate,
        },
        AlertRule {
            entity_type: EntityKind::Offer,
            field: "valid_to",
            channel: AlertChannel::SlackBatchHourly,
        },
        AlertRule {
            entity_type: EntityKind::Banner,
            field: "headline",
            channel: AlertChannel::SlackBatchHourly,
        },
        AlertRule {
            entity_type: EntityKind::Banner,
            field: "cta_url",
            channel: AlertChannel::SlackBatchHourly,
        },
    ]
}

fn default_channel(entity_type: EntityKind) -> AlertChannel {
    match entity_type {
        EntityKind::Product => AlertChannel::SlackImmediate,
        EntityKind::Offer => AlertChannel::SlackImmediate,
        EntityKind::Banner => AlertChannel::SlackBatchHourly,
    }
}

/// Routes the first matching meaningful field diff to a channel, falling
/// back to the entity-type default when no rule matches.
pub fn route(entity_type: EntityKind, diffs: &[FieldDiff], rules: &[AlertRule]) -> AlertChannel {
    for diff in diffs.iter().filter(|d| d.is_meaningful) {
        if let Some(rule) = rules
            .iter()
            .find(|r| r.entity_type == entity_type && r.field == diff.field)
        {
            return rule.channel;
        }
    }
    default_channel(entity_type)
}

/// Accumulates change analyses for the batched channels. Ticking is
/// owned by the driver, not this type; `drain_hourly`/`drain_daily`
/// return the accumulated list per tenant and clear it.
#[derive(Debug, Default)]
pub struct Batcher {
    hourly: HashMap<String, Vec<ChangeEvent>>,
    daily: HashMap<String, Vec<ChangeEvent>>,
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, channel: AlertChannel, event: ChangeEvent) {
        match channel {
            AlertChannel::SlackBatchHourly => {
                self.hourly.entry(event.tenant_id.clone()).or_default().push(event);
            }
            AlertChannel::SlackBatchDaily => {
                self.daily.entry(event.tenant_id.clone()).or_default().push(event);
            }
            _ => {}
        }
    }

    pub fn hourly_batch(&self, tenant_id: &str) -> Vec<ChangeEvent> {
        self.hourly.get(tenant_id).cloned().unwrap_or_default()
    }

    pub fn daily_batch(&self, tenant_id: &str) -> Vec<ChangeEvent> {
        self.daily.get(tenant_id).cloned().unwrap_or_default()
    }

    pub fn clear_hourly(&mut self, tenant_id: &str) {
        self.hourly.remove(tenant_id);
    }

    pub fn clear_daily(&mut self, tenant_id: &str) {
        self.daily.remove(tenant_id);
    }

    /// Drains and clears the hourly batch for every tenant in one pass,
    /// as the driver's tick handler would.
    pub fn drain_all_hourly(&mut self) -> HashMap<String, Vec<ChangeEvent>> {
        std::mem::take(&mut self.hourly)
    }

    pub fn drain_all_daily(&mut self) -> HashMap<String, Vec<ChangeEvent>> {
        std::mem::take(&mut self.daily)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, Severity};
    use chrono::Utc;

    fn diff(field: &str, meaningful: bool) -> FieldDiff {
        FieldDiff {
            field: field.to_string(),
            old_value: serde_json::Value::Null,
            new_value: serde_json::Value::Null,
            is_meaningful: meaningful,
        }
    }

    fn event(tenant_id: &str) -> ChangeEvent {
        ChangeEvent {
            id: "evt1".into(),
            tenant_id: tenant_id.into(),
            import_run_id: "run1".into(),
            entity_type: EntityKind::Banner,
            entity_id: "banner1".into(),
            event_type: EventType::Updated,
            severity: Severity::Medium,
            summary: "headline changed".into(),
            diff: vec![],
            notified_at: None,
            notification_channel: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn matching_rule_wins_over_default() {
        let rules = rule_table();
        let diffs = vec![diff("price_amount", true)];
        assert_eq!(route(EntityKind::Product, &diffs, &rules), AlertChannel::SlackImmediate);
    }

    #[test]
    fn unmatched_field_falls_back_to_entity_default() {
        let rules = rule_table();
        let diffs = vec![diff("subtitle", true)];
        assert_eq!(route(EntityKind::Banner, &diffs, &rules), AlertChannel::SlackBatchHourly);
    }

    #[test]
    fn batcher_clear_then_empty() {
        let mut batcher = Batcher::new();
        batcher.enqueue(AlertChannel::SlackBatchHourly, event("bmw"));
        assert_eq!(batcher.hourly_batch("bmw").len(), 1);
        batcher.clear_hourly("bmw");
        assert!(batcher.hourly_batch("bmw").is_empty());
    }
}
