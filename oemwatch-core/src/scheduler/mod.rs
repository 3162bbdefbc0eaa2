//! Decides, for each `SourcePage`, whether now is a valid moment for a
//! cheap check and whether to escalate to a full render. Owns `SourcePage`
//! mutation; no other component writes its fields.

pub mod queue;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::info;

use crate::config::{BudgetSection, SchedulerSection};
use crate::registry::Tenant;
use crate::types::{SourcePage, SourcePageStatus};

pub use queue::{CrawlJob, CrawlQueue};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckDecision {
    pub should_check: bool,
    pub reason: String,
    pub next_check_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderDecision {
    pub should_render: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// `effectiveInterval` per `spec.md` §4.1: doubles once the page has gone
/// quiet for `backoffAfterDays`, tie-broken by integer floor.
pub fn effective_interval_minutes(
    base_interval_minutes: i64,
    consecutive_no_change: u32,
    cfg: &SchedulerSection,
) -> i64 {
    let threshold = cfg.backoff_after_days * (1440.0 / base_interval_minutes as f64);
    if consecutive_no_change as f64 >= threshold {
        (base_interval_minutes as f64 / cfg.backoff_multiplier).floor() as i64
    } else {
        base_interval_minutes
    }
}

pub fn should_check(
    page: &SourcePage,
    tenant: &Tenant,
    now: DateTime<Utc>,
    cfg: &SchedulerSection,
) -> CheckDecision {
    let base = tenant.base_interval_minutes(page.page_type);
    let effective = effective_interval_minutes(base, page.consecutive_no_change, cfg);

    match page.last_checked_at {
        None => CheckDecision {
            should_check: true,
            reason: "never checked".into(),
            next_check_at: now + ChronoDuration::minutes(effective),
        },
        Some(last_checked) => {
            let elapsed = now - last_checked;
            if elapsed < ChronoDuration::minutes(effective) {
                CheckDecision {
                    should_check: false,
                    reason: "within check interval".into(),
                    next_check_at: last_checked + ChronoDuration::minutes(effective),
                }
            } else {
                CheckDecision {
                    should_check: true,
                    reason: "interval elapsed".into(),
                    next_check_at: now + ChronoDuration::minutes(effective),
                }
            }
        }
    }
}

pub fn should_render(
    page: &SourcePage,
    tenant: &Tenant,
    new_fingerprint: &str,
    now: DateTime<Utc>,
    cfg: &SchedulerSection,
) -> RenderDecision {
    if let Some(last_rendered) = page.last_rendered_at {
        let elapsed = now - last_rendered;
        if elapsed < ChronoDuration::minutes(cfg.max_render_interval_minutes) {
            return RenderDecision {
                should_render: false,
                reason: "render rate limit".into(),
            };
        }
    }

    if tenant.requires_browser_rendering {
        return RenderDecision {
            should_render: true,
            reason: "tenant requires browser rendering".into(),
        };
    }

    if page.last_normalized_fingerprint.as_deref() == Some(new_fingerprint) {
        return RenderDecision {
            should_render: false,
            reason: "HTML hash unchanged — cost control".into(),
        };
    }

    RenderDecision {
        should_render: true,
        reason: "HTML fingerprint changed".into(),
    }
}

/// Render-budget gating consulted by the driver before dispatching a
/// render. At `warning_threshold_ratio` of either cap the render is still
/// allowed, with a warning reason attached for observability.
pub fn check_render_budget(
    tenant_monthly_count: u32,
    global_monthly_count: u32,
    cfg: &BudgetSection,
) -> BudgetDecision {
    if tenant_monthly_count >= cfg.monthly_render_cap_per_oem {
        return BudgetDecision {
            allowed: false,
            reason: Some("tenant monthly render cap exceeded".into()),
        };
    }
    if global_monthly_count >= cfg.monthly_render_cap_global {
        return BudgetDecision {
            allowed: false,
            reason: Some("global monthly render cap exceeded".into()),
        };
    }

    let tenant_ratio = tenant_monthly_count as f64 / cfg.monthly_render_cap_per_oem as f64;
    let global_ratio = global_monthly_count as f64 / cfg.monthly_render_cap_global as f64;
    if tenant_ratio >= cfg.warning_threshold_ratio || global_ratio >= cfg.warning_threshold_ratio {
        return BudgetDecision {
            allowed: true,
            reason: Some("approaching render budget cap".into()),
        };
    }

    BudgetDecision {
        allowed: true,
        reason: None,
    }
}

/// Atomic state update applied after a crawl completes, per `spec.md`
/// §4.1 "State update after a crawl".
pub fn apply_crawl_result(page: &mut SourcePage, now: DateTime<Utc>, html_changed: bool, rendered: bool) {
    page.last_checked_at = Some(now);
    if html_changed {
        page.last_changed_at = Some(now);
        page.consecutive_no_change = 0;
    } else {
        page.consecutive_no_change += 1;
    }
    if rendered {
        page.last_rendered_at = Some(now);
    }
    info!(
        target: "scheduler",
        page_id = %page.id,
        html_changed,
        rendered,
        consecutive_no_change = page.consecutive_no_change,
        "crawl state updated"
    );
}

/// Unreachable-page failure mode: stamp `last_checked_at` anyway so the
/// scheduler doesn't hot-loop retries; the scheduler itself never retries.
pub fn mark_unreachable(page: &mut SourcePage, now: DateTime<Utc>, message: impl Into<String>) {
    page.status = SourcePageStatus::Error;
    page.last_error = Some(message.into());
    page.last_checked_at = Some(now);
}
