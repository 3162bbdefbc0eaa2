//! Self-healing selector state machine (`spec.md` §4.4). Each extraction
//! slot owns one `SelectorConfig`; failures escalate from the cached
//! selector (L2) to LLM-assisted repair (L3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, SelectorRepairRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionLayer {
    L2Fast,
    L3Adaptive,
    L4Discovery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    L2Success(String),
    L2Failed,
    L3Success(String),
    L3Failed,
}

impl SlotOutcome {
    pub fn layer(&self) -> ExtractionLayer {
        match self {
            SlotOutcome::L2Success(_) | SlotOutcome::L2Failed => ExtractionLayer::L2Fast,
            SlotOutcome::L3Success(_) | SlotOutcome::L3Failed => ExtractionLayer::L3Adaptive,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            SlotOutcome::L2Success(v) | SlotOutcome::L3Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn repaired(&self) -> bool {
        matches!(self, SlotOutcome::L3Success(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub selector: String,
    pub semantic: String,
    pub last_verified: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub failure_count: u32,
    pub hit_count: u32,
    pub repair_count: u32,
}

impl SelectorConfig {
    pub fn new(selector: impl Into<String>, semantic: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            semantic: semantic.into(),
            last_verified: None,
            success_rate: 1.0,
            failure_count: 0,
            hit_count: 0,
            repair_count: 0,
        }
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        self.success_rate = 0.9 * self.success_rate + 0.1;
        self.failure_count = 0;
        self.hit_count += 1;
        self.last_verified = Some(now);
    }

    fn record_failure(&mut self) {
        self.success_rate = 0.9 * self.success_rate;
        self.failure_count += 1;
    }

    /// Runs the cached selector against `dom`, escalating to LLM repair
    /// once `failure_count` reaches `failure_threshold`. `try_selector`
    /// is the caller-supplied DOM query (kept generic so this module has
    /// no HTML-parsing dependency of its own).
    pub async fn extract<F>(
        &mut self,
        dom: &str,
        url: &str,
        tenant_id: &str,
        failure_threshold: u32,
        max_dom_size: usize,
        llm: &dyn LlmClient,
        try_selector: F,
    ) -> SlotOutcome
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        let now = Utc::now();
        if let Some(value) = try_selector(&self.selector, dom) {
            self.record_success(now);
            return SlotOutcome::L2Success(value);
        }

        self.record_failure();
        if self.failure_count < failure_threshold {
            return SlotOutcome::L2Failed;
        }

        let truncated = truncate_dom(dom, max_dom_size);
        let request = SelectorRepairRequest {
            semantic: self.semantic.clone(),
            old_selector: self.selector.clone(),
            dom: truncated,
            url: url.to_string(),
            tenant_id: tenant_id.to_string(),
        };

        let candidate = match llm.repair_selector(request).await {
            Ok(response) => response.selector,
            Err(_) => return SlotOutcome::L3Failed,
        };

        let candidate = match parse_selector_candidate(&candidate) {
            Some(c) => c,
            None => return SlotOutcome::L3Failed,
        };

        match try_selector(&candidate, dom) {
            Some(value) => {
                self.selector = candidate;
                self.repair_count += 1;
                self.record_success(now);
                SlotOutcome::L3Success(value)
            }
            None => SlotOutcome::L3Failed,
        }
    }
}

/// Truncates `dom` to `max_len` chars, appending a truncation marker, per
/// `spec.md` §4.4's LLM repair request shape.
pub fn truncate_dom(dom: &str, max_len: usize) -> String {
    if dom.chars().count() <= max_len {
        return dom.to_string();
    }
    let truncated: String = dom.chars().take(max_len).collect();
    format!("{truncated}…[truncated]")
}

/// Best-effort parse of an LLM selector-repair response: strip code
/// fences and wrapping quotes, reject empty/oversized/malformed output.
/// Per `spec.md` §9, parsing never re-queries on failure.
pub fn parse_selector_candidate(raw: &str) -> Option<String> {
    let mut candidate = raw.trim();
    if candidate.starts_with("```") {
        candidate = candidate.trim_start_matches("```css").trim_start_matches("```");
        candidate = candidate.trim_end_matches("```");
        candidate = candidate.trim();
    }
    let candidate = candidate.trim_matches(|c| c == '"' || c == '\'').trim();

    if candidate.is_empty() || candidate.chars().count() > 500 {
        return None;
    }
    let first = candidate.chars().next()?;
    if first == '.' || first == '#' || first == '[' || first.is_alphanumeric() || first == '_' {
        Some(candidate.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, SelectorRepairResponse};
    use async_trait::async_trait;

    struct StaticRepair {
        selector: String,
    }

    #[async_trait]
    impl LlmClient for StaticRepair {
        async fn repair_selector(
            &self,
            _request: SelectorRepairRequest,
        ) -> std::result::Result<SelectorRepairResponse, LlmError> {
            Ok(SelectorRepairResponse {
                selector: self.selector.clone(),
            })
        }
    }

    #[test]
    fn success_rate_stays_in_unit_interval() {
        let mut selector = SelectorConfig::new(".price", "price");
        for _ in 0..50 {
            selector.record_failure();
        }
        assert!(selector.success_rate >= 0.0 && selector.success_rate <= 1.0);
        for _ in 0..50 {
            selector.record_success(Utc::now());
        }
        assert!(selector.success_rate >= 0.0 && selector.success_rate <= 1.0);
    }

    #[tokio::test]
    async fn drifted_selector_repairs_via_llm() {
        let llm = StaticRepair {
            selector: r#"[data-testid="variant-price"]"#.into(),
        };
        let mut selector = SelectorConfig::new(".price-value", "vehicle price");
        let dom = r#"<span data-testid="variant-price">$29990</span>"#;

        let try_selector = |sel: &str, dom: &str| -> Option<String> {
            if sel == ".price-value" {
                None
            } else if dom.contains(sel.trim_start_matches('[').trim_end_matches(']')) {
                Some("$29990".to_string())
            } else {
                None
            }
        };

        let outcome = selector
            .extract(dom, "https://x", "bmw", 2, 50_000, &llm, try_selector)
            .await;
        assert_eq!(outcome, SlotOutcome::L2Failed);
        let outcome = selector
            .extract(dom, "https://x", "bmw", 2, 50_000, &llm, try_selector)
            .await;
        assert!(matches!(outcome, SlotOutcome::L3Success(_)));
        assert_eq!(selector.selector, r#"[data-testid="variant-price"]"#);
        assert_eq!(selector.repair_count, 1);
        assert_eq!(selector.failure_count, 0);
    }

    #[test]
    fn parse_rejects_malformed_candidates() {
        assert!(parse_selector_candidate("").is_none());
        assert!(parse_selector_candidate(&"a".repeat(501)).is_none());
        assert!(parse_selector_candidate("!!!not-a-selector").is_none());
        assert_eq!(
            parse_selector_candidate("```css\n.price-value\n```").as_deref(),
            Some(".price-value")
        );
        assert_eq!(
            parse_selector_candidate("\"#price\"").as_deref(),
            Some("#price")
        );
    }
}
