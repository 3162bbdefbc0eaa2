//! Health-tracked cache of known JSON API endpoints (`spec.md` §4.4 "API
//! slot cache").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedApi {
    pub endpoint: String,
    pub hit_count: u32,
    pub miss_count: u32,
    pub avg_response_time_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl CachedApi {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            hit_count: 0,
            miss_count: 0,
            avg_response_time_ms: 0.0,
            last_success: None,
            last_failure: None,
        }
    }

    /// Invariant 6: `isHealthy = false` iff `missCount > 3 AND
    /// lastFailure > lastSuccess`.
    pub fn is_healthy(&self) -> bool {
        !(self.miss_count > 3 && self.last_failure_after_success())
    }

    fn last_failure_after_success(&self) -> bool {
        match (self.last_failure, self.last_success) {
            (Some(failure), Some(success)) => failure > success,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn record_success(&mut self, response_time_ms: f64, now: DateTime<Utc>) {
        self.hit_count += 1;
        self.avg_response_time_ms = 0.9 * self.avg_response_time_ms + 0.1 * response_time_ms;
        self.last_success = Some(now);
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.miss_count += 1;
        self.last_failure = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unhealthy_only_when_misses_exceed_three_and_recent() {
        let mut api = CachedApi::new("https://x/api/products.json");
        let base = Utc::now();
        for i in 0..4 {
            api.record_failure(base + Duration::seconds(i));
        }
        assert!(api.is_healthy());

        api.record_success(50.0, base - Duration::seconds(10));
        assert!(!api.is_healthy());

        api.record_success(50.0, base + Duration::seconds(100));
        assert!(api.is_healthy());
    }
}
