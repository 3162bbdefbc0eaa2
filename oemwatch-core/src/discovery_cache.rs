//! Per-tenant extraction cache: selector map, API endpoint health, and
//! rolling extraction statistics. Process-wide but passed around as an
//! explicit value (`spec.md` §9 "global singletons → dependency
//! injection") rather than held in a static.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extraction::api_cache::CachedApi;
use crate::extraction::selector::SelectorConfig;

const STATS_RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStatSample {
    pub success: bool,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregateStats {
    pub total_extractions: u64,
    pub successful_extractions: u64,
    pub failed_extractions: u64,
    pub success_rate: f64,
    pub avg_extraction_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryCache {
    pub tenant_id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub selectors: HashMap<String, SelectorConfig>,
    pub apis: HashMap<String, CachedApi>,
    #[serde(default)]
    recent_stats: VecDeque<ExtractionStatSample>,
    pub aggregate: AggregateStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHealthSummary {
    pub has_cache: bool,
    pub selector_count: usize,
    pub healthy_selector_count: usize,
    pub api_count: usize,
    pub healthy_api_count: usize,
    pub success_rate: f64,
    pub last_extraction: Option<DateTime<Utc>>,
}

impl DiscoveryCache {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            version: 1,
            created_at: now,
            updated_at: now,
            selectors: HashMap::new(),
            apis: HashMap::new(),
            recent_stats: VecDeque::with_capacity(STATS_RING_CAPACITY),
            aggregate: AggregateStats::default(),
        }
    }

    pub fn get_selector(&self, slot: &str) -> Option<&SelectorConfig> {
        self.selectors.get(slot)
    }

    pub fn set_selector(&mut self, slot: impl Into<String>, config: SelectorConfig) {
        self.selectors.insert(slot.into(), config);
        self.updated_at = Utc::now();
    }

    pub fn get_api(&self, endpoint: &str) -> Option<&CachedApi> {
        self.apis.get(endpoint)
    }

    pub fn update_api(&mut self, endpoint: impl Into<String>, api: CachedApi) {
        self.apis.insert(endpoint.into(), api);
        self.updated_at = Utc::now();
    }

    /// Appends a sample to the 100-entry ring buffer and recomputes the
    /// aggregate stats (EMA 0.9/0.1 on extraction time).
    pub fn append_stat(&mut self, success: bool, duration_ms: u64) {
        let now = Utc::now();
        if self.recent_stats.len() == STATS_RING_CAPACITY {
            self.recent_stats.pop_front();
        }
        self.recent_stats.push_back(ExtractionStatSample {
            success,
            duration_ms,
            recorded_at: now,
        });

        self.aggregate.total_extractions += 1;
        if success {
            self.aggregate.successful_extractions += 1;
        } else {
            self.aggregate.failed_extractions += 1;
        }
        self.aggregate.success_rate = self.aggregate.successful_extractions as f64
            / self.aggregate.total_extractions as f64;
        self.aggregate.avg_extraction_time_ms =
            0.9 * self.aggregate.avg_extraction_time_ms + 0.1 * duration_ms as f64;
        self.updated_at = now;
    }

    pub fn health_summary(&self) -> CacheHealthSummary {
        let healthy_selector_count = self
            .selectors
            .values()
            .filter(|s| s.success_rate > 0.5)
            .count();
        let healthy_api_count = self.apis.values().filter(|a| a.is_healthy()).count();
        CacheHealthSummary {
            has_cache: !self.selectors.is_empty() || !self.apis.is_empty(),
            selector_count: self.selectors.len(),
            healthy_selector_count,
            api_count: self.apis.len(),
            healthy_api_count,
            success_rate: self.aggregate.success_rate,
            last_extraction: self.recent_stats.back().map(|s| s.recorded_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut cache = DiscoveryCache::new("bmw");
        cache.set_selector("price", SelectorConfig::new(".price", "vehicle price"));
        cache.append_stat(true, 120);
        cache.append_stat(false, 80);

        let serialized = serde_json::to_string(&cache).unwrap();
        let restored: DiscoveryCache = serde_json::from_str(&serialized).unwrap();

        assert_eq!(restored.tenant_id, cache.tenant_id);
        assert_eq!(restored.aggregate.total_extractions, 2);
        assert_eq!(
            restored.selectors.get("price").unwrap().selector,
            ".price"
        );
    }

    #[test]
    fn no_cache_means_empty_health_summary() {
        let cache = DiscoveryCache::new("new-tenant");
        let summary = cache.health_summary();
        assert!(!summary.has_cache);
        assert_eq!(summary.selector_count, 0);
    }

    #[test]
    fn ring_buffer_caps_at_one_hundred() {
        let mut cache = DiscoveryCache::new("bmw");
        for i in 0..150 {
            cache.append_stat(i % 2 == 0, 10);
        }
        assert_eq!(cache.recent_stats.len(), 100);
        assert_eq!(cache.aggregate.total_extractions, 150);
    }
}
