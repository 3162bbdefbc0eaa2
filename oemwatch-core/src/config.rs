//! TOML configuration, one struct tree per concern, loaded from a directory
//! of fixture files the way a deployment would lay out `/etc/oemwatch/`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_backoff_after_days")]
    pub backoff_after_days: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_render_interval_minutes")]
    pub max_render_interval_minutes: i64,
}

fn default_backoff_after_days() -> f64 {
    7.0
}

fn default_backoff_multiplier() -> f64 {
    0.5
}

fn default_max_render_interval_minutes() -> i64 {
    120
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            backoff_after_days: default_backoff_after_days(),
            backoff_multiplier: default_backoff_multiplier(),
            max_render_interval_minutes: default_max_render_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_monthly_render_cap_per_oem")]
    pub monthly_render_cap_per_oem: u32,
    #[serde(default = "default_monthly_render_cap_global")]
    pub monthly_render_cap_global: u32,
    #[serde(default = "default_warning_threshold_ratio")]
    pub warning_threshold_ratio: f64,
}

fn default_monthly_render_cap_per_oem() -> u32 {
    1000
}

fn default_monthly_render_cap_global() -> u32 {
    10000
}

fn default_warning_threshold_ratio() -> f64 {
    0.8
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            monthly_render_cap_per_oem: default_monthly_render_cap_per_oem(),
            monthly_render_cap_global: default_monthly_render_cap_global(),
            warning_threshold_ratio: default_warning_threshold_ratio(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    #[serde(default = "default_min_cache_health_for_fast_path")]
    pub min_cache_health_for_fast_path: f64,
    #[serde(default = "default_max_failures_before_discovery")]
    pub max_failures_before_discovery: u32,
    #[serde(default)]
    pub auto_discovery: bool,
    #[serde(default = "default_api_probe_timeout_ms")]
    pub api_probe_timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_max_dom_size")]
    pub max_dom_size: usize,
    #[serde(default = "default_repair_timeout_ms")]
    pub repair_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_llm")]
    pub max_concurrent_llm: usize,
}

fn default_min_cache_health_for_fast_path() -> f64 {
    0.3
}

fn default_max_failures_before_discovery() -> u32 {
    5
}

fn default_api_probe_timeout_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_max_dom_size() -> usize {
    50_000
}

fn default_repair_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_llm() -> usize {
    2
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            min_cache_health_for_fast_path: default_min_cache_health_for_fast_path(),
            max_failures_before_discovery: default_max_failures_before_discovery(),
            auto_discovery: false,
            api_probe_timeout_ms: default_api_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            max_dom_size: default_max_dom_size(),
            repair_timeout_ms: default_repair_timeout_ms(),
            max_concurrent_llm: default_max_concurrent_llm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertingSection {
    pub webhook_url: Option<String>,
    #[serde(default = "default_batch_hourly_minutes")]
    pub batch_hourly_minutes: i64,
    #[serde(default = "default_batch_daily_minutes")]
    pub batch_daily_minutes: i64,
}

fn default_batch_hourly_minutes() -> i64 {
    60
}

fn default_batch_daily_minutes() -> i64 {
    1440
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererSection {
    /// Override path to the Chrome/Chromium executable; `None` lets
    /// chromiumoxide locate a system install.
    pub chrome_executable: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

fn default_headless() -> bool {
    true
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: default_headless(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_object_store_root")]
    pub object_store_root: String,
}

fn default_sqlite_path() -> String {
    "oemwatch.sqlite3".into()
}

fn default_object_store_root() -> String {
    "object_store".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub alerting: AlertingSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub renderer: RendererSection,
    #[serde(default)]
    pub storage: StorageSection,
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_watch_config(path: &Path) -> Result<WatchConfig> {
    load_toml(path)
}

/// Aggregates every config fixture a deployment needs, mirroring the
/// directory layout under `configs/`.
#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub watch: WatchConfig,
    pub tenants: crate::registry::OemRegistry,
}

impl ConfigBundle {
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir: PathBuf = dir.as_ref().to_path_buf();
        let watch = load_watch_config(&dir.join("watch.toml"))?;
        let tenants = crate::registry::OemRegistry::from_toml_file(&dir.join("tenants.toml"))?;
        Ok(Self { watch, tenants })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../configs")
    }

    #[test]
    fn load_fixture_configs() {
        let bundle = ConfigBundle::from_directory(fixtures_dir()).expect("load config bundle");
        assert!(bundle.watch.budget.monthly_render_cap_per_oem > 0);
        assert_eq!(bundle.tenants.tenants().len(), 13);
    }

    #[test]
    fn defaults_match_spec() {
        let section = ExtractionSection::default();
        assert_eq!(section.failure_threshold, 2);
        assert_eq!(section.max_dom_size, 50_000);
        let budget = BudgetSection::default();
        assert_eq!(budget.monthly_render_cap_per_oem, 1000);
        assert_eq!(budget.monthly_render_cap_global, 10000);
    }
}
