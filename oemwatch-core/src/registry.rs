//! Static tenant roster, loaded once at startup and passed around as an
//! explicit value instead of a process-wide singleton.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::types::PageType;

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleOverride {
    pub page_type: PageType,
    pub base_interval_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tenant {
    pub code: String,
    pub display_name: String,
    pub base_url: String,
    #[serde(default)]
    pub requires_browser_rendering: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub schedule_overrides: Vec<ScheduleOverride>,
}

impl Tenant {
    /// Effective base interval for `page_type`, honoring any per-tenant
    /// schedule override before falling back to the page-type default.
    pub fn base_interval_minutes(&self, page_type: PageType) -> i64 {
        self.schedule_overrides
            .iter()
            .find(|o| o.page_type == page_type)
            .map(|o| o.base_interval_minutes)
            .unwrap_or_else(|| page_type.base_interval_minutes())
    }
}

#[derive(Debug, Deserialize)]
struct TenantFile {
    tenant: Vec<Tenant>,
}

#[derive(Debug, Clone)]
pub struct OemRegistry {
    tenants: HashMap<String, Tenant>,
}

impl OemRegistry {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let parsed: TenantFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let tenants = parsed
            .tenant
            .into_iter()
            .map(|t| (t.code.clone(), t))
            .collect();
        Ok(Self { tenants })
    }

    pub fn tenants(&self) -> Vec<&Tenant> {
        self.tenants.values().collect()
    }

    pub fn active_tenants(&self) -> Vec<&Tenant> {
        self.tenants.values().filter(|t| t.active).collect()
    }

    pub fn get(&self, code: &str) -> Option<&Tenant> {
        self.tenants.get(code)
    }

    pub fn require(&self, code: &str) -> Result<&Tenant> {
        self.get(code)
            .ok_or_else(|| ConfigError::UnknownTenant(code.to_string()))
    }
}
