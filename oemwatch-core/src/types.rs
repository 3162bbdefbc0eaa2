//! Core entity types shared across the scheduler, extractor and change
//! detector. Mirrors the row shapes in `spec.md` §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Page-type tag driving the scheduler's base interval (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    Offers,
    Vehicle,
    News,
    Sitemap,
    PriceGuide,
    Category,
    BuildPrice,
    Other,
}

impl PageType {
    /// Base check interval in minutes, per `spec.md` §4.1.
    pub const fn base_interval_minutes(self) -> i64 {
        match self {
            PageType::Homepage => 120,
            PageType::Offers => 240,
            PageType::Vehicle => 720,
            PageType::News => 1440,
            PageType::Sitemap => 1440,
            PageType::PriceGuide => 1440,
            PageType::Category => 720,
            PageType::BuildPrice => 720,
            PageType::Other => 720,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Homepage => "homepage",
            PageType::Offers => "offers",
            PageType::Vehicle => "vehicle",
            PageType::News => "news",
            PageType::Sitemap => "sitemap",
            PageType::PriceGuide => "price_guide",
            PageType::Category => "category",
            PageType::BuildPrice => "build_price",
            PageType::Other => "other",
        }
    }
}

impl std::str::FromStr for PageType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "homepage" => Ok(PageType::Homepage),
            "offers" => Ok(PageType::Offers),
            "vehicle" => Ok(PageType::Vehicle),
            "news" => Ok(PageType::News),
            "sitemap" => Ok(PageType::Sitemap),
            "price_guide" => Ok(PageType::PriceGuide),
            "category" => Ok(PageType::Category),
            "build_price" => Ok(PageType::BuildPrice),
            "other" => Ok(PageType::Other),
            other => Err(format!("unknown page type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePageStatus {
    Active,
    Removed,
    Error,
    Blocked,
}

impl SourcePageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SourcePageStatus::Active => "active",
            SourcePageStatus::Removed => "removed",
            SourcePageStatus::Error => "error",
            SourcePageStatus::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for SourcePageStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(SourcePageStatus::Active),
            "removed" => Ok(SourcePageStatus::Removed),
            "error" => Ok(SourcePageStatus::Error),
            "blocked" => Ok(SourcePageStatus::Blocked),
            other => Err(format!("unknown source page status: {other}")),
        }
    }
}

/// A single monitored page belonging to a tenant. The scheduler owns every
/// mutable field here (`spec.md` §3 "Ownership").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePage {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub page_type: PageType,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub last_rendered_at: Option<DateTime<Utc>>,
    pub last_normalized_fingerprint: Option<String>,
    pub last_rendered_fingerprint: Option<String>,
    pub consecutive_no_change: u32,
    pub status: SourcePageStatus,
    pub last_error: Option<String>,
}

impl SourcePage {
    pub fn new(tenant_id: impl Into<String>, url: impl Into<String>, page_type: PageType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            tenant_id: tenant_id.into(),
            url: url.into(),
            page_type,
            last_checked_at: None,
            last_changed_at: None,
            last_rendered_at: None,
            last_normalized_fingerprint: None,
            last_rendered_fingerprint: None,
            consecutive_no_change: 0,
            status: SourcePageStatus::Active,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Option<f64>,
    pub currency: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToAction {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub price: Option<f64>,
    pub drivetrain: Option<String>,
    pub engine: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub tenant_id: String,
    pub source_url: String,
    pub external_key: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub body_type: Option<String>,
    pub fuel_type: Option<String>,
    pub availability: Option<String>,
    pub price_amount: Option<f64>,
    pub disclaimer: Option<String>,
    pub primary_image_fingerprint: Option<String>,
    pub gallery_count: u32,
    pub key_features: Vec<String>,
    pub calls_to_action: Vec<CallToAction>,
    pub variants: Vec<Variant>,
    pub metadata: serde_json::Value,
    pub content_fingerprint: String,
    pub current_version_id: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub tenant_id: String,
    pub source_url: String,
    pub external_key: String,
    pub title: String,
    pub description: Option<String>,
    pub offer_type: Option<String>,
    pub applicable_models: Vec<String>,
    pub price_amount: Option<f64>,
    pub saving_amount: Option<f64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub disclaimer: Option<String>,
    pub eligibility: Option<String>,
    pub content_fingerprint: String,
    pub current_version_id: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Banner {
    pub id: String,
    pub tenant_id: String,
    pub page_url: String,
    pub position: i32,
    pub headline: Option<String>,
    pub subheadline: Option<String>,
    pub cta_text: Option<String>,
    pub cta_url: Option<String>,
    pub desktop_image_url: Option<String>,
    pub mobile_image_url: Option<String>,
    pub image_fingerprint: Option<String>,
    pub disclaimer: Option<String>,
    pub content_fingerprint: String,
    pub current_version_id: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Discriminates which entity kind a `Version`/`ChangeEvent` row belongs to
/// without resorting to a string tag (`spec.md` §9 "tagged variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Offer,
    Banner,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Offer => "offer",
            EntityKind::Banner => "banner",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "product" => Ok(EntityKind::Product),
            "offer" => Ok(EntityKind::Offer),
            "banner" => Ok(EntityKind::Banner),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Sum type over the three extracted entity kinds, replacing the dynamically
/// tagged maps the original system used (`spec.md` §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityChange {
    Product(Box<Product>),
    Offer(Box<Offer>),
    Banner(Box<Banner>),
}

impl EntityChange {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityChange::Product(_) => EntityKind::Product,
            EntityChange::Offer(_) => EntityKind::Offer,
            EntityChange::Banner(_) => EntityKind::Banner,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            EntityChange::Product(p) => &p.id,
            EntityChange::Offer(o) => &o.id,
            EntityChange::Banner(b) => &b.id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            EntityChange::Product(p) => &p.tenant_id,
            EntityChange::Offer(o) => &o.tenant_id,
            EntityChange::Banner(b) => &b.tenant_id,
        }
    }

    pub fn content_fingerprint(&self) -> &str {
        match self {
            EntityChange::Product(p) => &p.content_fingerprint,
            EntityChange::Offer(o) => &o.content_fingerprint,
            EntityChange::Banner(b) => &b.content_fingerprint,
        }
    }

    /// Serializes the current state to the flat JSON snapshot persisted on
    /// the corresponding `Version` row.
    pub fn snapshot_json(&self) -> serde_json::Value {
        match self {
            EntityChange::Product(p) => serde_json::to_value(p.as_ref()),
            EntityChange::Offer(o) => serde_json::to_value(o.as_ref()),
            EntityChange::Banner(b) => serde_json::to_value(b.as_ref()),
        }
        .unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub parent_entity_id: String,
    pub entity_kind: EntityKind,
    pub import_run_id: String,
    pub content_fingerprint: String,
    pub snapshot: serde_json::Value,
    pub diff_summary: String,
    pub changed_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl ImportRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportRunStatus::Running => "running",
            ImportRunStatus::Completed => "completed",
            ImportRunStatus::Failed => "failed",
            ImportRunStatus::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRunCounters {
    pub pages_checked: u32,
    pub pages_changed: u32,
    pub pages_errored: u32,
    pub entities_upserted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ImportRunStatus,
    pub counters: ImportRunCounters,
    pub error_json: Option<serde_json::Value>,
}

impl ImportRun {
    pub fn start(tenant_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            tenant_id: tenant_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: ImportRunStatus::Running,
            counters: ImportRunCounters::default(),
            error_json: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    SlackImmediate,
    SlackBatchHourly,
    SlackBatchDaily,
    Email,
}

impl AlertChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertChannel::SlackImmediate => "slack_immediate",
            AlertChannel::SlackBatchHourly => "slack_batch_hourly",
            AlertChannel::SlackBatchDaily => "slack_batch_daily",
            AlertChannel::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Removed,
    PriceChanged,
    DisclaimerChanged,
    AvailabilityChanged,
    ImageChanged,
    Updated,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Removed => "removed",
            EventType::PriceChanged => "price_changed",
            EventType::DisclaimerChanged => "disclaimer_changed",
            EventType::AvailabilityChanged => "availability_changed",
            EventType::ImageChanged => "image_changed",
            EventType::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub is_meaningful: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub tenant_id: String,
    pub import_run_id: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub summary: String,
    pub diff: Vec<FieldDiff>,
    pub notified_at: Option<DateTime<Utc>>,
    pub notification_channel: Option<AlertChannel>,
    pub created_at: DateTime<Utc>,
}
