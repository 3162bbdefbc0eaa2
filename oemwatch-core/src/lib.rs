#![allow(
    clippy::default_constructed_unit_structs,
    clippy::redundant_closure,
    clippy::let_and_return,
    clippy::needless_question_mark,
    clippy::manual_strip,
    clippy::field_reassign_with_default,
    clippy::unnecessary_cast,
    clippy::result_large_err
)]

pub mod alert_router;
pub mod change_detector;
pub mod config;
pub mod discovery_cache;
pub mod driver;
pub mod error;
pub mod extraction;
pub mod fetcher;
pub mod llm;
pub mod notification;
pub mod object_store;
pub mod registry;
pub mod renderer;
pub mod repository;
pub mod scheduler;
mod sqlite;
pub mod types;

pub use alert_router::{AlertRule, Batcher};
pub use change_detector::detect;
pub use config::{ConfigBundle, WatchConfig};
pub use discovery_cache::{CacheHealthSummary, DiscoveryCache};
pub use driver::{Driver, DriverError};
pub use error::{ConfigError, Result, WatchError};
pub use extraction::{decide_layer, needs_discovery, ExtractionError, ExtractionOrchestrator, ExtractionStats, SlotSpec};
pub use fetcher::{CheckResult, Fetcher};
pub use llm::{HttpLlmClient, LlmClient, LlmError, StaticLlmClient};
pub use notification::{NotificationPayload, NotificationTransport, NullTransport, WebhookTransport};
pub use object_store::{hash_needs_recapture, perceptual_hash, FsObjectStore, ObjectStore, ObjectStoreError};
pub use registry::{OemRegistry, Tenant};
pub use renderer::{ChromiumRenderer, NullRenderer, Renderer, RenderedPage};
pub use repository::{Repository, RepositoryError, SqliteRepository, SqliteRepositoryBuilder};
pub use scheduler::{CrawlJob, CrawlQueue};
pub use types::{
    AlertChannel, Banner, CallToAction, ChangeEvent, EntityChange, EntityKind, EventType,
    FieldDiff, ImportRun, ImportRunStatus, Offer, PageType, Price, Product, Severity, SourcePage,
    SourcePageStatus, Variant, Version,
};
