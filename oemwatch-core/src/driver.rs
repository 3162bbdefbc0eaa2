//! Worker pool tying every component together: pulls jobs from the
//! priority queue, runs each to completion (fetch → optionally render →
//! extract → detect → emit), and owns the `ImportRun` lifecycle.
//! Jobs for different pages run in parallel; jobs for the same page are
//! serialized by a per-page mutex (`spec.md` §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::alert_router::{self, AlertRule, Batcher};
use crate::change_detector;
use crate::config::WatchConfig;
use crate::discovery_cache::DiscoveryCache;
use crate::extraction::{ExtractionOrchestrator, SlotSpec};
use crate::fetcher::Fetcher;
use crate::llm::LlmClient;
use crate::notification::{self, NotificationTransport};
use crate::object_store::{discovery_cache_key, ObjectStore};
use crate::registry::{OemRegistry, Tenant};
use crate::renderer::Renderer;
use crate::repository::Repository;
use crate::scheduler::{self, queue::CrawlJob, CrawlQueue};
use crate::types::{
    AlertChannel, Banner, ChangeEvent, EntityChange, ImportRun, ImportRunStatus, Offer, PageType,
    Product, SourcePage, SourcePageStatus, Version,
};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),
    #[error(transparent)]
    ObjectStore(#[from] crate::object_store::ObjectStoreError),
}

pub type Result<T> = std::result::Result<T, DriverError>;

const PRODUCT_SLOTS: &[(&str, &str, &str)] = &[
    ("title", "vehicle or product title", ".product-title"),
    ("price_amount", "price in local currency for the vehicle variant", ".price-value"),
    ("availability", "stock or availability status", ".availability"),
    ("disclaimer", "legal disclaimer text", ".disclaimer"),
];

const OFFER_SLOTS: &[(&str, &str, &str)] = &[
    ("title", "offer headline", ".offer-title"),
    ("description", "offer description", ".offer-description"),
    ("price_amount", "offer price in local currency", ".price-value"),
    ("saving_amount", "advertised saving amount", ".offer-saving"),
    ("disclaimer", "legal disclaimer text", ".disclaimer"),
];

const BANNER_SLOTS: &[(&str, &str, &str)] = &[
    ("headline", "homepage banner headline", ".banner-headline"),
    ("subheadline", "homepage banner subheadline", ".banner-subheadline"),
    ("cta_text", "call-to-action label", ".banner-cta"),
    ("disclaimer", "legal disclaimer text", ".disclaimer"),
];

/// Position of the single banner slot this driver extracts per homepage;
/// multi-banner carousels are out of scope.
const BANNER_POSITION: i32 = 0;

fn slots_from(table: &[(&str, &str, &str)]) -> Vec<SlotSpec> {
    table
        .iter()
        .map(|(name, semantic, selector)| SlotSpec::new(*name, *semantic, *selector))
        .collect()
}

fn product_slots() -> Vec<SlotSpec> {
    slots_from(PRODUCT_SLOTS)
}

fn offer_slots() -> Vec<SlotSpec> {
    slots_from(OFFER_SLOTS)
}

fn banner_slots() -> Vec<SlotSpec> {
    slots_from(BANNER_SLOTS)
}

pub struct Driver {
    registry: OemRegistry,
    config: WatchConfig,
    repository: Arc<dyn Repository>,
    object_store: Arc<dyn ObjectStore>,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn NotificationTransport>,
    fetcher: Fetcher,
    orchestrator: ExtractionOrchestrator,
    page_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    llm_semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    caches: Mutex<HashMap<String, DiscoveryCache>>,
    batcher: Mutex<Batcher>,
    alert_rules: Vec<AlertRule>,
}

impl Driver {
    pub fn new(
        registry: OemRegistry,
        config: WatchConfig,
        repository: Arc<dyn Repository>,
        object_store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn Renderer>,
        llm: Arc<dyn LlmClient>,
        notifier: Arc<dyn NotificationTransport>,
    ) -> Self {
        let orchestrator = ExtractionOrchestrator::new(config.extraction.clone(), llm);
        Self {
            registry,
            config,
            repository,
            object_store,
            renderer,
            notifier,
            fetcher: Fetcher::new(Duration::from_secs(10)),
            orchestrator,
            page_locks: Mutex::new(HashMap::new()),
            llm_semaphores: Mutex::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
            batcher: Mutex::new(Batcher::new()),
            alert_rules: alert_router::rule_table(),
        }
    }

    /// Runs a repository call on a blocking worker thread — `rusqlite`
    /// connections are not `Send` across an `.await` point, per the
    /// contract documented on the `Repository` trait.
    async fn with_repo<T, F>(&self, f: F) -> crate::repository::Result<T>
    where
        F: FnOnce(&dyn Repository) -> crate::repository::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.repository.clone();
        tokio::task::spawn_blocking(move || f(repo.as_ref()))
            .await
            .expect("repository worker thread panicked")
    }

    async fn page_lock(&self, page_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.page_locks.lock().await;
        locks
            .entry(page_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn llm_semaphore(&self, tenant_id: &str) -> Arc<Semaphore> {
        let mut sems = self.llm_semaphores.lock().await;
        sems.entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.extraction.max_concurrent_llm)))
            .clone()
    }

    async fn cache_for(&self, tenant_id: &str) -> DiscoveryCache {
        let mut caches = self.caches.lock().await;
        if let Some(cache) = caches.get(tenant_id) {
            return cache.clone();
        }
        let cache = match self.object_store.get(&discovery_cache_key(tenant_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| DiscoveryCache::new(tenant_id)),
            Err(_) => DiscoveryCache::new(tenant_id),
        };
        caches.insert(tenant_id.to_string(), cache.clone());
        cache
    }

    async fn persist_cache(&self, cache: &DiscoveryCache) {
        {
            let mut caches = self.caches.lock().await;
            caches.insert(cache.tenant_id.clone(), cache.clone());
        }
        if let Ok(bytes) = serde_json::to_vec(cache) {
            if let Err(err) = self.object_store.put(&discovery_cache_key(&cache.tenant_id), bytes).await {
                warn!(target: "driver", tenant_id = %cache.tenant_id, "failed to persist discovery cache: {err}");
            }
        }
    }

    /// Runs one scheduler pass over every active page for `tenant_code`,
    /// returning the completed `ImportRun`. Takes `self` wrapped in an
    /// `Arc` so worker tasks can hold their own owned handle instead of
    /// borrowing across the `tokio::spawn` boundary.
    pub async fn run_tenant_pass(self: &Arc<Self>, tenant_code: &str, worker_count: usize) -> Result<ImportRun> {
        let tenant = self
            .registry
            .get(tenant_code)
            .cloned()
            .ok_or_else(|| DriverError::UnknownTenant(tenant_code.to_string()))?;

        let mut run = ImportRun::start(tenant_code);
        {
            let run = run.clone();
            self.with_repo(move |repo| repo.start_import_run(&run)).await?;
        }

        let pages = {
            let tenant_code = tenant_code.to_string();
            self.with_repo(move |repo| repo.get_pages_to_check(&tenant_code)).await?
        };
        let mut queue = CrawlQueue::new();
        for page in pages {
            queue.push(CrawlJob {
                source_page_id: page.id.clone(),
                tenant_id: tenant_code.to_string(),
                url: page.url.clone(),
                priority: priority_for(&page),
                scheduled_at: Instant::now(),
            });
        }
        let queue = Arc::new(Mutex::new(queue));

        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..worker_count.max(1) {
            let queue = queue.clone();
            let tenant = tenant.clone();
            let run_id = run.id.clone();
            let this = self.clone();
            join_set.spawn(async move { this.worker_loop(queue, tenant, run_id).await });
        }

        let mut checked = 0u32;
        let mut changed = 0u32;
        let mut errored = 0u32;
        let mut upserted = 0u32;
        while let Some(result) = join_set.join_next().await {
            if let Ok(outcomes) = result {
                for outcome in outcomes {
                    checked += 1;
                    if outcome.changed {
                        changed += 1;
                    }
                    if outcome.errored {
                        errored += 1;
                    }
                    upserted += outcome.entities_upserted;
                }
            }
        }

        run.counters.pages_checked = checked;
        run.counters.pages_changed = changed;
        run.counters.pages_errored = errored;
        run.counters.entities_upserted = upserted;
        run.status = if errored > 0 && errored == checked {
            ImportRunStatus::Failed
        } else if errored > 0 {
            ImportRunStatus::Partial
        } else {
            ImportRunStatus::Completed
        };
        run.finished_at = Some(Utc::now());
        {
            let run = run.clone();
            self.with_repo(move |repo| repo.finish_import_run(&run)).await?;
        }

        let cache = self.cache_for(tenant_code).await;
        self.persist_cache(&cache).await;

        Ok(run)
    }

    async fn worker_loop(&self, queue: Arc<Mutex<CrawlQueue>>, tenant: Tenant, run_id: String) -> Vec<PageOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let job = {
                let mut queue = queue.lock().await;
                queue.pop()
            };
            let Some(job) = job else { break };
            let outcome = self.process_job(&tenant, job, &run_id).await;
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn process_job(&self, tenant: &Tenant, job: CrawlJob, run_id: &str) -> PageOutcome {
        let lock = self.page_lock(&job.source_page_id).await;
        let _guard = lock.lock().await;

        let pages = {
            let tenant_code = tenant.code.clone();
            match self.with_repo(move |repo| repo.get_pages_to_check(&tenant_code)).await {
                Ok(pages) => pages,
                Err(err) => {
                    error!(target: "driver", "repository unavailable: {err}");
                    return PageOutcome::default();
                }
            }
        };
        let Some(mut page) = pages.into_iter().find(|p| p.id == job.source_page_id) else {
            return PageOutcome::default();
        };

        let now = Utc::now();
        let check_decision = scheduler::should_check(&page, tenant, now, &self.config.scheduler);
        if !check_decision.should_check {
            return PageOutcome::default();
        }

        let check = match self.fetcher.check(&job.url).await {
            Ok(result) => result,
            Err(err) => {
                scheduler::mark_unreachable(&mut page, now, err.to_string());
                let page_to_save = page.clone();
                let _ = self.with_repo(move |repo| repo.update_page(&page_to_save)).await;
                return PageOutcome { errored: true, ..Default::default() };
            }
        };

        let render_decision = scheduler::should_render(&page, tenant, &check.fingerprint, now, &self.config.scheduler);
        let mut rendered = false;
        let mut outcome = PageOutcome::default();

        if render_decision.should_render {
            let year_month = now.format("%Y-%m").to_string();
            let counts = {
                let tenant_code = tenant.code.clone();
                let year_month = year_month.clone();
                self.with_repo(move |repo| repo.get_render_counts(&tenant_code, &year_month))
                    .await
                    .unwrap_or_default()
            };
            let budget = scheduler::check_render_budget(counts.tenant, counts.global, &self.config.budget);

            if budget.allowed {
                let _permit = self.llm_semaphore(&tenant.code).await;
                match self.renderer.render(&job.url, Duration::from_secs(30)).await {
                    Ok(page_render) => {
                        rendered = true;
                        {
                            let tenant_code = tenant.code.clone();
                            let year_month = year_month.clone();
                            let _ = self
                                .with_repo(move |repo| repo.record_render(&tenant_code, &year_month))
                                .await;
                        }
                        let entity_outcome = self.extract_and_detect(tenant, &mut page, &page_render.html, run_id).await;
                        outcome.changed = entity_outcome.changed;
                        outcome.entities_upserted = entity_outcome.entities_upserted;
                    }
                    Err(err) => {
                        warn!(target: "driver", url = %job.url, "render failed: {err}");
                    }
                }
            } else {
                info!(target: "driver", tenant = %tenant.code, reason = ?budget.reason, "render denied by budget");
            }
        }

        let html_changed = check.fingerprint != page.last_normalized_fingerprint.clone().unwrap_or_default();
        scheduler::apply_crawl_result(&mut page, now, html_changed, rendered);
        page.last_normalized_fingerprint = Some(check.fingerprint.clone());
        if rendered {
            page.last_rendered_fingerprint = Some(check.fingerprint);
        }
        page.status = SourcePageStatus::Active;
        let page_to_save = page.clone();
        let _ = self.with_repo(move |repo| repo.update_page(&page_to_save)).await;

        outcome
    }

    /// Dispatches extraction by page type, then runs the shared
    /// detect-persist-alert pipeline on whichever entity came out of it.
    /// News and sitemap pages carry no extractable entity (`spec.md`
    /// §4.3's three-entity model covers products, offers and banners
    /// only) and are skipped.
    async fn extract_and_detect(&self, tenant: &Tenant, page: &mut SourcePage, dom: &str, run_id: &str) -> PageOutcome {
        let mut cache = self.cache_for(&tenant.code).await;
        let change = match page.page_type {
            PageType::Offers => Some(self.extract_offer(tenant, page, dom, &mut cache).await),
            PageType::Homepage => Some(self.extract_banner(tenant, page, dom, &mut cache).await),
            PageType::News | PageType::Sitemap => None,
            _ => Some(self.extract_product(tenant, page, dom, &mut cache).await),
        };
        self.persist_cache(&cache).await;

        match change {
            Some(change) => self.detect_and_persist(tenant, run_id, &page.url, change).await,
            None => PageOutcome::default(),
        }
    }

    async fn resolve_product_id(&self, tenant_id: &str, external_key: &str) -> String {
        let tenant_id = tenant_id.to_string();
        let external_key = external_key.to_string();
        self.with_repo(move |repo| repo.find_product_id(&tenant_id, &external_key))
            .await
            .unwrap_or(None)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }

    async fn resolve_offer_id(&self, tenant_id: &str, external_key: &str) -> String {
        let tenant_id = tenant_id.to_string();
        let external_key = external_key.to_string();
        self.with_repo(move |repo| repo.find_offer_id(&tenant_id, &external_key))
            .await
            .unwrap_or(None)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }

    async fn resolve_banner_id(&self, tenant_id: &str, page_url: &str, position: i32) -> String {
        let tenant_id = tenant_id.to_string();
        let page_url = page_url.to_string();
        self.with_repo(move |repo| repo.find_banner_id(&tenant_id, &page_url, position))
            .await
            .unwrap_or(None)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }

    async fn extract_product(&self, tenant: &Tenant, page: &SourcePage, dom: &str, cache: &mut DiscoveryCache) -> EntityChange {
        let slots = product_slots();
        let (values, _stats) = self
            .orchestrator
            .extract_slots(cache, dom, &page.url, &tenant.code, &slots)
            .await;

        let external_key = page.url.clone();
        let id = self.resolve_product_id(&tenant.code, &external_key).await;
        let title = values.get("title").cloned().unwrap_or_else(|| page.url.clone());
        let price_amount = values.get("price_amount").and_then(|v| parse_price(v));
        let now = Utc::now();
        let mut product = Product {
            id,
            tenant_id: tenant.code.clone(),
            source_url: page.url.clone(),
            external_key,
            title,
            subtitle: None,
            body_type: None,
            fuel_type: None,
            availability: values.get("availability").cloned(),
            price_amount,
            disclaimer: values.get("disclaimer").cloned(),
            primary_image_fingerprint: None,
            gallery_count: 0,
            key_features: Vec::new(),
            calls_to_action: Vec::new(),
            variants: Vec::new(),
            metadata: serde_json::Value::Null,
            content_fingerprint: String::new(),
            current_version_id: None,
            first_seen: now,
            last_seen: now,
        };
        let snapshot = serde_json::to_value(&product).unwrap_or(serde_json::Value::Null);
        product.content_fingerprint = content_fingerprint(&snapshot);
        EntityChange::Product(Box::new(product))
    }

    async fn extract_offer(&self, tenant: &Tenant, page: &SourcePage, dom: &str, cache: &mut DiscoveryCache) -> EntityChange {
        let slots = offer_slots();
        let (values, _stats) = self
            .orchestrator
            .extract_slots(cache, dom, &page.url, &tenant.code, &slots)
            .await;

        let external_key = page.url.clone();
        let id = self.resolve_offer_id(&tenant.code, &external_key).await;
        let title = values.get("title").cloned().unwrap_or_else(|| page.url.clone());
        let price_amount = values.get("price_amount").and_then(|v| parse_price(v));
        let saving_amount = values.get("saving_amount").and_then(|v| parse_price(v));
        let now = Utc::now();
        let mut offer = Offer {
            id,
            tenant_id: tenant.code.clone(),
            source_url: page.url.clone(),
            external_key,
            title,
            description: values.get("description").cloned(),
            offer_type: None,
            applicable_models: Vec::new(),
            price_amount,
            saving_amount,
            valid_from: None,
            valid_to: None,
            disclaimer: values.get("disclaimer").cloned(),
            eligibility: None,
            content_fingerprint: String::new(),
            current_version_id: None,
            first_seen: now,
            last_seen: now,
        };
        let snapshot = serde_json::to_value(&offer).unwrap_or(serde_json::Value::Null);
        offer.content_fingerprint = content_fingerprint(&snapshot);
        EntityChange::Offer(Box::new(offer))
    }

    async fn extract_banner(&self, tenant: &Tenant, page: &SourcePage, dom: &str, cache: &mut DiscoveryCache) -> EntityChange {
        let slots = banner_slots();
        let (values, _stats) = self
            .orchestrator
            .extract_slots(cache, dom, &page.url, &tenant.code, &slots)
            .await;

        let id = self.resolve_banner_id(&tenant.code, &page.url, BANNER_POSITION).await;
        let now = Utc::now();
        let mut banner = Banner {
            id,
            tenant_id: tenant.code.clone(),
            page_url: page.url.clone(),
            position: BANNER_POSITION,
            headline: values.get("headline").cloned(),
            subheadline: values.get("subheadline").cloned(),
            cta_text: values.get("cta_text").cloned(),
            cta_url: None,
            desktop_image_url: None,
            mobile_image_url: None,
            image_fingerprint: None,
            disclaimer: values.get("disclaimer").cloned(),
            content_fingerprint: String::new(),
            current_version_id: None,
            first_seen: now,
            last_seen: now,
        };
        let snapshot = serde_json::to_value(&banner).unwrap_or(serde_json::Value::Null);
        banner.content_fingerprint = content_fingerprint(&snapshot);
        EntityChange::Banner(Box::new(banner))
    }

    async fn persist_entity(&self, change: &EntityChange) {
        match change {
            EntityChange::Product(product) => {
                let product = product.as_ref().clone();
                let _ = self.with_repo(move |repo| repo.upsert_product(&product)).await;
            }
            EntityChange::Offer(offer) => {
                let offer = offer.as_ref().clone();
                let _ = self.with_repo(move |repo| repo.upsert_offer(&offer)).await;
            }
            EntityChange::Banner(banner) => {
                let banner = banner.as_ref().clone();
                let _ = self.with_repo(move |repo| repo.upsert_banner(&banner)).await;
            }
        }
    }

    /// Diffs `change` against its last persisted snapshot (resolved by
    /// the stable natural-key id baked into it), then upserts, versions
    /// and routes the change if the diff is meaningful.
    async fn detect_and_persist(&self, tenant: &Tenant, run_id: &str, page_url: &str, change: EntityChange) -> PageOutcome {
        let kind = change.kind();
        let title = title_for(&change);
        let snapshot = change.snapshot_json();
        let entity_id = change.entity_id().to_string();
        let content_fingerprint = change.content_fingerprint().to_string();

        let previous = {
            let entity_id = entity_id.clone();
            self.with_repo(move |repo| repo.current_snapshot(kind, &entity_id))
                .await
                .unwrap_or(None)
        };

        let mut outcome = PageOutcome::default();
        let Some((event_type, severity, summary, diffs)) =
            change_detector::detect(kind.as_str(), &title, kind, previous.as_ref(), Some(&snapshot))
        else {
            return outcome;
        };

        let now = Utc::now();
        let version = Version {
            id: uuid::Uuid::new_v4().simple().to_string(),
            parent_entity_id: entity_id.clone(),
            entity_kind: kind,
            import_run_id: run_id.to_string(),
            content_fingerprint,
            snapshot,
            diff_summary: summary.clone(),
            changed_fields: diffs.iter().filter(|d| d.is_meaningful).map(|d| d.field.clone()).collect(),
            created_at: now,
        };

        let change = with_current_version(change, version.id.clone());
        self.persist_entity(&change).await;
        {
            let version = version.clone();
            let _ = self.with_repo(move |repo| repo.insert_version(&version)).await;
        }
        outcome.entities_upserted += 1;
        outcome.changed = true;

        let channel = alert_router::route(kind, &diffs, &self.alert_rules);
        let change_event = ChangeEvent {
            id: uuid::Uuid::new_v4().simple().to_string(),
            tenant_id: tenant.code.clone(),
            import_run_id: run_id.to_string(),
            entity_type: kind,
            entity_id,
            event_type,
            severity,
            summary,
            diff: diffs,
            notified_at: None,
            notification_channel: Some(channel),
            created_at: now,
        };
        {
            let change_event = change_event.clone();
            let _ = self.with_repo(move |repo| repo.insert_change_event(&change_event)).await;
        }

        match channel {
            AlertChannel::SlackImmediate | AlertChannel::Email => {
                let payload = notification::build_payload(&change_event, &tenant.display_name, page_url);
                if self.notifier.post(channel, payload).await.is_ok() {
                    let event_id = change_event.id.clone();
                    let channel_str = channel.as_str();
                    let notified_at = Utc::now();
                    let _ = self
                        .with_repo(move |repo| repo.mark_notified(&event_id, channel_str, notified_at))
                        .await;
                }
            }
            _ => {
                self.batcher.lock().await.enqueue(channel, change_event);
            }
        }

        outcome
    }

    /// Driver-owned tick: flushes accumulated hourly-batch events per
    /// tenant through the notification transport.
    pub async fn flush_hourly_batches(&self) {
        let drained = self.batcher.lock().await.drain_all_hourly();
        for (tenant_id, events) in drained {
            if events.is_empty() {
                continue;
            }
            let display_name = self
                .registry
                .get(&tenant_id)
                .map(|t| t.display_name.clone())
                .unwrap_or(tenant_id.clone());
            let payload = notification::build_batch_payload(&display_name, &events);
            let _ = self.notifier.post(crate::types::AlertChannel::SlackBatchHourly, payload).await;
        }
    }
}

#[derive(Debug, Default, Clone)]
struct PageOutcome {
    changed: bool,
    errored: bool,
    entities_upserted: u32,
}

fn title_for(change: &EntityChange) -> String {
    match change {
        EntityChange::Product(p) => p.title.clone(),
        EntityChange::Offer(o) => o.title.clone(),
        EntityChange::Banner(b) => b.headline.clone().unwrap_or_else(|| b.page_url.clone()),
    }
}

fn with_current_version(mut change: EntityChange, version_id: String) -> EntityChange {
    match &mut change {
        EntityChange::Product(p) => p.current_version_id = Some(version_id),
        EntityChange::Offer(o) => o.current_version_id = Some(version_id),
        EntityChange::Banner(b) => b.current_version_id = Some(version_id),
    }
    change
}

fn priority_for(page: &SourcePage) -> i32 {
    match page.page_type {
        crate::types::PageType::Offers => 10,
        crate::types::PageType::Homepage => 8,
        _ => 5,
    }
}

fn parse_price(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse().ok()
}

fn content_fingerprint(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageType;

    #[test]
    fn offers_outrank_homepage_which_outranks_everything_else() {
        let offers = SourcePage::new("bmw", "https://bmw.example/offers", PageType::Offers);
        let homepage = SourcePage::new("bmw", "https://bmw.example/", PageType::Homepage);
        let vehicle = SourcePage::new("bmw", "https://bmw.example/x5", PageType::Vehicle);
        assert!(priority_for(&offers) > priority_for(&homepage));
        assert!(priority_for(&homepage) > priority_for(&vehicle));
    }

    #[test]
    fn parse_price_strips_currency_symbols_and_separators() {
        assert_eq!(parse_price("$59,990"), Some(59990.0));
        assert_eq!(parse_price("$59990.00"), Some(59990.00));
        assert_eq!(parse_price("not a price"), None);
    }

    #[test]
    fn content_fingerprint_is_stable_and_sensitive_to_changes() {
        let a = serde_json::json!({"title": "X5", "price_amount": 59990.0});
        let b = serde_json::json!({"title": "X5", "price_amount": 59990.0});
        let c = serde_json::json!({"title": "X5", "price_amount": 58990.0});
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
        assert_ne!(content_fingerprint(&a), content_fingerprint(&c));
    }
}
