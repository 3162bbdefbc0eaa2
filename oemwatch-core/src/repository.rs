//! Relational store for every entity in `spec.md` §3. Grounded on the
//! teacher's `SqlitePlanStore`: a builder constructs connection options,
//! `open()` applies the shared WAL/PRAGMA tuning, and the schema is
//! embedded at compile time via `include_str!`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;

use crate::sqlite::configure_connection;
use crate::types::{
    Banner, ChangeEvent, EntityKind, ImportRun, ImportRunStatus, Offer, Product, SourcePage,
    SourcePageStatus, Version,
};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

pub const GLOBAL_COUNTER_KEY: &str = "__global__";

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderCounts {
    pub tenant: u32,
    pub global: u32,
}

/// Repository surface consumed by the driver. Kept synchronous —
/// rusqlite connections are not `Send` across an `.await` boundary, so
/// callers invoke these through `tokio::task::spawn_blocking`.
pub trait Repository: Send + Sync {
    fn get_pages_to_check(&self, tenant_id: &str) -> Result<Vec<SourcePage>>;
    fn update_page(&self, page: &SourcePage) -> Result<()>;
    fn upsert_product(&self, product: &Product) -> Result<()>;
    fn upsert_offer(&self, offer: &Offer) -> Result<()>;
    fn upsert_banner(&self, banner: &Banner) -> Result<()>;
    /// Resolves the stable id already assigned to a product for this
    /// natural key, if one has ever been upserted. Callers must look this
    /// up before minting a fresh id so re-extractions of the same page
    /// diff against their own history instead of orphaning it.
    fn find_product_id(&self, tenant_id: &str, external_key: &str) -> Result<Option<String>>;
    fn find_offer_id(&self, tenant_id: &str, external_key: &str) -> Result<Option<String>>;
    fn find_banner_id(&self, tenant_id: &str, page_url: &str, position: i32) -> Result<Option<String>>;
    fn current_snapshot(&self, entity_kind: EntityKind, entity_id: &str) -> Result<Option<serde_json::Value>>;
    fn insert_version(&self, version: &Version) -> Result<()>;
    fn insert_change_event(&self, event: &ChangeEvent) -> Result<()>;
    fn mark_notified(&self, change_event_id: &str, channel: &str, notified_at: DateTime<Utc>) -> Result<()>;
    fn get_render_counts(&self, tenant_id: &str, year_month: &str) -> Result<RenderCounts>;
    fn record_render(&self, tenant_id: &str, year_month: &str) -> Result<()>;
    fn start_import_run(&self, run: &ImportRun) -> Result<()>;
    fn finish_import_run(&self, run: &ImportRun) -> Result<()>;
}

pub struct SqliteRepositoryBuilder {
    path: PathBuf,
    read_only: bool,
    create_if_missing: bool,
}

impl SqliteRepositoryBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            read_only: false,
            create_if_missing: true,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn build(self) -> Result<SqliteRepository> {
        SqliteRepository::open(self.path, self.read_only, self.create_if_missing)
    }
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    fn open(path: PathBuf, read_only: bool, create_if_missing: bool) -> Result<Self> {
        let mut flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if create_if_missing && !read_only {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&path, flags)?;
        configure_connection(&conn)?;
        if !read_only {
            conn.execute_batch(SCHEMA)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn builder(path: impl AsRef<Path>) -> SqliteRepositoryBuilder {
        SqliteRepositoryBuilder::new(path)
    }
}

fn parse_instant(value: Option<String>, field: &'static str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|_| RepositoryError::InvalidValue { field, value: s }),
    }
}

fn source_page_from_row(row: &Row) -> rusqlite::Result<(SourcePage, Option<String>, Option<String>, Option<String>, String)> {
    let page_type_raw: String = row.get("page_type")?;
    let status_raw: String = row.get("status")?;
    let page = SourcePage {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        url: row.get("url")?,
        page_type: page_type_raw.parse().unwrap_or(crate::types::PageType::Other),
        last_checked_at: None,
        last_changed_at: None,
        last_rendered_at: None,
        last_normalized_fingerprint: row.get("last_normalized_fingerprint")?,
        last_rendered_fingerprint: row.get("last_rendered_fingerprint")?,
        consecutive_no_change: row.get::<_, i64>("consecutive_no_change")? as u32,
        status: status_raw.parse().unwrap_or(SourcePageStatus::Active),
        last_error: row.get("last_error")?,
    };
    let checked: Option<String> = row.get("last_checked_at")?;
    let changed: Option<String> = row.get("last_changed_at")?;
    let rendered: Option<String> = row.get("last_rendered_at")?;
    Ok((page, checked, changed, rendered, status_raw))
}

impl Repository for SqliteRepository {
    fn get_pages_to_check(&self, tenant_id: &str) -> Result<Vec<SourcePage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, url, page_type, last_checked_at, last_changed_at, \
             last_rendered_at, last_normalized_fingerprint, last_rendered_fingerprint, \
             consecutive_no_change, status, last_error FROM source_pages \
             WHERE tenant_id = ?1 AND status != 'removed'",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| source_page_from_row(row))?;
        let mut pages = Vec::new();
        for row in rows {
            let (mut page, checked, changed, rendered, _) = row?;
            page.last_checked_at = parse_instant(checked, "last_checked_at")?;
            page.last_changed_at = parse_instant(changed, "last_changed_at")?;
            page.last_rendered_at = parse_instant(rendered, "last_rendered_at")?;
            pages.push(page);
        }
        Ok(pages)
    }

    fn update_page(&self, page: &SourcePage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO source_pages (id, tenant_id, url, page_type, last_checked_at, \
             last_changed_at, last_rendered_at, last_normalized_fingerprint, \
             last_rendered_fingerprint, consecutive_no_change, status, last_error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(id) DO UPDATE SET \
               last_checked_at = excluded.last_checked_at, \
               last_changed_at = excluded.last_changed_at, \
               last_rendered_at = excluded.last_rendered_at, \
               last_normalized_fingerprint = excluded.last_normalized_fingerprint, \
               last_rendered_fingerprint = excluded.last_rendered_fingerprint, \
               consecutive_no_change = excluded.consecutive_no_change, \
               status = excluded.status, \
               last_error = excluded.last_error",
            params![
                page.id,
                page.tenant_id,
                page.url,
                page.page_type.as_str(),
                page.last_checked_at.map(|t| t.to_rfc3339()),
                page.last_changed_at.map(|t| t.to_rfc3339()),
                page.last_rendered_at.map(|t| t.to_rfc3339()),
                page.last_normalized_fingerprint,
                page.last_rendered_fingerprint,
                page.consecutive_no_change as i64,
                page.status.as_str(),
                page.last_error,
            ],
        )?;
        Ok(())
    }

    fn upsert_product(&self, product: &Product) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO products (id, tenant_id, source_url, external_key, title, subtitle, \
             body_type, fuel_type, availability, price_amount, disclaimer, \
             primary_image_fingerprint, gallery_count, key_features, calls_to_action, \
             variants, metadata, content_fingerprint, current_version_id, first_seen, last_seen) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21) \
             ON CONFLICT(tenant_id, external_key) DO UPDATE SET \
               title = excluded.title, subtitle = excluded.subtitle, body_type = excluded.body_type, \
               fuel_type = excluded.fuel_type, availability = excluded.availability, \
               price_amount = excluded.price_amount, disclaimer = excluded.disclaimer, \
               primary_image_fingerprint = excluded.primary_image_fingerprint, \
               gallery_count = excluded.gallery_count, key_features = excluded.key_features, \
               calls_to_action = excluded.calls_to_action, variants = excluded.variants, \
               metadata = excluded.metadata, content_fingerprint = excluded.content_fingerprint, \
               current_version_id = excluded.current_version_id, last_seen = excluded.last_seen",
            params![
                product.id,
                product.tenant_id,
                product.source_url,
                product.external_key,
                product.title,
                product.subtitle,
                product.body_type,
                product.fuel_type,
                product.availability,
                product.price_amount,
                product.disclaimer,
                product.primary_image_fingerprint,
                product.gallery_count as i64,
                serde_json::to_string(&product.key_features)?,
                serde_json::to_string(&product.calls_to_action)?,
                serde_json::to_string(&product.variants)?,
                serde_json::to_string(&product.metadata)?,
                product.content_fingerprint,
                product.current_version_id,
                product.first_seen.to_rfc3339(),
                product.last_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_offer(&self, offer: &Offer) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO offers (id, tenant_id, source_url, external_key, title, description, \
             offer_type, applicable_models, price_amount, saving_amount, valid_from, valid_to, \
             disclaimer, eligibility, content_fingerprint, current_version_id, first_seen, last_seen) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18) \
             ON CONFLICT(tenant_id, external_key) DO UPDATE SET \
               title = excluded.title, description = excluded.description, \
               offer_type = excluded.offer_type, applicable_models = excluded.applicable_models, \
               price_amount = excluded.price_amount, saving_amount = excluded.saving_amount, \
               valid_from = excluded.valid_from, valid_to = excluded.valid_to, \
               disclaimer = excluded.disclaimer, eligibility = excluded.eligibility, \
               content_fingerprint = excluded.content_fingerprint, \
               current_version_id = excluded.current_version_id, last_seen = excluded.last_seen",
            params![
                offer.id,
                offer.tenant_id,
                offer.source_url,
                offer.external_key,
                offer.title,
                offer.description,
                offer.offer_type,
                serde_json::to_string(&offer.applicable_models)?,
                offer.price_amount,
                offer.saving_amount,
                offer.valid_from.map(|t| t.to_rfc3339()),
                offer.valid_to.map(|t| t.to_rfc3339()),
                offer.disclaimer,
                offer.eligibility,
                offer.content_fingerprint,
                offer.current_version_id,
                offer.first_seen.to_rfc3339(),
                offer.last_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_banner(&self, banner: &Banner) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO banners (id, tenant_id, page_url, position, headline, subheadline, \
             cta_text, cta_url, desktop_image_url, mobile_image_url, image_fingerprint, \
             disclaimer, content_fingerprint, current_version_id, first_seen, last_seen) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16) \
             ON CONFLICT(tenant_id, page_url, position) DO UPDATE SET \
               headline = excluded.headline, subheadline = excluded.subheadline, \
               cta_text = excluded.cta_text, cta_url = excluded.cta_url, \
               desktop_image_url = excluded.desktop_image_url, \
               mobile_image_url = excluded.mobile_image_url, \
               image_fingerprint = excluded.image_fingerprint, disclaimer = excluded.disclaimer, \
               content_fingerprint = excluded.content_fingerprint, \
               current_version_id = excluded.current_version_id, last_seen = excluded.last_seen",
            params![
                banner.id,
                banner.tenant_id,
                banner.page_url,
                banner.position,
                banner.headline,
                banner.subheadline,
                banner.cta_text,
                banner.cta_url,
                banner.desktop_image_url,
                banner.mobile_image_url,
                banner.image_fingerprint,
                banner.disclaimer,
                banner.content_fingerprint,
                banner.current_version_id,
                banner.first_seen.to_rfc3339(),
                banner.last_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_product_id(&self, tenant_id: &str, external_key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM products WHERE tenant_id = ?1 AND external_key = ?2",
                params![tenant_id, external_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn find_offer_id(&self, tenant_id: &str, external_key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM offers WHERE tenant_id = ?1 AND external_key = ?2",
                params![tenant_id, external_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn find_banner_id(&self, tenant_id: &str, page_url: &str, position: i32) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM banners WHERE tenant_id = ?1 AND page_url = ?2 AND position = ?3",
                params![tenant_id, page_url, position],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn current_snapshot(&self, _entity_kind: EntityKind, entity_id: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM versions WHERE parent_entity_id = ?1 \
                 ORDER BY created_at DESC LIMIT 1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()?;
        match snapshot {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn insert_version(&self, version: &Version) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO versions (id, parent_entity_id, entity_kind, import_run_id, \
             content_fingerprint, snapshot, diff_summary, changed_fields, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                version.id,
                version.parent_entity_id,
                version.entity_kind.as_str(),
                version.import_run_id,
                version.content_fingerprint,
                serde_json::to_string(&version.snapshot)?,
                version.diff_summary,
                serde_json::to_string(&version.changed_fields)?,
                version.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn insert_change_event(&self, event: &ChangeEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO change_events (id, tenant_id, import_run_id, entity_type, entity_id, \
             event_type, severity, summary, diff, notified_at, notification_channel, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                event.id,
                event.tenant_id,
                event.import_run_id,
                event.entity_type.as_str(),
                event.entity_id,
                event.event_type.as_str(),
                event.severity.as_str(),
                event.summary,
                serde_json::to_string(&event.diff)?,
                event.notified_at.map(|t| t.to_rfc3339()),
                event.notification_channel.map(|c| c.as_str()),
                event.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn mark_notified(&self, change_event_id: &str, channel: &str, notified_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE change_events SET notified_at = ?2, notification_channel = ?3 WHERE id = ?1",
            params![change_event_id, notified_at.to_rfc3339(), channel],
        )?;
        Ok(())
    }

    fn get_render_counts(&self, tenant_id: &str, year_month: &str) -> Result<RenderCounts> {
        let conn = self.conn.lock().unwrap();
        let tenant: i64 = conn
            .query_row(
                "SELECT render_count FROM render_counters WHERE tenant_id = ?1 AND year_month = ?2",
                params![tenant_id, year_month],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let global: i64 = conn
            .query_row(
                "SELECT render_count FROM render_counters WHERE tenant_id = ?1 AND year_month = ?2",
                params![GLOBAL_COUNTER_KEY, year_month],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(RenderCounts {
            tenant: tenant as u32,
            global: global as u32,
        })
    }

    fn record_render(&self, tenant_id: &str, year_month: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for key in [tenant_id, GLOBAL_COUNTER_KEY] {
            conn.execute(
                "INSERT INTO render_counters (tenant_id, year_month, render_count) VALUES (?1, ?2, 1) \
                 ON CONFLICT(tenant_id, year_month) DO UPDATE SET render_count = render_count + 1",
                params![key, year_month],
            )?;
        }
        Ok(())
    }

    fn start_import_run(&self, run: &ImportRun) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO import_runs (id, tenant_id, started_at, status) VALUES (?1,?2,?3,?4)",
            params![run.id, run.tenant_id, run.started_at.to_rfc3339(), run.status.as_str()],
        )?;
        Ok(())
    }

    fn finish_import_run(&self, run: &ImportRun) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE import_runs SET finished_at = ?2, status = ?3, pages_checked = ?4, \
             pages_changed = ?5, pages_errored = ?6, entities_upserted = ?7, error_json = ?8 \
             WHERE id = ?1",
            params![
                run.id,
                run.finished_at.map(|t| t.to_rfc3339()),
                run.status.as_str(),
                run.counters.pages_checked as i64,
                run.counters.pages_changed as i64,
                run.counters.pages_errored as i64,
                run.counters.entities_upserted as i64,
                run.error_json.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageType;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, SqliteRepository) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let repo = SqliteRepositoryBuilder::new(&path).build().unwrap();
        (dir, repo)
    }

    #[test]
    fn upserts_and_reads_back_source_page() {
        let (_dir, repo) = repo();
        let mut page = SourcePage::new("bmw", "https://bmw.example/", PageType::Homepage);
        page.last_checked_at = Some(Utc::now());
        repo.update_page(&page).unwrap();

        let pages = repo.get_pages_to_check("bmw").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url, page.url);
        assert!(pages[0].last_checked_at.is_some());
    }

    #[test]
    fn render_counts_track_tenant_and_global() {
        let (_dir, repo) = repo();
        repo.record_render("bmw", "2026-08").unwrap();
        repo.record_render("audi", "2026-08").unwrap();
        let counts = repo.get_render_counts("bmw", "2026-08").unwrap();
        assert_eq!(counts.tenant, 1);
        assert_eq!(counts.global, 2);
    }

    #[test]
    fn find_product_id_resolves_the_natural_key_and_survives_reupsert() {
        let (_dir, repo) = repo();
        assert!(repo.find_product_id("bmw", "https://bmw.example/x5").unwrap().is_none());

        let now = Utc::now();
        let mut product = Product {
            id: "id-1".into(),
            tenant_id: "bmw".into(),
            source_url: "https://bmw.example/x5".into(),
            external_key: "https://bmw.example/x5".into(),
            title: "X5".into(),
            subtitle: None,
            body_type: None,
            fuel_type: None,
            availability: None,
            price_amount: Some(59990.0),
            disclaimer: None,
            primary_image_fingerprint: None,
            gallery_count: 0,
            key_features: Vec::new(),
            calls_to_action: Vec::new(),
            variants: Vec::new(),
            metadata: serde_json::Value::Null,
            content_fingerprint: "fp1".into(),
            current_version_id: None,
            first_seen: now,
            last_seen: now,
        };
        repo.upsert_product(&product).unwrap();
        let resolved = repo.find_product_id("bmw", "https://bmw.example/x5").unwrap();
        assert_eq!(resolved.as_deref(), Some("id-1"));

        // A re-extraction that (incorrectly) generated a fresh id must not
        // shadow the row's real natural-key-resolvable id.
        product.id = "id-2-should-be-ignored-on-conflict".into();
        product.price_amount = Some(58990.0);
        repo.upsert_product(&product).unwrap();
        let resolved_again = repo.find_product_id("bmw", "https://bmw.example/x5").unwrap();
        assert_eq!(resolved_again.as_deref(), Some("id-1"));
    }

    #[test]
    fn import_run_lifecycle_persists_counters() {
        let (_dir, repo) = repo();
        let mut run = ImportRun::start("bmw");
        repo.start_import_run(&run).unwrap();
        run.counters.pages_checked = 5;
        run.status = ImportRunStatus::Completed;
        run.finished_at = Some(Utc::now());
        repo.finish_import_run(&run).unwrap();
    }
}
