//! End-to-end pass through the real driver: fetch a mocked tenant page,
//! render, extract product fields, detect a price change and route it to
//! a notifier, all against a real sqlite repository and filesystem
//! object store.

use std::sync::Arc;

use oemwatch_core::config::WatchConfig;
use oemwatch_core::registry::{OemRegistry, Tenant};
use oemwatch_core::{
    Driver, FsObjectStore, NullRenderer, NullTransport, Repository, SourcePage, SqliteRepositoryBuilder,
    StaticLlmClient,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry_with(tenant: Tenant) -> OemRegistry {
    let mut toml = String::new();
    toml.push_str("[[tenant]]\n");
    toml.push_str(&format!("code = \"{}\"\n", tenant.code));
    toml.push_str(&format!("display_name = \"{}\"\n", tenant.display_name));
    toml.push_str(&format!("base_url = \"{}\"\n", tenant.base_url));
    toml.push_str(&format!("requires_browser_rendering = {}\n", tenant.requires_browser_rendering));
    toml.push_str("active = true\n");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tenants.toml");
    std::fs::write(&path, toml).unwrap();
    OemRegistry::from_toml_file(&path).unwrap()
}

fn product_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><body>
            <h1 class="product-title">{title}</h1>
            <span class="price-value">{price}</span>
            <span class="availability">In Stock</span>
            <p class="disclaimer">Price excludes taxes.</p>
        </body></html>"#
    )
}

fn offer_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><body>
            <h1 class="offer-title">{title}</h1>
            <p class="offer-description">Limited time lease special.</p>
            <span class="price-value">{price}</span>
            <span class="offer-saving">$2,000</span>
            <p class="disclaimer">Offer ends soon.</p>
        </body></html>"#
    )
}

fn homepage(headline: &str) -> String {
    format!(
        r#"<html><body>
            <h1 class="banner-headline">{headline}</h1>
            <p class="banner-subheadline">Drive away today.</p>
            <a class="banner-cta">Build yours</a>
            <p class="disclaimer">See dealer for details.</p>
        </body></html>"#
    )
}

async fn build_driver(
    base_url: String,
    repo_dir: &std::path::Path,
    rendered_html: impl Into<String>,
) -> (Arc<Driver>, Arc<dyn Repository>) {
    let tenant = Tenant {
        code: "bmw".into(),
        display_name: "BMW".into(),
        base_url,
        requires_browser_rendering: false,
        active: true,
        schedule_overrides: vec![],
    };
    let registry = registry_with(tenant);

    let repository: Arc<dyn Repository> =
        Arc::new(SqliteRepositoryBuilder::new(repo_dir.join("oemwatch.sqlite3")).build().unwrap());
    let object_store = Arc::new(FsObjectStore::new(repo_dir.join("object_store")));
    // `NullRenderer` never actually navigates, so its fixed response must
    // match whatever body the mocked fetch returns for extraction to see
    // real content.
    let renderer = Arc::new(NullRenderer {
        html: rendered_html.into(),
    });
    let llm = Arc::new(StaticLlmClient { selector: String::new() });
    let notifier = Arc::new(NullTransport::default());

    let driver = Arc::new(Driver::new(
        registry,
        WatchConfig::default(),
        repository.clone(),
        object_store,
        renderer,
        llm,
        notifier,
    ));
    (driver, repository)
}

#[tokio::test]
async fn full_pass_detects_price_change_and_upserts_product() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vehicles/x5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("BMW X5", "$59990")))
        .mount(&server)
        .await;

    let repo_dir = tempfile::tempdir().unwrap();
    let html = product_page("BMW X5", "$59990");
    let (driver, repository) = build_driver(server.uri(), repo_dir.path(), html).await;

    let page = SourcePage::new("bmw", format!("{}/vehicles/x5", server.uri()), oemwatch_core::PageType::Vehicle);
    repository.update_page(&page).unwrap();

    let run = driver.run_tenant_pass("bmw", 2).await.unwrap();

    assert_eq!(run.counters.pages_checked, 1);
    assert_eq!(run.counters.pages_errored, 0);
    assert_eq!(run.counters.entities_upserted, 1);
    assert!(run.counters.pages_changed >= 1);
}

#[tokio::test]
async fn second_pass_on_unchanged_page_produces_no_new_entities() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vehicles/x5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("BMW X5", "$59990")))
        .mount(&server)
        .await;

    let repo_dir = tempfile::tempdir().unwrap();
    let html = product_page("BMW X5", "$59990");
    let (driver, repository) = build_driver(server.uri(), repo_dir.path(), html).await;

    let page = SourcePage::new("bmw", format!("{}/vehicles/x5", server.uri()), oemwatch_core::PageType::Vehicle);
    repository.update_page(&page).unwrap();

    let first = driver.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(first.counters.entities_upserted, 1);

    // scheduler's check-interval gate blocks an immediate re-check; this
    // verifies the second pass still completes cleanly with nothing new
    // to do rather than erroring or double-counting.
    let second = driver.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(second.counters.pages_errored, 0);
}

#[tokio::test]
async fn second_real_pass_diffs_against_first_snapshot_by_stable_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vehicles/x5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("BMW X5", "$59990")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/vehicles/x5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("BMW X5", "$58990")))
        .mount(&server)
        .await;

    let repo_dir = tempfile::tempdir().unwrap();
    let base_url = server.uri();
    let page_url = format!("{}/vehicles/x5", base_url);

    let html_v1 = product_page("BMW X5", "$59990");
    let (driver1, repository) = build_driver(base_url.clone(), repo_dir.path(), html_v1).await;

    let page = SourcePage::new("bmw", page_url.clone(), oemwatch_core::PageType::Vehicle);
    repository.update_page(&page).unwrap();

    let first = driver1.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(first.counters.entities_upserted, 1);

    let product_id = repository
        .find_product_id("bmw", &page_url)
        .unwrap()
        .expect("product persisted after first pass");
    let snapshot_after_first = repository
        .current_snapshot(oemwatch_core::EntityKind::Product, &product_id)
        .unwrap()
        .expect("version recorded after first pass");
    assert_eq!(snapshot_after_first["price_amount"], serde_json::json!(59990.0));

    // Backdate the scheduler state so the second pass genuinely re-checks
    // and re-renders instead of being gated by the check-interval.
    let mut stale_page = repository.get_pages_to_check("bmw").unwrap().remove(0);
    stale_page.last_checked_at = Some(chrono::Utc::now() - chrono::Duration::days(30));
    stale_page.last_rendered_at = Some(chrono::Utc::now() - chrono::Duration::days(30));
    repository.update_page(&stale_page).unwrap();

    let html_v2 = product_page("BMW X5", "$58990");
    let (driver2, _repository2) = build_driver(base_url, repo_dir.path(), html_v2).await;

    let second = driver2.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(second.counters.entities_upserted, 1);

    let product_id_again = repository
        .find_product_id("bmw", &page_url)
        .unwrap()
        .expect("product still present after second pass");
    assert_eq!(product_id_again, product_id);

    let snapshot_after_second = repository
        .current_snapshot(oemwatch_core::EntityKind::Product, &product_id)
        .unwrap()
        .expect("version recorded after second pass");
    assert_eq!(
        snapshot_after_second["price_amount"],
        serde_json::json!(58990.0),
        "second pass must diff against the first pass's snapshot rather than orphan it behind a fresh id"
    );
}

#[tokio::test]
async fn offer_page_upserts_an_offer_not_a_product() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/offers/summer"))
        .respond_with(ResponseTemplate::new(200).set_body_string(offer_page("Summer Lease Event", "$399/mo")))
        .mount(&server)
        .await;

    let repo_dir = tempfile::tempdir().unwrap();
    let html = offer_page("Summer Lease Event", "$399/mo");
    let (driver, repository) = build_driver(server.uri(), repo_dir.path(), html).await;

    let page_url = format!("{}/offers/summer", server.uri());
    let page = SourcePage::new("bmw", page_url.clone(), oemwatch_core::PageType::Offers);
    repository.update_page(&page).unwrap();

    let run = driver.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(run.counters.entities_upserted, 1);

    assert!(repository.find_offer_id("bmw", &page_url).unwrap().is_some());
    assert!(repository.find_product_id("bmw", &page_url).unwrap().is_none());
}

#[tokio::test]
async fn homepage_upserts_a_banner_not_a_product() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(homepage("New Model Year, New Savings")))
        .mount(&server)
        .await;

    let repo_dir = tempfile::tempdir().unwrap();
    let html = homepage("New Model Year, New Savings");
    let (driver, repository) = build_driver(server.uri(), repo_dir.path(), html).await;

    let page_url = format!("{}/", server.uri());
    let page = SourcePage::new("bmw", page_url.clone(), oemwatch_core::PageType::Homepage);
    repository.update_page(&page).unwrap();

    let run = driver.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(run.counters.entities_upserted, 1);

    assert!(repository.find_banner_id("bmw", &page_url, 0).unwrap().is_some());
    assert!(repository.find_product_id("bmw", &page_url).unwrap().is_none());
}

#[tokio::test]
async fn unreachable_page_is_marked_errored_without_panicking() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vehicles/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let repo_dir = tempfile::tempdir().unwrap();
    let (driver, repository) = build_driver(server.uri(), repo_dir.path(), "").await;

    let page = SourcePage::new("bmw", format!("{}/vehicles/gone", server.uri()), oemwatch_core::PageType::Vehicle);
    repository.update_page(&page).unwrap();

    let run = driver.run_tenant_pass("bmw", 1).await.unwrap();
    assert_eq!(run.counters.pages_errored, 1);
    assert_eq!(run.counters.entities_upserted, 0);
}
