#![allow(clippy::result_large_err)]

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use commands::discover::{DiscoverCommands, DiscoverShowArgs};
use commands::run::RunArgs;
use commands::status::StatusArgs;
use commands::tenants::{TenantShowArgs, TenantsCommands};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

use oemwatch_core::repository::RenderCounts;
use oemwatch_core::{
    CacheHealthSummary, ConfigBundle, ConfigError, Driver, DriverError, FsObjectStore,
    HttpLlmClient, ImportRun, LlmClient, NotificationTransport, NullTransport, ObjectStore,
    ObjectStoreError, Renderer, Repository, RepositoryError, SqliteRepositoryBuilder,
    StaticLlmClient, Tenant, WebhookTransport,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("renderer launch failed: {0}")]
    RendererLaunch(String),
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Parser, Debug)]
#[command(author, version, about = "oemwatch command-line control interface", long_about = None)]
pub struct Cli {
    /// Directory holding watch.toml and tenants.toml.
    #[arg(long, default_value = "configs")]
    pub config_dir: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enables verbose tracing on stderr.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Runs a scheduler pass over one tenant or every active tenant.
    Run(RunArgs),
    /// Shows render-budget usage for the current month.
    Status(StatusArgs),
    /// Tenant registry inspection.
    #[command(subcommand)]
    Tenants(TenantsCommands),
    /// Discovery cache inspection and reset.
    #[command(subcommand)]
    Discover(DiscoverCommands),
    /// Generates shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

trait DisplayFallback {
    fn display(&self) -> String;
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_fmt().with_env_filter(filter).try_init();
}

/// Resolved config plus the on-disk handles every command needs,
/// following `vvtvctl`'s `AppContext`: built once per invocation, paths
/// resolved eagerly, collaborators (repository, object store, renderer)
/// opened lazily per command so `tenants list` doesn't pay for a sqlite
/// connection or a browser launch it never uses.
struct AppContext {
    bundle: ConfigBundle,
    sqlite_path: PathBuf,
    object_store_root: PathBuf,
    runtime: Runtime,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let bundle = ConfigBundle::from_directory(&cli.config_dir)?;

        let data_dir = cli.config_dir.join("data");
        std::fs::create_dir_all(&data_dir)?;
        let sqlite_path = data_dir.join(&bundle.watch.storage.sqlite_path);
        let object_store_root = data_dir.join(&bundle.watch.storage.object_store_root);

        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::RendererLaunch(err.to_string()))?;

        Ok(Self {
            bundle,
            sqlite_path,
            object_store_root,
            runtime,
        })
    }

    fn tenant(&self, code: &str) -> Result<Tenant> {
        self.bundle
            .tenants
            .get(code)
            .cloned()
            .ok_or_else(|| AppError::UnknownTenant(code.to_string()))
    }

    fn repository(&self) -> Result<Arc<dyn Repository>> {
        Ok(Arc::new(SqliteRepositoryBuilder::new(&self.sqlite_path).build()?))
    }

    fn object_store(&self) -> Arc<dyn ObjectStore> {
        Arc::new(FsObjectStore::new(self.object_store_root.clone()))
    }

    fn llm_client(&self) -> Arc<dyn LlmClient> {
        match &self.bundle.watch.llm.endpoint {
            Some(endpoint) => Arc::new(HttpLlmClient::new(
                endpoint.clone(),
                self.bundle.watch.llm.api_key.clone(),
                self.bundle.watch.extraction.repair_timeout_ms,
            )),
            None => Arc::new(StaticLlmClient { selector: String::new() }),
        }
    }

    fn notifier(&self) -> Arc<dyn NotificationTransport> {
        match &self.bundle.watch.alerting.webhook_url {
            Some(url) => Arc::new(WebhookTransport::new(url.clone())),
            None => Arc::new(NullTransport::default()),
        }
    }
}

async fn launch_renderer(bundle: &ConfigBundle) -> Result<Arc<dyn Renderer>> {
    let mut builder = chromiumoxide::BrowserConfig::builder();
    if let Some(executable) = &bundle.watch.renderer.chrome_executable {
        builder = builder.chrome_executable(executable);
    }
    if !bundle.watch.renderer.headless {
        builder = builder.with_head();
    }
    let config = builder
        .build()
        .map_err(AppError::RendererLaunch)?;
    let (browser, mut handler) = chromiumoxide::Browser::launch(config)
        .await
        .map_err(|err| AppError::RendererLaunch(err.to_string()))?;
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });
    Ok(Arc::new(oemwatch_core::ChromiumRenderer::new(browser)))
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.debug);

    if let Commands::Completions { shell } = cli.command {
        output_completions(shell);
        return Ok(());
    }

    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Run(args) => {
            let report = run_tenants(&context, args)?;
            render(&report, cli.format)?;
        }
        Commands::Status(args) => {
            let report = status_report(&context, args)?;
            render(&report, cli.format)?;
        }
        Commands::Tenants(command) => match command {
            TenantsCommands::List => {
                let list = tenants_list(&context);
                render(&list, cli.format)?;
            }
            TenantsCommands::Show(args) => {
                let view = tenant_show(&context, args)?;
                render(&view, cli.format)?;
            }
        },
        Commands::Discover(command) => match command {
            DiscoverCommands::Show(args) => {
                let view = discover_show(&context, args)?;
                render(&view, cli.format)?;
            }
            DiscoverCommands::Reset(args) => {
                let result = discover_reset(&context, args)?;
                render(&result, cli.format)?;
            }
        },
        Commands::Completions { .. } => unreachable!("handled before context construction"),
    }

    Ok(())
}

fn output_completions(shell: Shell) {
    let mut command = Cli::command();
    generate(shell, &mut command, "oemwatchctl", &mut std::io::stdout());
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub runs: Vec<ImportRunView>,
}

#[derive(Debug, Serialize)]
pub struct ImportRunView {
    pub tenant_id: String,
    pub status: String,
    pub pages_checked: u32,
    pub pages_changed: u32,
    pub pages_errored: u32,
    pub entities_upserted: u32,
}

impl From<&ImportRun> for ImportRunView {
    fn from(run: &ImportRun) -> Self {
        Self {
            tenant_id: run.tenant_id.clone(),
            status: run.status.as_str().to_string(),
            pages_checked: run.counters.pages_checked,
            pages_changed: run.counters.pages_changed,
            pages_errored: run.counters.pages_errored,
            entities_upserted: run.counters.entities_upserted,
        }
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        self.runs
            .iter()
            .map(|r| {
                format!(
                    "{}: {} (checked={} changed={} errored={} upserted={})",
                    r.tenant_id, r.status, r.pages_checked, r.pages_changed, r.pages_errored, r.entities_upserted
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn run_tenants(context: &AppContext, args: &RunArgs) -> Result<RunReport> {
    let codes: Vec<String> = if args.all {
        context.bundle.tenants.active_tenants().iter().map(|t| t.code.clone()).collect()
    } else {
        match &args.tenant {
            Some(code) => vec![code.clone()],
            None => return Err(AppError::UnknownTenant("no tenant given; pass a code or --all".into())),
        }
    };

    let repository = context.repository()?;
    let object_store = context.object_store();
    let llm = context.llm_client();
    let notifier = context.notifier();
    let renderer: Arc<dyn Renderer> = context.runtime.block_on(launch_renderer(&context.bundle))?;
    let driver = Arc::new(Driver::new(
        context.bundle.tenants.clone(),
        context.bundle.watch.clone(),
        repository,
        object_store,
        renderer,
        llm,
        notifier,
    ));

    let mut runs = Vec::with_capacity(codes.len());
    for code in codes {
        let run = context.runtime.block_on(driver.run_tenant_pass(&code, args.workers.max(1)))?;
        runs.push(ImportRunView::from(&run));
    }
    context.runtime.block_on(driver.flush_hourly_batches());
    Ok(RunReport { runs })
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub active_tenants: usize,
    pub total_tenants: usize,
    pub budgets: Vec<TenantBudgetView>,
}

#[derive(Debug, Serialize)]
pub struct TenantBudgetView {
    pub tenant_id: String,
    pub tenant_renders_this_month: u32,
    pub global_renders_this_month: u32,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "tenants: {} active / {} total",
            self.active_tenants, self.total_tenants
        )];
        for budget in &self.budgets {
            lines.push(format!(
                "  {}: {} renders this month (global {})",
                budget.tenant_id, budget.tenant_renders_this_month, budget.global_renders_this_month
            ));
        }
        lines.join("\n")
    }
}

fn status_report(context: &AppContext, args: &StatusArgs) -> Result<StatusReport> {
    let year_month = Utc::now().format("%Y-%m").to_string();
    let codes: Vec<String> = match &args.tenant {
        Some(code) => vec![context.tenant(code)?.code],
        None => context.bundle.tenants.tenants().iter().map(|t| t.code.clone()).collect(),
    };

    let repository = context.repository()?;
    let mut budgets = Vec::with_capacity(codes.len());
    for code in codes {
        let counts: RenderCounts = repository.get_render_counts(&code, &year_month)?;
        budgets.push(TenantBudgetView {
            tenant_id: code,
            tenant_renders_this_month: counts.tenant,
            global_renders_this_month: counts.global,
        });
    }

    Ok(StatusReport {
        active_tenants: context.bundle.tenants.active_tenants().len(),
        total_tenants: context.bundle.tenants.tenants().len(),
        budgets,
    })
}

#[derive(Debug, Serialize)]
pub struct TenantListView {
    pub tenants: Vec<TenantSummary>,
}

#[derive(Debug, Serialize)]
pub struct TenantSummary {
    pub code: String,
    pub display_name: String,
    pub base_url: String,
    pub active: bool,
    pub requires_browser_rendering: bool,
}

impl From<&Tenant> for TenantSummary {
    fn from(tenant: &Tenant) -> Self {
        Self {
            code: tenant.code.clone(),
            display_name: tenant.display_name.clone(),
            base_url: tenant.base_url.clone(),
            active: tenant.active,
            requires_browser_rendering: tenant.requires_browser_rendering,
        }
    }
}

impl DisplayFallback for TenantListView {
    fn display(&self) -> String {
        self.tenants
            .iter()
            .map(|t| format!("{} ({}) - {} - active={}", t.code, t.display_name, t.base_url, t.active))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn tenants_list(context: &AppContext) -> TenantListView {
    let mut tenants: Vec<TenantSummary> = context.bundle.tenants.tenants().iter().map(|t| TenantSummary::from(*t)).collect();
    tenants.sort_by(|a, b| a.code.cmp(&b.code));
    TenantListView { tenants }
}

impl DisplayFallback for TenantSummary {
    fn display(&self) -> String {
        format!(
            "{} ({})\n  base_url: {}\n  active: {}\n  requires_browser_rendering: {}",
            self.code, self.display_name, self.base_url, self.active, self.requires_browser_rendering
        )
    }
}

fn tenant_show(context: &AppContext, args: &TenantShowArgs) -> Result<TenantSummary> {
    let tenant = context.tenant(&args.code)?;
    Ok(TenantSummary::from(&tenant))
}

#[derive(Debug, Serialize)]
pub struct DiscoverView {
    pub tenant_id: String,
    pub summary: CacheSummaryView,
}

#[derive(Debug, Serialize)]
pub struct CacheSummaryView {
    pub has_cache: bool,
    pub selector_count: usize,
    pub healthy_selector_count: usize,
    pub api_count: usize,
    pub healthy_api_count: usize,
    pub success_rate: f64,
}

impl From<CacheHealthSummary> for CacheSummaryView {
    fn from(summary: CacheHealthSummary) -> Self {
        Self {
            has_cache: summary.has_cache,
            selector_count: summary.selector_count,
            healthy_selector_count: summary.healthy_selector_count,
            api_count: summary.api_count,
            healthy_api_count: summary.healthy_api_count,
            success_rate: summary.success_rate,
        }
    }
}

impl DisplayFallback for DiscoverView {
    fn display(&self) -> String {
        format!(
            "{}: {} selectors ({} healthy), {} apis ({} healthy), success_rate={:.2}",
            self.tenant_id,
            self.summary.selector_count,
            self.summary.healthy_selector_count,
            self.summary.api_count,
            self.summary.healthy_api_count,
            self.summary.success_rate
        )
    }
}

fn load_cache(context: &AppContext, tenant_id: &str) -> Result<oemwatch_core::DiscoveryCache> {
    let key = oemwatch_core::object_store::discovery_cache_key(tenant_id);
    let object_store = context.object_store();
    match context.runtime.block_on(object_store.get(&key)) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(_) => Ok(oemwatch_core::DiscoveryCache::new(tenant_id)),
    }
}

fn discover_show(context: &AppContext, args: &DiscoverShowArgs) -> Result<DiscoverView> {
    let tenant = context.tenant(&args.tenant)?;
    let cache = load_cache(context, &tenant.code)?;
    Ok(DiscoverView {
        tenant_id: tenant.code,
        summary: cache.health_summary().into(),
    })
}

#[derive(Debug, Serialize)]
pub struct DiscoverResetResult {
    pub tenant_id: String,
    pub reset: bool,
}

impl DisplayFallback for DiscoverResetResult {
    fn display(&self) -> String {
        format!("{}: discovery cache reset", self.tenant_id)
    }
}

fn discover_reset(context: &AppContext, args: &DiscoverShowArgs) -> Result<DiscoverResetResult> {
    let tenant = context.tenant(&args.tenant)?;
    let fresh = oemwatch_core::DiscoveryCache::new(&tenant.code);
    let key = oemwatch_core::object_store::discovery_cache_key(&tenant.code);
    let bytes = serde_json::to_vec(&fresh)?;
    context.runtime.block_on(context.object_store().put(&key, bytes))?;
    Ok(DiscoverResetResult { tenant_id: tenant.code, reset: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join("configs");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::copy("../configs/tenants.toml", config_dir.join("tenants.toml")).unwrap();
        std::fs::copy("../configs/watch.toml", config_dir.join("watch.toml")).unwrap();

        let cli = Cli {
            config_dir,
            format: OutputFormat::Text,
            debug: false,
            command: Commands::Tenants(TenantsCommands::List),
        };
        let context = AppContext::new(&cli).expect("build AppContext from fixture configs");
        (temp, context)
    }

    #[test]
    fn tenants_list_sorts_by_code_and_matches_fixture_count() {
        let (_temp, context) = prepare_test_context();
        let list = tenants_list(&context);
        assert_eq!(list.tenants.len(), 13);
        let codes: Vec<&str> = list.tenants.iter().map(|t| t.code.as_str()).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn tenant_show_finds_known_tenant_and_errors_on_unknown() {
        let (_temp, context) = prepare_test_context();
        let view = tenant_show(&context, &TenantShowArgs { code: "bmw".into() }).unwrap();
        assert_eq!(view.code, "bmw");

        let err = tenant_show(&context, &TenantShowArgs { code: "does-not-exist".into() });
        assert!(matches!(err, Err(AppError::UnknownTenant(_))));
    }

    #[test]
    fn status_report_counts_zero_renders_for_a_fresh_repository() {
        let (_temp, context) = prepare_test_context();
        let report = status_report(&context, &StatusArgs { tenant: Some("bmw".into()) }).unwrap();
        assert_eq!(report.budgets.len(), 1);
        assert_eq!(report.budgets[0].tenant_renders_this_month, 0);
    }

    #[test]
    fn discover_show_reports_no_cache_before_any_run() {
        let (_temp, context) = prepare_test_context();
        let view = discover_show(&context, &DiscoverShowArgs { tenant: "bmw".into() }).unwrap();
        assert!(!view.summary.has_cache);
    }
}
