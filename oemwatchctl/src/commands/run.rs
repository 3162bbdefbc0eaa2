use clap::Args;

/// Runs one scheduler pass over a tenant's active pages.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Tenant code to run, e.g. "bmw". Omit with --all to run every active tenant.
    pub tenant: Option<String>,

    /// Runs every active tenant in the registry instead of a single one.
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Number of concurrent page workers per tenant pass.
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,
}
