use clap::Args;

/// Shows render-budget usage and tenant counts for the current month.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Restrict the report to a single tenant code.
    #[arg(long)]
    pub tenant: Option<String>,
}
