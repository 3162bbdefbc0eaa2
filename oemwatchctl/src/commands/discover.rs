use clap::{Args, Subcommand};

#[derive(Subcommand, Debug, Clone)]
pub enum DiscoverCommands {
    /// Shows the selector/API cache health summary for a tenant.
    Show(DiscoverShowArgs),
    /// Drops a tenant's discovery cache, forcing selector rediscovery on
    /// the next render.
    Reset(DiscoverShowArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DiscoverShowArgs {
    /// Tenant code, e.g. "bmw".
    pub tenant: String,
}
