use clap::{Args, Subcommand};

#[derive(Subcommand, Debug, Clone)]
pub enum TenantsCommands {
    /// Lists every tenant in the registry.
    List,
    /// Shows a single tenant's configuration.
    Show(TenantShowArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TenantShowArgs {
    /// Tenant code, e.g. "bmw".
    pub code: String,
}
