use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required tenant: {0}")]
    UnknownTenant(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Crate-wide umbrella error. Individual modules return their own
/// `thiserror` enum; the driver collapses them into this one when
/// reporting a failed `ImportRun`.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Extraction(#[from] crate::extraction::ExtractionError),
    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),
    #[error(transparent)]
    ObjectStore(#[from] crate::object_store::ObjectStoreError),
    #[error(transparent)]
    Notify(#[from] crate::notification::NotifyError),
    #[error(transparent)]
    Renderer(#[from] crate::renderer::RendererError),
    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),
    #[error(transparent)]
    Driver(#[from] crate::driver::DriverError),
}
