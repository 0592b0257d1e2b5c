use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("API error: {0}")]
    Api(String),

    #[error("Sensor mapping error: {0}")]
    Mapping(String),

    #[error("Merge anomaly: {0}")]
    MergeAnomaly(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Media download failed: {0}")]
    DownloadFailed(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
