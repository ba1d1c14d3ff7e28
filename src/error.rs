//! Error taxonomy shared by the rebuild path and the HTTP layer.

use thiserror::Error;

/// Why a cache rebuild was abandoned.  The previous snapshot stays live in
/// every case.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// The tag listing call against the source-control host failed.
    #[error("tag source unavailable: {0:#}")]
    SourceUnavailable(#[source] anyhow::Error),
    /// The bucket listing call failed.
    #[error("storage unavailable: {0:#}")]
    StorageUnavailable(#[source] anyhow::Error),
}

impl RebuildError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RebuildError::SourceUnavailable(_) => "source_unavailable",
            RebuildError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

/// Lookup failures in the query layer.  The only user-visible error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error("no packages recorded for tag: {0}")]
    NoPackages(String),
    #[error("no file in latest matches {0:?}")]
    NoMatch(String),
}
