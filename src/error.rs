use std::path::PathBuf;

use thiserror::Error;

/// Everything an introspection call can be rejected with.
#[derive(Debug, Error)]
pub enum CombeeError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error("failed to fetch jobs from the store")]
    Fetch(#[source] anyhow::Error),
    #[error("failed to remove job {id}")]
    Removal {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write {}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T, E = CombeeError> = std::result::Result<T, E>;
