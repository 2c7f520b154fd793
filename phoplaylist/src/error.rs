//! Types d'erreurs pour phoplaylist

use phocache::CacheError;
use phosource::FetchError;

/// Erreurs du magasin de playlist
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Remote source error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Invalid playlist policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// La prochaine synchronisation peut réussir sans intervention
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch(e) => e.is_retryable(),
            Error::Cache(CacheError::Fetch(e)) => e.is_retryable(),
            Error::InvalidPolicy(_) => false,
            _ => true,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::PersistenceError(e.to_string())
    }
}

/// Type Result spécialisé pour phoplaylist
pub type Result<T> = std::result::Result<T, Error>;
