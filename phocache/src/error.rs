//! Types d'erreurs pour phocache

use phosource::FetchError;

/// Erreurs du cache de médias
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Téléchargement impossible (réseau, source distante, délai dépassé)
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Admission impossible sans évincer un élément de la playlist courante
    #[error(
        "Quota exceeded for {item_id}: {requested} bytes requested, {used}/{capacity} bytes used"
    )]
    QuotaExceeded {
        item_id: String,
        requested: u64,
        used: u64,
        capacity: u64,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

impl CacheError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, CacheError::QuotaExceeded { .. })
    }
}

/// Type Result spécialisé pour phocache
pub type Result<T> = std::result::Result<T, CacheError>;
