//! Extension de phoconfig pour le cache de médias

use crate::MediaCache;
use anyhow::{anyhow, Result};
use phoconfig::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Capacité par défaut : 10 Gio
pub const DEFAULT_CAPACITY: u64 = 10 * 1024 * 1024 * 1024;

/// Délai par défaut d'un téléchargement
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Trait d'extension pour phoconfig::Config
pub trait CacheConfigExt {
    /// Répertoire des médias (créé si nécessaire)
    fn get_media_dir(&self) -> Result<PathBuf>;

    /// Capacité du cache en octets
    fn get_storage_capacity(&self) -> Result<u64>;

    /// Délai maximal d'un téléchargement
    fn get_fetch_timeout(&self) -> Duration;

    /// Ouvre le cache configuré
    async fn open_media_cache(&self) -> Result<MediaCache>;
}

impl CacheConfigExt for Config {
    fn get_media_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["storage", "media_dir"], "media")
    }

    fn get_storage_capacity(&self) -> Result<u64> {
        match self.get_u64_or(&["storage", "capacity"], DEFAULT_CAPACITY) {
            0 => Err(anyhow!("storage.capacity must be greater than zero")),
            capacity => Ok(capacity),
        }
    }

    fn get_fetch_timeout(&self) -> Duration {
        let secs = self.get_u64_or(&["storage", "fetch_timeout"], DEFAULT_FETCH_TIMEOUT_SECS);
        Duration::from_secs(secs.max(1))
    }

    async fn open_media_cache(&self) -> Result<MediaCache> {
        let dir = self.get_media_dir()?;
        let capacity = self.get_storage_capacity()?;
        Ok(MediaCache::open(dir, capacity, self.get_fetch_timeout()).await?)
    }
}
