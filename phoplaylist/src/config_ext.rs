//! Extension de phoconfig pour le magasin de playlist

use crate::selection::{
    PlaylistPolicy, DEFAULT_FRESH_RETENTION_SECS, DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE,
};
use crate::PlaylistStore;
use anyhow::Result;
use phocache::MediaCache;
use phoconfig::Config;
use phosource::PhotoSource;
use std::path::PathBuf;
use std::sync::Arc;

/// Trait d'extension pour phoconfig::Config
pub trait PlaylistConfigExt {
    /// Bornes et fenêtre de fraîcheur configurées (validées)
    fn get_playlist_policy(&self) -> Result<PlaylistPolicy>;

    /// Chemin de la base du catalogue
    fn playlist_db_path(&self) -> Result<PathBuf>;

    /// Ouvre le magasin configuré
    fn open_playlist_store(
        &self,
        source: Arc<dyn PhotoSource>,
        cache: Arc<MediaCache>,
    ) -> Result<PlaylistStore>;
}

impl PlaylistConfigExt for Config {
    fn get_playlist_policy(&self) -> Result<PlaylistPolicy> {
        let policy = PlaylistPolicy {
            min_size: self.get_u64_or(&["playlist", "min_size"], DEFAULT_MIN_SIZE as u64) as usize,
            max_size: self.get_u64_or(&["playlist", "max_size"], DEFAULT_MAX_SIZE as u64) as usize,
            fresh_retention_secs: self
                .get_u64_or(&["playlist", "fresh_retention"], DEFAULT_FRESH_RETENTION_SECS),
        };
        policy.validate()?;
        Ok(policy)
    }

    fn playlist_db_path(&self) -> Result<PathBuf> {
        // get_managed_dir crée le répertoire s'il n'existe pas
        let dir = self.get_managed_dir(&["playlist", "directory"], "playlist")?;
        Ok(dir.join("catalog.db"))
    }

    fn open_playlist_store(
        &self,
        source: Arc<dyn PhotoSource>,
        cache: Arc<MediaCache>,
    ) -> Result<PlaylistStore> {
        let policy = self.get_playlist_policy()?;
        let db_path = self.playlist_db_path()?;
        Ok(PlaylistStore::open(source, cache, policy, db_path)?)
    }
}
