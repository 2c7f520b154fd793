//! # phoplaylist - Magasin de playlist de Phoseum
//!
//! Cette crate tient le catalogue des éléments de l'album distant et en
//! dérive la playlist affichée :
//! - `refresh()` : réconciliation peu coûteuse du listing (ajouts, disparitions)
//! - `update()` : re-téléchargement des éléments dont la version a changé
//! - Sélection déterministe : fenêtre de fraîcheur, puis bornes `min_size`/`max_size`
//! - Repli sur du contenu périmé en cache, signalé par [`DegradedFill`]
//! - Playlists immuables publiées sur un canal `watch`
//! - Persistance du catalogue (SQLite)
//!
//! # Architecture
//!
//! - **PlaylistStore** : propriétaire unique du catalogue, une seule synchronisation à la fois
//! - **MediaItem** : état canonique d'un élément (version, contenu local, fraîcheur)
//! - **Playlist** : instantané ordonné, jamais modifié après publication
//!
//! # Exemple d'utilisation
//!
//! ```no_run
//! use phoplaylist::{PlaylistPolicy, PlaylistStore};
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn phosource::PhotoSource>, cache: Arc<phocache::MediaCache>) -> phoplaylist::Result<()> {
//! let store = PlaylistStore::open(source, cache, PlaylistPolicy::default(), "/tmp/catalog.db")?;
//! store.load().await?;
//!
//! let mut playlists = store.subscribe();
//! let report = store.refresh().await?;
//! println!("{:?}: {} items", report.outcome, report.playlist_len);
//!
//! playlists.changed().await.ok();
//! let current = playlists.borrow().clone();
//! for entry in current.entries() {
//!     println!("{} -> {}", entry.id, entry.path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod item;
mod persistence;
mod playlist;
mod selection;
mod store;

#[cfg(feature = "phoconfig")]
mod config_ext;

// Réexports publics
pub use error::{Error, Result};
pub use item::{fresh_cutoff, Freshness, MediaItem};
pub use persistence::CatalogDb;
pub use playlist::{DegradedFill, Playlist, PlaylistEntry};
pub use selection::{rank_candidates, PlaylistPolicy, RankedCandidates, Selection};
pub use store::{
    CatalogCounts, PlaylistStatus, PlaylistStore, SkippedItem, SyncKind, SyncOutcome, SyncReport,
};

#[cfg(feature = "phoconfig")]
pub use config_ext::PlaylistConfigExt;
