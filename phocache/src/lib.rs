//! # phocache - Cache de médias pour Phoseum
//!
//! Stockage local des photos et vidéos sous un quota strict en octets.
//!
//! ## Fonctionnalités
//!
//! - **Quota** : `utilisé <= capacité` après chaque admission
//! - **LRU** : éviction des entrées les moins récemment utilisées
//! - **Protection** : les éléments de la playlist affichée ne sont jamais évincés
//! - **Registre persistant** : SQLite, reconstruit par rescan s'il est corrompu
//! - **Écritures atomiques** : fichier `.part` puis renommage
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use phocache::MediaCache;
//! use std::collections::HashSet;
//! use std::time::Duration;
//!
//! # async fn run(item: phosource::RemoteItem, source: &dyn phosource::PhotoSource) -> phocache::Result<()> {
//! let cache = MediaCache::open("/var/lib/phoseum/media", 10 << 30, Duration::from_secs(300)).await?;
//! let admission = cache.ensure(&item, source, &HashSet::new()).await?;
//! println!("{}", admission.path.display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod ledger;

#[cfg(feature = "phoconfig")]
pub mod config_ext;

pub use cache::{cache_key, Admission, CacheUsage, MediaCache};
pub use error::{CacheError, Result};
pub use ledger::CacheEntry;

#[cfg(feature = "phoconfig")]
pub use config_ext::CacheConfigExt;
