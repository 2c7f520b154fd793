//! Magasin de playlist
//!
//! [`PlaylistStore`] est l'unique propriétaire du catalogue des éléments de
//! l'album. Les synchronisations (`refresh`, `update`) sont sérialisées par un
//! verrou dédié : une demande reçue pendant qu'une autre est en cours est
//! fusionnée avec elle (`SyncOutcome::Coalesced`) plutôt que mise en file.
//!
//! Chaque synchronisation se termine par le calcul d'une nouvelle playlist
//! immuable, publiée sur un canal `watch` uniquement si son contenu diffère de
//! la précédente.

use crate::item::{fresh_cutoff, Freshness, MediaItem};
use crate::persistence::CatalogDb;
use crate::playlist::{DegradedFill, Playlist, PlaylistEntry};
use crate::selection::{rank_candidates, PlaylistPolicy, Selection};
use crate::Result;
use chrono::{DateTime, Utc};
use phocache::{CacheError, MediaCache};
use phosource::{PhotoSource, RemoteItem};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Nombre d'absences consécutives après lequel un élément sans contenu
/// local est retiré du catalogue
const PRUNE_AFTER_MISSES: u32 = 8;

type Catalog = HashMap<String, MediaItem>;

/// Type de synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Load,
    Refresh,
    Update,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Load => "load",
            SyncKind::Refresh => "refresh",
            SyncKind::Update => "update",
        }
    }
}

/// Issue d'une synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Une nouvelle playlist a été publiée
    Completed,
    /// La playlist recalculée est identique à la précédente
    Unchanged,
    /// Une autre synchronisation était en cours, rien n'a été fait
    Coalesced,
}

/// Élément ignoré pendant ce cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
    /// Ignoré faute de place dans le cache
    pub quota_exceeded: bool,
}

/// Compte rendu d'une synchronisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub kind: SyncKind,
    pub outcome: SyncOutcome,
    /// Éléments découverts
    pub added: usize,
    /// Éléments absents du listing (pour la première fois)
    pub removed: usize,
    /// Éléments re-téléchargés car leur version a changé
    pub refetched: usize,
    pub skipped: Vec<SkippedItem>,
    /// Éléments évincés du cache pendant ce cycle
    pub evicted: Vec<String>,
    pub degraded: Option<DegradedFill>,
    pub playlist_len: usize,
    pub generation: u64,
    /// Le listing distant était vide alors que le catalogue ne l'est pas
    pub album_empty: bool,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            outcome: SyncOutcome::Unchanged,
            added: 0,
            removed: 0,
            refetched: 0,
            skipped: Vec::new(),
            evicted: Vec::new(),
            degraded: None,
            playlist_len: 0,
            generation: 0,
            album_empty: false,
            finished_at: Utc::now(),
        }
    }

    fn coalesced(kind: SyncKind) -> Self {
        Self {
            outcome: SyncOutcome::Coalesced,
            ..Self::new(kind)
        }
    }

    fn skip(&mut self, id: &str, error: &CacheError) {
        self.skipped.push(SkippedItem {
            id: id.to_string(),
            reason: error.to_string(),
            quota_exceeded: error.is_quota_exceeded(),
        });
    }
}

/// Répartition du catalogue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
    pub evicted: usize,
    pub cached: usize,
    /// Absents du dernier listing
    pub missing: usize,
}

/// État du magasin, exposé par l'API de statut
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistStatus {
    pub generation: u64,
    pub len: usize,
    pub degraded: Option<DegradedFill>,
    pub published_at: DateTime<Utc>,
    pub catalog: CatalogCounts,
    pub policy: PlaylistPolicy,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub syncing: bool,
}

/// Mode de construction de la playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    /// Télécharge les éléments sélectionnés absents du cache
    Fetch,
    /// N'utilise que le contenu déjà en cache
    CachedOnly,
}

#[derive(Debug, Default)]
struct SyncTimes {
    last_refresh: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    last_report: Option<SyncReport>,
}

/// Magasin de playlist
#[derive(Debug)]
pub struct PlaylistStore {
    source: Arc<dyn PhotoSource>,
    cache: Arc<MediaCache>,
    policy: PlaylistPolicy,
    db: CatalogDb,
    catalog: Mutex<Catalog>,
    sync_lock: tokio::sync::Mutex<()>,
    snapshot_tx: watch::Sender<Arc<Playlist>>,
    times: Mutex<SyncTimes>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PlaylistStore {
    /// Crée le magasin ; le catalogue est vide tant que `load()` n'a pas été appelé
    pub fn open(
        source: Arc<dyn PhotoSource>,
        cache: Arc<MediaCache>,
        policy: PlaylistPolicy,
        db_path: impl AsRef<Path>,
    ) -> Result<Self> {
        policy.validate()?;
        let db = CatalogDb::open(db_path.as_ref())?;
        let (snapshot_tx, _) = watch::channel(Arc::new(Playlist::empty()));
        Ok(Self {
            source,
            cache,
            policy,
            db,
            catalog: Mutex::new(HashMap::new()),
            sync_lock: tokio::sync::Mutex::new(()),
            snapshot_tx,
            times: Mutex::new(SyncTimes::default()),
        })
    }

    pub fn policy(&self) -> PlaylistPolicy {
        self.policy
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    pub fn source(&self) -> &Arc<dyn PhotoSource> {
        &self.source
    }

    /// Playlist courante
    pub fn snapshot(&self) -> Arc<Playlist> {
        self.snapshot_tx.borrow().clone()
    }

    /// Abonnement aux nouvelles playlists
    pub fn subscribe(&self) -> watch::Receiver<Arc<Playlist>> {
        self.snapshot_tx.subscribe()
    }

    /// Date du dernier `refresh` réussi
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        locked(&self.times).last_refresh
    }

    /// Copie d'un élément du catalogue
    pub fn item(&self, id: &str) -> Option<MediaItem> {
        locked(&self.catalog).get(id).cloned()
    }

    /// Restaure le catalogue persistant et publie une première playlist
    /// construite uniquement à partir du contenu en cache
    pub async fn load(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let mut report = SyncReport::new(SyncKind::Load);

        let mut catalog: Catalog = self
            .db
            .load_all()?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        self.sync_with_cache(&mut catalog).await;

        let (entries, degraded) = self
            .build(&mut catalog, &HashMap::new(), BuildMode::CachedOnly, &mut report)
            .await;
        info!(items = catalog.len(), playlist = entries.len(), "Playlist catalog loaded");
        self.commit(catalog, entries, degraded, report)
    }

    /// Réconcilie le catalogue avec le listing distant
    ///
    /// Ajoute les nouveaux éléments, signale ceux qui ont disparu, puis
    /// recalcule la playlist en téléchargeant le contenu manquant.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            debug!("Refresh requested while a sync is running, coalesced");
            return Ok(SyncReport::coalesced(SyncKind::Refresh));
        };
        let mut report = SyncReport::new(SyncKind::Refresh);
        let listing = self.source.list_items().await?;
        let now = Utc::now();
        let mut catalog = locked(&self.catalog).clone();

        if listing.is_empty() && !catalog.is_empty() {
            warn!(
                source = self.source.name(),
                known = catalog.len(),
                "Remote album listed no items, keeping the current playlist"
            );
            report.album_empty = true;
            locked(&self.times).last_refresh = Some(now);
            return Ok(self.keep_current(report));
        }

        let cutoff = fresh_cutoff(now, self.policy.fresh_retention_secs);
        let listed: HashMap<String, RemoteItem> = listing
            .into_iter()
            .map(|remote| (remote.id.clone(), remote))
            .collect();

        for remote in listed.values() {
            match catalog.get_mut(&remote.id) {
                Some(item) => {
                    // Un élément évincé redevient candidat dès qu'il est listé
                    if item.freshness == Freshness::Evicted {
                        item.freshness = Freshness::Stale;
                    }
                    item.observe(remote, now);
                }
                None => {
                    debug!(item_id = %remote.id, kind = %remote.kind, "New album item");
                    catalog.insert(remote.id.clone(), MediaItem::from_remote(remote, now));
                    report.added += 1;
                }
            }
        }

        let mut pruned = Vec::new();
        for item in catalog.values_mut().filter(|i| !listed.contains_key(&i.id)) {
            item.missed_refreshes = item.missed_refreshes.saturating_add(1);
            if item.missed_refreshes == 1 {
                report.removed += 1;
            }
            if item.missed_refreshes >= 2 && !item.is_within(cutoff) {
                self.evict_missing(item).await;
            }
            if item.missed_refreshes >= PRUNE_AFTER_MISSES && !item.is_cached() {
                pruned.push(item.id.clone());
            }
        }
        for id in pruned {
            catalog.remove(&id);
        }

        self.sync_with_cache(&mut catalog).await;
        let (entries, degraded) = self
            .build(&mut catalog, &listed, BuildMode::Fetch, &mut report)
            .await;
        locked(&self.times).last_refresh = Some(now);

        info!(
            added = report.added,
            removed = report.removed,
            skipped = report.skipped.len(),
            "Refresh reconciled"
        );
        let report = self.commit(catalog, entries, degraded, report)?;
        self.cache.release_retired().await;
        Ok(report)
    }

    /// Re-télécharge les éléments connus dont la version distante a changé
    pub async fn update(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            debug!("Update requested while a sync is running, coalesced");
            return Ok(SyncReport::coalesced(SyncKind::Update));
        };
        let mut report = SyncReport::new(SyncKind::Update);
        let listing = self.source.list_items().await?;
        let now = Utc::now();
        let mut catalog = locked(&self.catalog).clone();

        if listing.is_empty() && !catalog.is_empty() {
            warn!(source = self.source.name(), "Remote album listed no items, update skipped");
            report.album_empty = true;
            locked(&self.times).last_update = Some(now);
            return Ok(self.keep_current(report));
        }

        for remote in &listing {
            if let Some(item) = catalog.get_mut(&remote.id) {
                item.observe(remote, now);
            }
        }
        self.sync_with_cache(&mut catalog).await;

        let mut reserved = HashSet::new();
        for remote in &listing {
            let Some(item) = catalog.get(&remote.id) else {
                continue;
            };
            if !item.is_eligible() || !item.is_outdated() {
                continue;
            }
            debug!(
                item_id = %remote.id,
                cached = ?item.cached_version,
                remote = %remote.version,
                "Content changed, refetching"
            );
            match self.cache.fetch_and_admit(remote, self.source.as_ref(), &reserved).await {
                Ok(admission) => {
                    if let Some(item) = catalog.get_mut(&remote.id) {
                        item.local_path = Some(admission.path);
                        item.cached_version = Some(remote.version.clone());
                    }
                    mark_evicted(&mut catalog, &admission.evicted, &mut report);
                    reserved.insert(remote.id.clone());
                    report.refetched += 1;
                }
                Err(e) => {
                    warn!(item_id = %remote.id, "Refetch failed, keeping previous content: {}", e);
                    report.skip(&remote.id, &e);
                }
            }
        }

        self.sync_with_cache(&mut catalog).await;
        let (entries, degraded) = self
            .build(&mut catalog, &HashMap::new(), BuildMode::CachedOnly, &mut report)
            .await;
        locked(&self.times).last_update = Some(now);

        info!(refetched = report.refetched, skipped = report.skipped.len(), "Update completed");
        let report = self.commit(catalog, entries, degraded, report)?;
        self.cache.release_retired().await;
        Ok(report)
    }

    /// État courant du magasin
    pub fn status(&self) -> PlaylistStatus {
        let snapshot = self.snapshot();
        let catalog = {
            let catalog = locked(&self.catalog);
            let mut counts = CatalogCounts {
                total: catalog.len(),
                ..Default::default()
            };
            for item in catalog.values() {
                match item.freshness {
                    Freshness::Fresh => counts.fresh += 1,
                    Freshness::Stale => counts.stale += 1,
                    Freshness::Evicted => counts.evicted += 1,
                }
                if item.is_cached() {
                    counts.cached += 1;
                }
                if item.missed_refreshes > 0 {
                    counts.missing += 1;
                }
            }
            counts
        };
        let times = locked(&self.times);
        PlaylistStatus {
            generation: snapshot.generation(),
            len: snapshot.len(),
            degraded: snapshot.degraded(),
            published_at: snapshot.published_at(),
            catalog,
            policy: self.policy,
            last_refresh: times.last_refresh,
            last_update: times.last_update,
            last_report: times.last_report.clone(),
            syncing: self.sync_lock.try_lock().is_err(),
        }
    }

    /// Supprime le contenu local d'un élément disparu de l'album
    async fn evict_missing(&self, item: &mut MediaItem) {
        if item.freshness == Freshness::Evicted {
            return;
        }
        if item.is_cached() {
            match self.cache.remove(&item.id).await {
                Ok(true) => {}
                // Encore affiché : retenté à la prochaine synchronisation
                Ok(false) if self.cache.is_live(&item.id) => return,
                Ok(false) => {}
                Err(e) => {
                    warn!(item_id = %item.id, "Failed to remove vanished item from cache: {}", e);
                    return;
                }
            }
        }
        info!(item_id = %item.id, "Item gone from album, evicted");
        item.clear_local();
        item.freshness = Freshness::Evicted;
    }

    /// Aligne l'état local des éléments sur le contenu réel du cache
    async fn sync_with_cache(&self, catalog: &mut Catalog) {
        let entries: HashMap<String, phocache::CacheEntry> = self
            .cache
            .entries()
            .await
            .into_iter()
            .map(|e| (e.item_id.clone(), e))
            .collect();
        for item in catalog.values_mut() {
            match entries.get(&item.id) {
                Some(entry) => {
                    item.local_path = Some(self.cache.cache_dir().join(entry.file_name()));
                    item.size = Some(entry.size);
                    item.cached_version = entry.version.clone();
                }
                None => item.clear_local(),
            }
        }
    }

    /// Calcule la playlist à partir du catalogue
    async fn build(
        &self,
        catalog: &mut Catalog,
        listed: &HashMap<String, RemoteItem>,
        mode: BuildMode,
        report: &mut SyncReport,
    ) -> (Vec<PlaylistEntry>, Option<DegradedFill>) {
        let cutoff = fresh_cutoff(Utc::now(), self.policy.fresh_retention_secs);
        for item in catalog.values_mut() {
            item.classify(cutoff);
        }

        let ranked = rank_candidates(catalog.values());
        let mut selection = Selection::new(self.policy);
        let mut reserved: HashSet<String> = HashSet::new();

        let candidates = ranked
            .fresh
            .into_iter()
            .map(|id| (id, true))
            .chain(ranked.stale.into_iter().map(|id| (id, false)));

        for (id, fresh) in candidates {
            if fresh && !selection.wants_fresh() {
                continue;
            }
            if !fresh && !selection.wants_stale() {
                break;
            }
            let Some(item) = catalog.get(&id).cloned() else {
                continue;
            };
            // Peut avoir été évincé par une admission de ce cycle
            if !item.is_eligible() {
                continue;
            }

            let path = match (mode, &item.local_path) {
                (BuildMode::CachedOnly, Some(path)) => path.clone(),
                (BuildMode::CachedOnly, None) => continue,
                (BuildMode::Fetch, _) => {
                    let remote = listed.get(&id).cloned().unwrap_or_else(|| item.to_remote());
                    match self.cache.ensure(&remote, self.source.as_ref(), &reserved).await {
                        Ok(admission) => {
                            if let Some(entry) = catalog.get_mut(&id) {
                                entry.local_path = Some(admission.path.clone());
                                if admission.fetched {
                                    entry.cached_version = Some(remote.version.clone());
                                }
                            }
                            mark_evicted(catalog, &admission.evicted, report);
                            admission.path
                        }
                        Err(e) => {
                            warn!(item_id = %id, "Item skipped for this cycle: {}", e);
                            report.skip(&id, &e);
                            continue;
                        }
                    }
                }
            };

            let version = catalog.get(&id).and_then(|i| i.cached_version.clone());
            reserved.insert(id.clone());
            selection.push(PlaylistEntry {
                id,
                kind: item.kind,
                path,
                version,
                fresh,
            });
        }

        let (entries, degraded) = selection.finish();
        if let Some(fill) = &degraded {
            warn!(
                fresh = fill.fresh,
                total = fill.total,
                min_size = fill.min_size,
                "Not enough fresh items, playlist filled with stale content"
            );
        }
        (entries, degraded)
    }

    /// Publie la playlist si son contenu a changé, puis persiste le catalogue
    fn commit(
        &self,
        catalog: Catalog,
        entries: Vec<PlaylistEntry>,
        degraded: Option<DegradedFill>,
        mut report: SyncReport,
    ) -> Result<SyncReport> {
        report.playlist_len = entries.len();
        report.degraded = degraded;

        let current = self.snapshot();
        if current.same_content(&entries, &degraded) {
            report.outcome = SyncOutcome::Unchanged;
            report.generation = current.generation();
        } else {
            let playlist = Arc::new(Playlist::new(entries, degraded, current.generation() + 1));
            // Les nouveaux éléments sont protégés avant d'être visibles
            self.cache.set_live(playlist.ids().map(String::from));
            report.outcome = SyncOutcome::Completed;
            report.generation = playlist.generation();
            info!(
                generation = playlist.generation(),
                len = playlist.len(),
                degraded = playlist.degraded().is_some(),
                "Playlist published"
            );
            self.snapshot_tx.send_replace(playlist);
        }

        let persisted = self.db.save_all(catalog.values());
        *locked(&self.catalog) = catalog;
        report.finished_at = Utc::now();
        locked(&self.times).last_report = Some(report.clone());
        persisted?;
        Ok(report)
    }

    /// Termine un cycle sans toucher à la playlist
    fn keep_current(&self, mut report: SyncReport) -> SyncReport {
        let current = self.snapshot();
        report.outcome = SyncOutcome::Unchanged;
        report.playlist_len = current.len();
        report.generation = current.generation();
        report.degraded = current.degraded();
        report.finished_at = Utc::now();
        locked(&self.times).last_report = Some(report.clone());
        report
    }
}

/// Marque comme évincés les éléments retirés du cache par une admission
fn mark_evicted(catalog: &mut Catalog, evicted: &[String], report: &mut SyncReport) {
    for id in evicted {
        if let Some(item) = catalog.get_mut(id) {
            item.clear_local();
            item.freshness = Freshness::Evicted;
        }
        report.evicted.push(id.clone());
    }
}
