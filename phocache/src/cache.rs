//! Cache de médias borné en octets
//!
//! Les fichiers sont stockés sous `<dir>/<clé>.<extension>`, accompagnés du
//! registre `<dir>/ledger.db`. Toutes les mutations de la comptabilité
//! (table des entrées, octets utilisés, horloge LRU) passent par un unique
//! verrou, ce qui garantit `utilisé <= capacité` après chaque admission.
//!
//! Les éléments de la playlist affichée (ensemble `live`) et ceux que l'appelant
//! réserve pour la playlist en construction ne sont jamais candidats à
//! l'éviction.

use crate::error::{CacheError, Result};
use crate::ledger::{CacheEntry, Ledger};
use bytes::Bytes;
use chrono::Utc;
use phosource::{FetchError, PhotoSource, RemoteItem};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Nom du registre dans le répertoire du cache
pub const LEDGER_FILE: &str = "ledger.db";

/// Suffixe des fichiers en cours d'écriture
const PART_SUFFIX: &str = ".part";

/// Longueur maximale d'un identifiant utilisé tel quel comme clé
const MAX_PLAIN_KEY_LEN: usize = 128;

/// Préfixe des clés dérivées d'une empreinte
const HASHED_KEY_PREFIX: &str = "sha1-";

/// Clé de fichier pour un identifiant distant
///
/// Les identifiants sûrs (`[A-Za-z0-9_-]`) sont utilisés tels quels, ce qui
/// permet de retrouver l'élément à partir du nom de fichier lors d'une
/// reconstruction ; les autres sont remplacés par leur empreinte SHA-1.
pub fn cache_key(item_id: &str) -> String {
    let plain = !item_id.is_empty()
        && item_id.len() <= MAX_PLAIN_KEY_LEN
        && item_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        item_id.to_string()
    } else {
        let digest = Sha1::digest(item_id.as_bytes());
        format!("{}{}", HASHED_KEY_PREFIX, hex::encode(digest))
    }
}

fn valid_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Résultat d'une admission ou d'un `ensure`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Chemin local du contenu
    pub path: PathBuf,
    /// Identifiants évincés pour faire de la place
    pub evicted: Vec<String>,
    /// Le contenu vient d'être téléchargé
    pub fetched: bool,
}

/// Occupation du cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
    pub used: u64,
    pub capacity: u64,
    pub entries: usize,
}

/// Ancien fichier d'un élément remplacé, conservé tant qu'il est affiché
#[derive(Debug)]
struct Retired {
    item_id: String,
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    /// Entrées indexées par identifiant distant
    entries: HashMap<String, CacheEntry>,
    /// Fichiers remplacés encore référencés par la playlist affichée,
    /// comptés dans `used` jusqu'à leur suppression
    retired: Vec<Retired>,
    used: u64,
    clock: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Cache de médias
#[derive(Debug)]
pub struct MediaCache {
    dir: PathBuf,
    capacity: u64,
    fetch_timeout: Duration,
    ledger: Ledger,
    state: Mutex<CacheState>,
    live: RwLock<HashSet<String>>,
}

impl MediaCache {
    /// Ouvre le cache et réconcilie le registre avec le contenu du répertoire
    ///
    /// - les fichiers `.part` (écritures interrompues) sont supprimés
    /// - les entrées dont le fichier manque ou n'a pas la bonne taille sont oubliées
    /// - les fichiers inconnus du registre sont supprimés
    /// - un registre illisible est supprimé et reconstruit à partir des fichiers
    pub async fn open(dir: impl AsRef<Path>, capacity: u64, fetch_timeout: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let ledger_path = dir.join(LEDGER_FILE);
        let (ledger, loaded, rebuilt) = match Ledger::open(&ledger_path).and_then(|l| {
            let entries = l.load_all()?;
            Ok((l, entries))
        }) {
            Ok((ledger, entries)) => (ledger, entries, false),
            Err(e) => {
                warn!(ledger = %ledger_path.display(), "Cache ledger unreadable, rebuilding: {}", e);
                remove_ledger_files(&dir).await?;
                (Ledger::open(&ledger_path)?, Vec::new(), true)
            }
        };

        let files = scan_files(&dir).await?;
        let mut state = CacheState::default();

        if rebuilt {
            for (file_name, size) in files {
                let Some((key, ext)) = file_name.rsplit_once('.') else {
                    remove_quietly(&dir.join(&file_name)).await;
                    continue;
                };
                // Une empreinte ne permet pas de retrouver l'identifiant d'origine
                if !valid_extension(ext) || key.starts_with(HASHED_KEY_PREFIX) {
                    remove_quietly(&dir.join(&file_name)).await;
                    continue;
                }
                let entry = CacheEntry {
                    key: key.to_string(),
                    item_id: key.to_string(),
                    extension: ext.to_string(),
                    size,
                    version: None,
                    access_seq: state.next_seq(),
                    last_used: None,
                };
                ledger.upsert(&entry)?;
                state.used += size;
                state.entries.insert(entry.item_id.clone(), entry);
            }
            info!(entries = state.entries.len(), used = state.used, "Cache ledger rebuilt from directory");
        } else {
            let mut known = HashSet::new();
            for entry in loaded {
                let file_name = entry.file_name();
                match files.get(&file_name) {
                    Some(&size) if size == entry.size => {
                        known.insert(file_name);
                        state.clock = state.clock.max(entry.access_seq);
                        state.used += entry.size;
                        state.entries.insert(entry.item_id.clone(), entry);
                    }
                    _ => {
                        warn!(item_id = %entry.item_id, "Cached file missing or truncated, dropping entry");
                        ledger.remove(&entry.key)?;
                    }
                }
            }
            for file_name in files.keys().filter(|f| !known.contains(*f)) {
                debug!(file = %file_name, "Removing orphan cache file");
                remove_quietly(&dir.join(file_name)).await;
            }
        }

        let cache = Self {
            dir,
            capacity,
            fetch_timeout,
            ledger,
            state: Mutex::new(state),
            live: RwLock::new(HashSet::new()),
        };

        // La capacité a pu être réduite depuis le dernier démarrage
        cache.shrink_to_capacity().await?;

        let usage = cache.usage().await;
        info!(
            dir = %cache.dir.display(),
            used = usage.used,
            capacity = usage.capacity,
            entries = usage.entries,
            "Media cache opened"
        );
        Ok(cache)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    fn live(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        self.live.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Déclare les éléments référencés par la playlist affichée
    ///
    /// Ces éléments ne sont jamais évincés tant qu'ils restent référencés.
    pub fn set_live<I>(&self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let ids: HashSet<String> = ids.into_iter().collect();
        *self.live.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = ids;
    }

    pub fn is_live(&self, item_id: &str) -> bool {
        self.live().contains(item_id)
    }

    fn path_of(&self, entry: &CacheEntry) -> PathBuf {
        self.dir.join(entry.file_name())
    }

    /// Entrée du cache pour un identifiant
    pub async fn lookup(&self, item_id: &str) -> Option<CacheEntry> {
        self.state.lock().await.entries.get(item_id).cloned()
    }

    /// Chemin local d'un élément présent dans le cache
    pub async fn path(&self, item_id: &str) -> Option<PathBuf> {
        self.lookup(item_id).await.map(|e| self.path_of(&e))
    }

    /// Marque un élément comme accédé (politique LRU)
    pub async fn touch(&self, item_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq();
        let Some(entry) = state.entries.get_mut(item_id) else {
            return Ok(false);
        };
        let now = Utc::now().to_rfc3339();
        entry.access_seq = seq;
        entry.last_used = Some(now.clone());
        self.ledger.touch(&entry.key, seq, &now)?;
        Ok(true)
    }

    /// Retourne un chemin local pour l'élément, en le téléchargeant si absent
    ///
    /// Le téléchargement est borné par le délai configuré ; un échec est
    /// remonté en [`CacheError::Fetch`] sans nouvelle tentative.
    pub async fn ensure(
        &self,
        item: &RemoteItem,
        source: &dyn PhotoSource,
        reserved: &HashSet<String>,
    ) -> Result<Admission> {
        if let Some(entry) = self.lookup(&item.id).await {
            self.touch(&item.id).await?;
            return Ok(Admission {
                path: self.path_of(&entry),
                evicted: Vec::new(),
                fetched: false,
            });
        }
        self.fetch_and_admit(item, source, reserved).await
    }

    /// Télécharge l'élément et remplace son contenu dans le cache
    pub async fn fetch_and_admit(
        &self,
        item: &RemoteItem,
        source: &dyn PhotoSource,
        reserved: &HashSet<String>,
    ) -> Result<Admission> {
        debug!(item_id = %item.id, source = source.name(), "Fetching media");
        let bytes = match tokio::time::timeout(self.fetch_timeout, source.fetch(item)).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(self.fetch_timeout).into()),
        };
        let mut admission = self.admit(item, bytes, reserved).await?;
        admission.fetched = true;
        Ok(admission)
    }

    /// Insère un contenu dans le cache
    ///
    /// Si la capacité serait dépassée, les entrées les moins récemment
    /// utilisées, hors playlist courante et hors `reserved`, sont évincées.
    /// Si cela ne suffit pas, rien n'est modifié et l'admission échoue avec
    /// [`CacheError::QuotaExceeded`].
    pub async fn admit(
        &self,
        item: &RemoteItem,
        bytes: Bytes,
        reserved: &HashSet<String>,
    ) -> Result<Admission> {
        let extension = item.extension();
        if !valid_extension(extension) {
            return Err(CacheError::InvalidKey(format!("{}.{}", item.id, extension)));
        }
        let key = cache_key(&item.id);
        let size = bytes.len() as u64;

        let mut state = self.state.lock().await;
        self.purge_retired(&mut state).await;

        // Entrée remplacée : même identifiant, ou à défaut même clé de fichier
        let previous = state.entries.get(&item.id).cloned().or_else(|| {
            state.entries.values().find(|e| e.key == key).cloned()
        });
        // Un ancien fichier encore affiché reste compté jusqu'à sa libération
        let defer_previous = previous.as_ref().is_some_and(|prev| {
            prev.extension != extension && self.is_live(&prev.item_id)
        });
        let freed = match &previous {
            Some(prev) if !defer_previous => prev.size,
            _ => 0,
        };
        let needed = state.used - freed + size;

        let quota_error = |used: u64| CacheError::QuotaExceeded {
            item_id: item.id.clone(),
            requested: size,
            used,
            capacity: self.capacity,
        };

        if size > self.capacity {
            return Err(quota_error(state.used));
        }

        // Choix des victimes avant toute modification
        let mut victims = Vec::new();
        if needed > self.capacity {
            let live = self.live();
            let mut candidates: Vec<&CacheEntry> = state
                .entries
                .values()
                .filter(|e| {
                    e.item_id != item.id
                        && e.key != key
                        && !live.contains(&e.item_id)
                        && !reserved.contains(&e.item_id)
                })
                .collect();
            candidates.sort_by(|a, b| a.access_seq.cmp(&b.access_seq).then(a.key.cmp(&b.key)));

            let mut projected = needed;
            for candidate in candidates {
                if projected <= self.capacity {
                    break;
                }
                projected -= candidate.size;
                victims.push(candidate.item_id.clone());
            }
            if projected > self.capacity {
                debug!(item_id = %item.id, size, "Admission refused, remaining entries are in use");
                return Err(quota_error(state.used));
            }
        }

        for victim in &victims {
            if let Some(entry) = state.entries.remove(victim) {
                self.ledger.remove(&entry.key)?;
                remove_quietly(&self.path_of(&entry)).await;
                state.used -= entry.size;
                info!(item_id = %entry.item_id, size = entry.size, "Evicted from cache");
            }
        }

        let file_name = format!("{}.{}", key, extension);
        let final_path = self.dir.join(&file_name);
        let part_path = self.dir.join(format!("{}{}", file_name, PART_SUFFIX));
        tokio::fs::write(&part_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            remove_quietly(&part_path).await;
            return Err(e.into());
        }

        // Le fichier écrasé n'est plus un fichier retiré
        let mut overwritten = 0;
        state.retired.retain(|r| {
            if r.path == final_path {
                overwritten += r.size;
                false
            } else {
                true
            }
        });
        state.used -= overwritten;

        if let Some(prev) = &previous {
            if prev.item_id != item.id {
                state.entries.remove(&prev.item_id);
            }
            if prev.key != key {
                self.ledger.remove(&prev.key)?;
            }
            if prev.extension != extension {
                let old_path = self.path_of(prev);
                if defer_previous {
                    debug!(item_id = %prev.item_id, "Previous file still displayed, deferring removal");
                    state.retired.push(Retired {
                        item_id: prev.item_id.clone(),
                        path: old_path,
                        size: prev.size,
                    });
                } else {
                    remove_quietly(&old_path).await;
                }
            }
        }

        let entry = CacheEntry {
            key,
            item_id: item.id.clone(),
            extension: extension.to_string(),
            size,
            version: Some(item.version.clone()),
            access_seq: state.next_seq(),
            last_used: Some(Utc::now().to_rfc3339()),
        };
        self.ledger.upsert(&entry)?;
        state.used = state.used - freed + size;
        state.entries.insert(item.id.clone(), entry);

        debug!(item_id = %item.id, size, used = state.used, capacity = self.capacity, "Admitted into cache");
        Ok(Admission {
            path: final_path,
            evicted: victims,
            fetched: false,
        })
    }

    /// Supprime les fichiers remplacés qui ne sont plus affichés
    pub async fn release_retired(&self) {
        let mut state = self.state.lock().await;
        self.purge_retired(&mut state).await;
    }

    async fn purge_retired(&self, state: &mut CacheState) {
        if state.retired.is_empty() {
            return;
        }
        let live = self.live().clone();
        let (kept, released): (Vec<Retired>, Vec<Retired>) = std::mem::take(&mut state.retired)
            .into_iter()
            .partition(|r| live.contains(&r.item_id));
        state.retired = kept;
        for retired in released {
            remove_quietly(&retired.path).await;
            state.used -= retired.size;
            debug!(item_id = %retired.item_id, size = retired.size, "Released replaced file");
        }
    }

    /// Supprime un élément du cache
    ///
    /// Refuse (retourne `false`) pour un élément de la playlist courante.
    pub async fn remove(&self, item_id: &str) -> Result<bool> {
        if self.is_live(item_id) {
            warn!(item_id = %item_id, "Refusing to remove an item of the live playlist");
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.remove(item_id) else {
            return Ok(false);
        };
        self.ledger.remove(&entry.key)?;
        remove_quietly(&self.path_of(&entry)).await;
        state.used -= entry.size;
        Ok(true)
    }

    /// Évince les entrées LRU non référencées jusqu'à revenir sous la capacité
    async fn shrink_to_capacity(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        self.purge_retired(&mut state).await;
        if state.used <= self.capacity {
            return Ok(Vec::new());
        }
        let live = self.live().clone();
        let mut candidates: Vec<CacheEntry> = state
            .entries
            .values()
            .filter(|e| !live.contains(&e.item_id))
            .cloned()
            .collect();
        candidates.sort_by_key(|e| e.access_seq);

        let mut evicted = Vec::new();
        for entry in candidates {
            if state.used <= self.capacity {
                break;
            }
            state.entries.remove(&entry.item_id);
            self.ledger.remove(&entry.key)?;
            remove_quietly(&self.path_of(&entry)).await;
            state.used -= entry.size;
            evicted.push(entry.item_id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), used = state.used, "Cache shrunk to capacity");
        }
        Ok(evicted)
    }

    /// Occupation courante
    pub async fn usage(&self) -> CacheUsage {
        let state = self.state.lock().await;
        CacheUsage {
            used: state.used,
            capacity: self.capacity,
            entries: state.entries.len(),
        }
    }

    /// Toutes les entrées, de la moins à la plus récemment utilisée
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.lock().await;
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.access_seq);
        entries
    }

    /// Nombre d'entrées du registre persistant
    pub fn ledger_count(&self) -> Result<usize> {
        Ok(self.ledger.count()?)
    }
}

/// Liste les fichiers de contenu du répertoire (hors registre), en supprimant
/// les écritures interrompues
async fn scan_files(dir: &Path) -> Result<HashMap<String, u64>> {
    let mut files = HashMap::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(LEDGER_FILE) {
            continue;
        }
        if name.ends_with(PART_SUFFIX) {
            debug!(file = %name, "Removing interrupted download");
            remove_quietly(&entry.path()).await;
            continue;
        }
        files.insert(name, metadata.len());
    }
    Ok(files)
}

async fn remove_ledger_files(dir: &Path) -> Result<()> {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let path = dir.join(format!("{}{}", LEDGER_FILE, suffix));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove cache file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ids_are_kept() {
        assert_eq!(cache_key("AF1QipN-x_9"), "AF1QipN-x_9");
    }

    #[test]
    fn unsafe_ids_are_hashed() {
        let key = cache_key("../etc/passwd");
        assert!(key.starts_with("sha1-"));
        assert_eq!(key.len(), 5 + 40);
        assert_eq!(key, cache_key("../etc/passwd"));
        assert!(cache_key("IMG 1.jpg").starts_with("sha1-"));
    }

    #[test]
    fn extensions_are_validated() {
        assert!(valid_extension("jpg"));
        assert!(!valid_extension(""));
        assert!(!valid_extension("j/g"));
        assert!(!valid_extension("verylongext"));
    }
}
