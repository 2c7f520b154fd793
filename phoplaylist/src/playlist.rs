//! Instantanés immuables de la playlist
//!
//! Une [`Playlist`] n'est jamais modifiée après publication : chaque
//! rafraîchissement ou mise à jour en construit une nouvelle et le magasin
//! remplace l'`Arc` partagé. Les lecteurs gardent leur instantané aussi
//! longtemps qu'ils en ont besoin.

use chrono::{DateTime, Utc};
use phosource::MediaKind;
use serde::Serialize;
use std::path::PathBuf;

/// Un élément affichable d'un instantané
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub kind: MediaKind,
    /// Fichier local à afficher
    pub path: PathBuf,
    pub version: Option<String>,
    /// Choisi dans la fenêtre de fraîcheur (faux pour un repli périmé)
    pub fresh: bool,
}

/// La playlist contient moins d'éléments frais que la taille minimale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DegradedFill {
    /// Éléments frais retenus
    pub fresh: usize,
    /// Éléments retenus, repli périmé compris
    pub total: usize,
    pub min_size: usize,
}

#[derive(Serialize)]
struct Canonical<'a> {
    entries: &'a [PlaylistEntry],
    degraded: &'a Option<DegradedFill>,
}

/// Sélection ordonnée et immuable d'éléments à afficher
#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    degraded: Option<DegradedFill>,
    generation: u64,
    published_at: DateTime<Utc>,
}

impl Playlist {
    pub fn new(entries: Vec<PlaylistEntry>, degraded: Option<DegradedFill>, generation: u64) -> Self {
        Self {
            entries,
            degraded,
            generation,
            published_at: Utc::now(),
        }
    }

    /// Instantané publié avant toute synchronisation
    pub fn empty() -> Self {
        Self::new(Vec::new(), None, 0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    pub fn degraded(&self) -> Option<DegradedFill> {
        self.degraded
    }

    /// Augmente de un à chaque publication
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Sérialisation canonique du contenu
    ///
    /// La génération et la date de publication en sont exclues : deux
    /// instantanés calculés à partir des mêmes données donnent les mêmes octets.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&Canonical {
            entries: &self.entries,
            degraded: &self.degraded,
        })
        .unwrap_or_default()
    }

    pub fn same_content(&self, entries: &[PlaylistEntry], degraded: &Option<DegradedFill>) -> bool {
        self.entries == entries && &self.degraded == degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> PlaylistEntry {
        PlaylistEntry {
            id: id.to_string(),
            kind: MediaKind::Photo,
            path: PathBuf::from(format!("/media/{}.jpg", id)),
            version: Some("v1".to_string()),
            fresh: true,
        }
    }

    #[test]
    fn bytes_ignore_generation() {
        let a = Playlist::new(vec![entry("a"), entry("b")], None, 1);
        let b = Playlist::new(vec![entry("a"), entry("b")], None, 7);
        assert_eq!(a.to_bytes(), b.to_bytes());

        let c = Playlist::new(vec![entry("b"), entry("a")], None, 1);
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn position_by_id() {
        let playlist = Playlist::new(vec![entry("a"), entry("b")], None, 1);
        assert_eq!(playlist.position("b"), Some(1));
        assert_eq!(playlist.position("z"), None);
        assert!(Playlist::empty().is_empty());
    }
}
