//! Politique de sélection de la playlist
//!
//! La sélection est déterministe : à catalogue identique, le même classement
//! et donc la même playlist sont produits.

use crate::error::{Error, Result};
use crate::item::{Freshness, MediaItem};
use crate::playlist::{DegradedFill, PlaylistEntry};
use serde::Serialize;
use std::cmp::Ordering;

/// Taille minimale par défaut
pub const DEFAULT_MIN_SIZE: usize = 30;
/// Taille maximale par défaut
pub const DEFAULT_MAX_SIZE: usize = 100;
/// Fenêtre de fraîcheur par défaut : 14 jours
pub const DEFAULT_FRESH_RETENTION_SECS: u64 = 14 * 24 * 3600;

/// Bornes de la playlist et fenêtre de fraîcheur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaylistPolicy {
    pub min_size: usize,
    pub max_size: usize,
    pub fresh_retention_secs: u64,
}

impl Default for PlaylistPolicy {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            fresh_retention_secs: DEFAULT_FRESH_RETENTION_SECS,
        }
    }
}

impl PlaylistPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::InvalidPolicy("max_size must be at least 1".to_string()));
        }
        if self.min_size > self.max_size {
            return Err(Error::InvalidPolicy(format!(
                "min_size ({}) is greater than max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Candidats classés, par identifiant
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RankedCandidates {
    /// Éléments frais, du plus récent au plus ancien
    pub fresh: Vec<String>,
    /// Éléments périmés : en cache d'abord, puis du plus récent au plus ancien
    pub stale: Vec<String>,
}

fn newest_first(a: &MediaItem, b: &MediaItem) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
}

/// Classe les éléments éligibles
///
/// Les éléments doivent avoir été classés (`MediaItem::classify`) au préalable.
pub fn rank_candidates<'a, I>(items: I) -> RankedCandidates
where
    I: IntoIterator<Item = &'a MediaItem>,
{
    let mut fresh = Vec::new();
    let mut stale = Vec::new();
    for item in items.into_iter().filter(|i| i.is_eligible()) {
        match item.freshness {
            Freshness::Fresh => fresh.push(item),
            Freshness::Stale => stale.push(item),
            Freshness::Evicted => {}
        }
    }

    fresh.sort_by(|a, b| newest_first(a, b));
    stale.sort_by(|a, b| {
        b.is_cached()
            .cmp(&a.is_cached())
            .then_with(|| newest_first(a, b))
    });

    RankedCandidates {
        fresh: fresh.into_iter().map(|i| i.id.clone()).collect(),
        stale: stale.into_iter().map(|i| i.id.clone()).collect(),
    }
}

/// Accumulateur d'une playlist en construction
#[derive(Debug)]
pub struct Selection {
    policy: PlaylistPolicy,
    entries: Vec<PlaylistEntry>,
    fresh: usize,
}

impl Selection {
    pub fn new(policy: PlaylistPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            fresh: 0,
        }
    }

    /// Encore de la place pour un élément frais
    pub fn wants_fresh(&self) -> bool {
        self.entries.len() < self.policy.max_size
    }

    /// Les éléments périmés ne servent qu'à atteindre la taille minimale
    pub fn wants_stale(&self) -> bool {
        self.entries.len() < self.policy.min_size && self.entries.len() < self.policy.max_size
    }

    pub fn push(&mut self, entry: PlaylistEntry) {
        if entry.fresh {
            self.fresh += 1;
        }
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Termine la sélection ; signale un remplissage dégradé si les éléments
    /// frais ne suffisent pas à atteindre la taille minimale
    pub fn finish(self) -> (Vec<PlaylistEntry>, Option<DegradedFill>) {
        let degraded = (self.fresh < self.policy.min_size).then(|| DegradedFill {
            fresh: self.fresh,
            total: self.entries.len(),
            min_size: self.policy.min_size,
        });
        (self.entries, degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use phosource::MediaKind;
    use std::path::PathBuf;

    fn item(id: &str, hours_old: i64, freshness: Freshness, cached: bool) -> MediaItem {
        let now = Utc::now();
        MediaItem {
            id: id.to_string(),
            kind: MediaKind::Photo,
            mime_type: "image/jpeg".to_string(),
            created_at: now - Duration::hours(hours_old),
            version: "v1".to_string(),
            cached_version: cached.then(|| "v1".to_string()),
            local_path: cached.then(|| PathBuf::from(format!("/media/{}.jpg", id))),
            size: cached.then_some(10),
            last_seen: now,
            missed_refreshes: 0,
            freshness,
            filename: None,
        }
    }

    fn entry(id: &str, fresh: bool) -> PlaylistEntry {
        PlaylistEntry {
            id: id.to_string(),
            kind: MediaKind::Photo,
            path: PathBuf::from(id),
            version: None,
            fresh,
        }
    }

    #[test]
    fn policy_bounds_are_checked() {
        assert!(PlaylistPolicy::default().validate().is_ok());
        let policy = PlaylistPolicy {
            min_size: 5,
            max_size: 2,
            ..Default::default()
        };
        assert!(matches!(policy.validate(), Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn fresh_items_are_newest_first_with_id_tie_break() {
        let items = vec![
            item("b", 5, Freshness::Fresh, false),
            item("c", 1, Freshness::Fresh, false),
            item("a", 5, Freshness::Fresh, false),
        ];
        let mut same_time = items.clone();
        same_time[2].created_at = same_time[0].created_at;

        let ranked = rank_candidates(&same_time);
        assert_eq!(ranked.fresh, vec!["c", "a", "b"]);
    }

    #[test]
    fn stale_items_prefer_cached_content() {
        let mut missed = item("gone", 400, Freshness::Stale, true);
        missed.missed_refreshes = 1;
        let items = vec![
            item("old-remote", 400, Freshness::Stale, false),
            item("older-cached", 500, Freshness::Stale, true),
            item("evicted", 1, Freshness::Evicted, false),
            missed,
        ];

        let ranked = rank_candidates(&items);
        assert!(ranked.fresh.is_empty());
        assert_eq!(ranked.stale, vec!["older-cached", "old-remote"]);
    }

    #[test]
    fn degraded_fill_is_reported_below_min_size() {
        let policy = PlaylistPolicy {
            min_size: 3,
            max_size: 5,
            ..Default::default()
        };
        let mut selection = Selection::new(policy);
        selection.push(entry("a", true));
        assert!(selection.wants_stale());
        selection.push(entry("b", false));
        selection.push(entry("c", false));
        assert!(!selection.wants_stale());
        assert!(selection.wants_fresh());

        let (entries, degraded) = selection.finish();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            degraded,
            Some(DegradedFill {
                fresh: 1,
                total: 3,
                min_size: 3
            })
        );
    }

    #[test]
    fn full_fresh_selection_is_not_degraded() {
        let policy = PlaylistPolicy {
            min_size: 1,
            max_size: 2,
            ..Default::default()
        };
        let mut selection = Selection::new(policy);
        selection.push(entry("a", true));
        selection.push(entry("b", true));
        assert!(!selection.wants_fresh());
        assert_eq!(selection.finish().1, None);
    }
}
