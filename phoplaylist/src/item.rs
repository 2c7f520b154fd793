//! Enregistrement canonique d'un élément de l'album

use chrono::{DateTime, Duration, Utc};
use phosource::{MediaKind, RemoteItem};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Rétention maximale acceptée, garde le calcul des dates dans les bornes
const MAX_RETENTION_SECS: u64 = 100 * 365 * 24 * 3600;

/// Classement de fraîcheur d'un [`MediaItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Créé dans la fenêtre de rétention, éligible en priorité
    Fresh,
    /// Plus ancien que la fenêtre, sert seulement à atteindre la taille minimale
    Stale,
    /// Contenu supprimé (pression sur la capacité ou disparu de l'album)
    Evicted,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Evicted => "evicted",
        }
    }
}

impl FromStr for Freshness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" => Ok(Freshness::Fresh),
            "stale" => Ok(Freshness::Stale),
            "evicted" => Ok(Freshness::Evicted),
            other => Err(format!("unknown freshness: {}", other)),
        }
    }
}

/// Début de la fenêtre de fraîcheur
pub fn fresh_cutoff(now: DateTime<Utc>, retention_secs: u64) -> DateTime<Utc> {
    now - Duration::seconds(retention_secs.min(MAX_RETENTION_SECS) as i64)
}

/// Un élément de l'album, détenu par le magasin de playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Identifiant distant stable
    pub id: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    /// Dernière version du contenu annoncée par la source
    pub version: String,
    /// Version du contenu présent dans le cache, s'il y en a un
    pub cached_version: Option<String>,
    pub local_path: Option<PathBuf>,
    pub size: Option<u64>,
    /// Dernier listing contenant l'élément
    pub last_seen: DateTime<Utc>,
    /// Rafraîchissements consécutifs sans l'élément
    pub missed_refreshes: u32,
    pub freshness: Freshness,
    pub filename: Option<String>,
}

impl MediaItem {
    /// Enregistrement d'un élément découvert par un rafraîchissement
    pub fn from_remote(remote: &RemoteItem, now: DateTime<Utc>) -> Self {
        Self {
            id: remote.id.clone(),
            kind: remote.kind,
            mime_type: remote.mime_type.clone(),
            created_at: remote.created_at,
            version: remote.version.clone(),
            cached_version: None,
            local_path: None,
            size: None,
            last_seen: now,
            missed_refreshes: 0,
            freshness: Freshness::Fresh,
            filename: remote.filename.clone(),
        }
    }

    /// Applique les métadonnées d'un listing plus récent
    pub fn observe(&mut self, remote: &RemoteItem, now: DateTime<Utc>) {
        self.kind = remote.kind;
        self.mime_type = remote.mime_type.clone();
        self.created_at = remote.created_at;
        self.version = remote.version.clone();
        self.filename = remote.filename.clone();
        self.last_seen = now;
        self.missed_refreshes = 0;
    }

    /// Reconstruit une requête pour la source, sans adresse de téléchargement
    pub fn to_remote(&self) -> RemoteItem {
        RemoteItem {
            id: self.id.clone(),
            kind: self.kind,
            mime_type: self.mime_type.clone(),
            created_at: self.created_at,
            version: self.version.clone(),
            filename: self.filename.clone(),
            download_url: None,
        }
    }

    pub fn is_within(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at >= cutoff
    }

    /// Reclasse l'élément selon son âge ; un élément évincé garde son état
    pub fn classify(&mut self, cutoff: DateTime<Utc>) {
        if self.freshness == Freshness::Evicted {
            return;
        }
        self.freshness = if self.is_within(cutoff) {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
    }

    /// Présent dans le dernier listing et non évincé
    pub fn is_eligible(&self) -> bool {
        self.missed_refreshes == 0 && self.freshness != Freshness::Evicted
    }

    pub fn is_cached(&self) -> bool {
        self.local_path.is_some()
    }

    /// Le contenu en cache est plus ancien que le contenu distant
    pub fn is_outdated(&self) -> bool {
        self.is_cached() && self.cached_version.as_deref() != Some(self.version.as_str())
    }

    pub fn clear_local(&mut self) {
        self.local_path = None;
        self.cached_version = None;
        self.size = None;
    }
}
