//! # phosource
//!
//! Remote album sources for the Phoseum slideshow.
//!
//! A source exposes two operations: listing the album (cheap, metadata only)
//! and downloading the content of one item. Everything else (caching,
//! selection, retries) lives in `phocache` and `phoplaylist`.
//!
//! Two implementations are provided:
//!
//! - [`GooglePhotosSource`]: a Google Photos album read through the Library API
//! - [`DirectorySource`]: a local directory acting as an album

pub mod directory;
pub mod error;
pub mod google;

#[cfg(feature = "phoconfig")]
pub mod config_ext;

pub use directory::DirectorySource;
pub use error::{FetchError, Result};
pub use google::{GooglePhotosSource, SourceBuilder, StaticToken, TokenProvider};

#[cfg(feature = "phoconfig")]
pub use config_ext::SourceConfigExt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;

/// Kind of media, drives how the display presents the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "photo" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            other => Err(FetchError::InvalidData(format!("unknown media kind: {}", other))),
        }
    }
}

/// One item as currently listed by the remote album
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Stable remote identifier
    pub id: String,
    pub kind: MediaKind,
    pub mime_type: String,
    /// Creation time of the media (not of the upload)
    pub created_at: DateTime<Utc>,
    /// Opaque content version, changes whenever the content changes
    pub version: String,
    pub filename: Option<String>,
    /// Short-lived download location, when the listing provides one
    #[serde(skip)]
    pub download_url: Option<String>,
}

impl RemoteItem {
    /// File extension used for the cached copy
    pub fn extension(&self) -> &'static str {
        media_info(&self.mime_type)
            .map(|(_, ext)| ext)
            .unwrap_or("bin")
    }
}

/// A remote album
///
/// Implementations must be cheap to share (`Arc<dyn PhotoSource>`) and must
/// not retry internally: failures surface as [`FetchError`].
#[async_trait::async_trait]
pub trait PhotoSource: Debug + Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Lists every displayable item of the album
    async fn list_items(&self) -> Result<Vec<RemoteItem>>;

    /// Downloads the content of one item
    async fn fetch(&self, item: &RemoteItem) -> Result<Bytes>;
}

/// Media kind and file extension for a MIME type
///
/// Returns `None` for types the display cannot show; such items are skipped
/// by the sources.
pub fn media_info(mime_type: &str) -> Option<(MediaKind, &'static str)> {
    let mime = mime_type.trim().to_ascii_lowercase();
    let info = match mime.as_str() {
        "image/jpeg" | "image/jpg" => (MediaKind::Photo, "jpg"),
        "image/png" => (MediaKind::Photo, "png"),
        "image/apng" => (MediaKind::Photo, "apng"),
        "image/gif" => (MediaKind::Photo, "gif"),
        "image/bmp" => (MediaKind::Photo, "bmp"),
        "image/webp" => (MediaKind::Photo, "webp"),
        "image/svg+xml" => (MediaKind::Photo, "svg"),
        "image/heif" => (MediaKind::Photo, "heif"),
        "image/heic" => (MediaKind::Photo, "heic"),
        "image/tiff" => (MediaKind::Photo, "tiff"),
        "video/mp4" => (MediaKind::Video, "mp4"),
        "video/webm" => (MediaKind::Video, "webm"),
        "video/ogg" => (MediaKind::Video, "ogg"),
        "video/quicktime" => (MediaKind::Video, "mov"),
        "video/x-msvideo" => (MediaKind::Video, "avi"),
        "video/x-matroska" => (MediaKind::Video, "mkv"),
        "video/3gpp" => (MediaKind::Video, "3gp"),
        "video/mpeg" => (MediaKind::Video, "mpg"),
        "video/x-ms-wmv" => (MediaKind::Video, "wmv"),
        "video/x-m4v" => (MediaKind::Video, "m4v"),
        _ => return None,
    };
    Some(info)
}

/// MIME type for a file extension, reverse of [`media_info`]
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "apng" => "image/apng",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "heif" => "image/heif",
        "heic" => "image/heic",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" | "ogv" => "video/ogg",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "3gp" => "video/3gpp",
        "mpg" | "mpeg" => "video/mpeg",
        "wmv" => "video/x-ms-wmv",
        "m4v" => "video/x-m4v",
        _ => return None,
    };
    Some(mime)
}
