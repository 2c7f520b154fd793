//! Google Photos album source
//!
//! Reads one album through the Photos Library API (`mediaItems:search`) and
//! downloads content from the short-lived `baseUrl` of each item. OAuth token
//! acquisition is handled outside of the daemon: a [`TokenProvider`] only
//! hands out the current access token.

use crate::error::{FetchError, Result};
use crate::{media_info, MediaKind, PhotoSource, RemoteItem};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default Photos Library API base URL
pub const DEFAULT_API_BASE: &str = "https://photoslibrary.googleapis.com";

/// Page size used when listing the album (API maximum)
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default timeout for metadata requests
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "phoseum/0.1.0";

/// Photos are downloaded scaled to fit the display
pub const DEFAULT_PHOTO_WIDTH: u32 = 1920;
pub const DEFAULT_PHOTO_HEIGHT: u32 = 1080;

const PATH_MEDIA_ITEMS: &str = "v1/mediaItems";
const PATH_MEDIA_ITEMS_SEARCH: &str = "v1/mediaItems:search";

/// Supplies OAuth access tokens
#[async_trait::async_trait]
pub trait TokenProvider: fmt::Debug + Send + Sync {
    /// Returns a currently valid access token
    async fn access_token(&self) -> Result<String>;

    /// Called when the API refused the token
    fn invalidate(&self) {}
}

/// A fixed access token, provisioned by the installer
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.0.trim().is_empty() {
            return Err(FetchError::Unauthorized(StatusCode::UNAUTHORIZED.as_u16()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    album_id: &'a str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    media_items: Vec<ApiMediaItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiMediaItem {
    id: Option<String>,
    base_url: Option<String>,
    mime_type: Option<String>,
    media_metadata: Option<ApiMediaMetadata>,
    filename: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiMediaMetadata {
    creation_time: Option<String>,
    width: Option<String>,
    height: Option<String>,
    video: Option<ApiVideoMetadata>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiVideoMetadata {
    status: Option<String>,
}

/// Google Photos album source
///
/// # Example
///
/// ```no_run
/// use phosource::{GooglePhotosSource, StaticToken, PhotoSource};
/// use std::sync::Arc;
///
/// # async fn run() -> phosource::Result<()> {
/// let source = GooglePhotosSource::builder("ALBUM_ID", Arc::new(StaticToken::new("ya29...")))
///     .page_size(50)
///     .build()?;
/// let items = source.list_items().await?;
/// println!("{} items", items.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GooglePhotosSource {
    client: Client,
    api_base: String,
    album_id: String,
    tokens: Arc<dyn TokenProvider>,
    page_size: u32,
    request_timeout: Duration,
    photo_width: u32,
    photo_height: u32,
}

impl GooglePhotosSource {
    /// Create a builder for the given album
    pub fn builder(album_id: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> SourceBuilder {
        SourceBuilder::new(album_id, tokens)
    }

    pub fn album_id(&self) -> &str {
        &self.album_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn search_page(&self, page_token: Option<&str>) -> Result<SearchResponse> {
        let token = self.tokens.access_token().await?;
        let request = SearchRequest {
            album_id: &self.album_id,
            page_size: self.page_size,
            page_token,
        };

        let resp = self
            .client
            .post(self.url(PATH_MEDIA_ITEMS_SEARCH))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, self.request_timeout))?;

        let resp = self.check_status(resp).await?;
        let body = resp.bytes().await.map_err(|e| send_error(e, self.request_timeout))?;
        // The API answers `{}` for an empty album
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetches a fresh `baseUrl` when the listing did not provide one
    async fn resolve_base_url(&self, id: &str) -> Result<String> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .client
            .get(self.url(&format!("{}/{}", PATH_MEDIA_ITEMS, id)))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| send_error(e, self.request_timeout))?;
        let resp = self.check_status(resp).await?;
        let item: ApiMediaItem = resp
            .json()
            .await
            .map_err(|e| FetchError::InvalidData(e.to_string()))?;
        item.base_url
            .ok_or_else(|| FetchError::InvalidData(format!("no baseUrl for item {}", id)))
    }

    async fn check_status(&self, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_else(|_| "N/A".to_string());
        debug!(status = %status, "Google Photos request failed: {}", message);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.tokens.invalidate();
                FetchError::Unauthorized(status.as_u16())
            }
            StatusCode::NOT_FOUND => FetchError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => FetchError::Status {
                status: status.as_u16(),
                message,
            },
            s if s.is_server_error() => FetchError::Status {
                status: s.as_u16(),
                message,
            },
            s => FetchError::InvalidData(format!("bad status code {}: {}", s, message)),
        })
    }
}

#[async_trait::async_trait]
impl PhotoSource for GooglePhotosSource {
    fn name(&self) -> &str {
        "googlephotos"
    }

    async fn list_items(&self) -> Result<Vec<RemoteItem>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.search_page(page_token.as_deref()).await?;
            for raw in page.media_items {
                if let Some(item) = convert_item(raw) {
                    items.push(item);
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(album_id = %self.album_id, count = items.len(), "Listed album");
        Ok(items)
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Bytes> {
        let base_url = match &item.download_url {
            Some(url) => url.clone(),
            None => self.resolve_base_url(&item.id).await?,
        };

        let url = match item.kind {
            MediaKind::Video => format!("{}=dv", base_url),
            MediaKind::Photo => format!(
                "{}=w{}-h{}",
                base_url, self.photo_width, self.photo_height
            ),
        };

        // Content downloads are bounded by the cache's fetch timeout
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| send_error(e, self.request_timeout))?;
        let resp = self.check_status(resp).await?;
        resp.bytes()
            .await
            .map_err(|e| send_error(e, self.request_timeout))
    }
}

fn send_error(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else if e.is_connect() {
        FetchError::Unreachable(e.to_string())
    } else if e.is_decode() {
        FetchError::InvalidData(e.to_string())
    } else {
        FetchError::Http(e)
    }
}

/// Converts an API item, skipping what the slideshow cannot show
pub(crate) fn convert_item(raw: ApiMediaItem) -> Option<RemoteItem> {
    let id = match raw.id {
        Some(id) if !id.is_empty() => id,
        _ => {
            warn!("Skipping media item without id");
            return None;
        }
    };

    let mime_type = raw.mime_type.unwrap_or_default();
    let Some((kind, _)) = media_info(&mime_type) else {
        debug!(item_id = %id, mime_type = %mime_type, "Skipping unsupported media type");
        return None;
    };

    let metadata = raw.media_metadata?;
    if kind == MediaKind::Video {
        let ready = metadata
            .video
            .as_ref()
            .and_then(|v| v.status.as_deref())
            .map(|s| s == "READY")
            .unwrap_or(true);
        if !ready {
            debug!(item_id = %id, "Skipping video still being processed");
            return None;
        }
    }

    let created_raw = metadata.creation_time.as_deref().unwrap_or_default();
    let created_at = match DateTime::parse_from_rfc3339(created_raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            warn!(item_id = %id, creation_time = %created_raw, "Skipping item with invalid creation time: {}", e);
            return None;
        }
    };

    let mut hasher = Sha1::new();
    for part in [
        mime_type.as_str(),
        created_raw,
        metadata.width.as_deref().unwrap_or_default(),
        metadata.height.as_deref().unwrap_or_default(),
        raw.filename.as_deref().unwrap_or_default(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let version = hex::encode(&hasher.finalize()[..8]);

    Some(RemoteItem {
        id,
        kind,
        mime_type,
        created_at,
        version,
        filename: raw.filename,
        download_url: raw.base_url,
    })
}

/// Builder for [`GooglePhotosSource`]
pub struct SourceBuilder {
    album_id: String,
    tokens: Arc<dyn TokenProvider>,
    client: Option<Client>,
    api_base: String,
    page_size: u32,
    request_timeout: Duration,
    photo_width: u32,
    photo_height: u32,
    user_agent: String,
}

impl SourceBuilder {
    pub fn new(album_id: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            album_id: album_id.into(),
            tokens,
            client: None,
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            photo_width: DEFAULT_PHOTO_WIDTH,
            photo_height: DEFAULT_PHOTO_HEIGHT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Use a custom reqwest client (shared pool, proxy, ...)
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Override the API base URL
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Page size for album listing (1..=100)
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bounding box photos are scaled into on download
    pub fn photo_size(mut self, width: u32, height: u32) -> Self {
        self.photo_width = width;
        self.photo_height = height;
        self
    }

    pub fn build(self) -> Result<GooglePhotosSource> {
        if self.album_id.trim().is_empty() {
            return Err(FetchError::InvalidData("album id is empty".to_string()));
        }

        let client = match self.client {
            Some(c) => c,
            None => Client::builder().user_agent(self.user_agent).build()?,
        };

        Ok(GooglePhotosSource {
            client,
            api_base: self.api_base,
            album_id: self.album_id,
            tokens: self.tokens,
            page_size: self.page_size,
            request_timeout: self.request_timeout,
            photo_width: self.photo_width,
            photo_height: self.photo_height,
        })
    }
}
