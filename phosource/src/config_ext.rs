//! Extension to build the configured source from phoconfig
//!
//! # Example
//!
//! ```rust,ignore
//! use phoconfig::get_config;
//! use phosource::SourceConfigExt;
//!
//! let config = get_config()?;
//! let source = config.build_photo_source()?;
//! ```

use crate::{DirectorySource, GooglePhotosSource, PhotoSource, StaticToken};
use anyhow::{anyhow, Result};
use phoconfig::Config;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable consulted when no access token is configured
pub const ENV_ACCESS_TOKEN: &str = "PHOSEUM_GOOGLE_ACCESS_TOKEN";

/// Extension trait exposing the remote source settings
pub trait SourceConfigExt {
    /// `googlephotos` or `directory`
    fn get_source_kind(&self) -> String;

    fn get_album_id(&self) -> Option<String>;

    fn get_source_directory(&self) -> Option<String>;

    /// Builds the source selected by `source.kind`
    fn build_photo_source(&self) -> Result<Arc<dyn PhotoSource>>;
}

impl SourceConfigExt for Config {
    fn get_source_kind(&self) -> String {
        self.get_string(&["source", "kind"])
            .unwrap_or_else(|| "googlephotos".to_string())
            .to_lowercase()
    }

    fn get_album_id(&self) -> Option<String> {
        self.get_string(&["googlephotos", "album_id"])
    }

    fn get_source_directory(&self) -> Option<String> {
        self.get_string(&["source", "directory"])
    }

    fn build_photo_source(&self) -> Result<Arc<dyn PhotoSource>> {
        match self.get_source_kind().as_str() {
            "directory" => {
                let dir = self
                    .get_source_directory()
                    .ok_or_else(|| anyhow!("source.directory must be set for a directory source"))?;
                Ok(Arc::new(DirectorySource::new(dir)))
            }
            "googlephotos" => {
                let album_id = self
                    .get_album_id()
                    .ok_or_else(|| anyhow!("googlephotos.album_id is not configured"))?;
                let token = self
                    .get_string(&["googlephotos", "access_token"])
                    .or_else(|| std::env::var(ENV_ACCESS_TOKEN).ok())
                    .unwrap_or_default();
                let timeout = self.get_u64_or(&["googlephotos", "request_timeout"], 30);
                let page_size = self.get_u64_or(&["googlephotos", "page_size"], 100);

                let source = GooglePhotosSource::builder(album_id, Arc::new(StaticToken::new(token)))
                    .page_size(u32::try_from(page_size).unwrap_or(100))
                    .request_timeout(Duration::from_secs(timeout))
                    .build()?;
                Ok(Arc::new(source))
            }
            other => Err(anyhow!("unknown source kind: {}", other)),
        }
    }
}
