//! Upload configuration.
//!
//! An album page URL such as `https://photos.example/album/abc123` resolves
//! to an [`AlbumContext`]: the origin serves the API and the last path
//! segment is the album id. [`UploadConfig`] pairs that context with the
//! backend [`Protocol`] and builds the coordinator.

use std::sync::Arc;

use log::debug;
use reqwest::Url;

use crate::coordinator::UploadCoordinator;
use crate::error::UploadError;
use crate::model::{Endpoint, HttpMethod};
use crate::progress::UploadObserver;
use crate::transport::{HttpTransport, Protocol, UploadTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumContext {
    base: Url,
    album_id: String,
}

impl AlbumContext {
    /// Build a context from an API base URL and an album id.
    pub fn new(base_url: &str, album_id: impl Into<String>) -> Result<Self, UploadError> {
        let album_id = album_id.into();
        if album_id.is_empty() {
            return Err(UploadError::InvalidAlbumUrl {
                url: base_url.to_string(),
                reason: "album id is empty".to_string(),
            });
        }
        Ok(AlbumContext {
            base: parse_http_url(base_url)?,
            album_id,
        })
    }

    /// Resolve the album from the URL of its page.
    ///
    /// The last non-empty path segment is the album id; query and fragment
    /// are ignored.
    pub fn from_page_url(page_url: &str) -> Result<Self, UploadError> {
        let url = parse_http_url(page_url)?;
        let album_id = url
            .path_segments()
            .and_then(|segments| segments.rev().find(|s| !s.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| UploadError::InvalidAlbumUrl {
                url: page_url.to_string(),
                reason: "URL has no path segment naming the album".to_string(),
            })?;

        let mut base = url;
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);
        debug!("album {} resolved from {}", album_id, page_url);
        Ok(AlbumContext { base, album_id })
    }

    pub fn album_id(&self) -> &str {
        &self.album_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `POST {base}/api/albums/{album_id}/album/upload`
    pub fn upload_endpoint(&self) -> Endpoint {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        // parse_http_url rejects cannot-be-a-base URLs, so this always succeeds
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .clear()
                .extend(["api", "albums", self.album_id.as_str(), "album", "upload"]);
        }
        Endpoint::new(url.to_string(), HttpMethod::Post)
    }
}

fn parse_http_url(raw: &str) -> Result<Url, UploadError> {
    let url = Url::parse(raw).map_err(|e| UploadError::InvalidAlbumUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(UploadError::InvalidAlbumUrl {
            url: raw.to_string(),
            reason: "expected an http or https URL".to_string(),
        });
    }
    Ok(url)
}

/// Everything needed to run uploads against one album.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub album: AlbumContext,
    pub protocol: Protocol,
}

impl UploadConfig {
    pub fn new(album: AlbumContext, protocol: Protocol) -> Self {
        UploadConfig { album, protocol }
    }

    pub fn transport(&self) -> Arc<dyn UploadTransport> {
        Arc::new(HttpTransport::new(self.protocol.clone()))
    }

    pub fn coordinator(&self, observer: Option<Arc<dyn UploadObserver>>) -> UploadCoordinator {
        UploadCoordinator::new(self.album.clone(), self.transport(), observer)
    }
}
