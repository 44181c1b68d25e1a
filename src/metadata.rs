//! Link metadata lookups
//!
//! Best-effort title/thumbnail resolution for YouTube links via the
//! oEmbed endpoint. Lookups never block or fail note creation: any error
//! substitutes deterministic fallback values, and a fetched thumbnail is
//! re-validated before it is stored.

use crate::config::DEFAULT_VIDEO_TITLE;
use crate::error::Result;
use crate::sanitizer::{self, VideoRef};
use crate::store::models::Item;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct LinkMetadata {
    pub title: String,
    pub thumbnail_url: String,
}

#[async_trait::async_trait]
pub trait LinkMetadataFetcher: Send + Sync {
    async fn fetch(&self, watch_url: &str) -> Result<LinkMetadata>;
}

/// Fetcher backed by YouTube's public oEmbed endpoint.
#[derive(Default, Clone)]
pub struct OEmbedFetcher {
    client: reqwest::Client,
}

impl OEmbedFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct OEmbedResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnail_url: String,
}

#[async_trait::async_trait]
impl LinkMetadataFetcher for OEmbedFetcher {
    async fn fetch(&self, watch_url: &str) -> Result<LinkMetadata> {
        let response = self
            .client
            .get("https://www.youtube.com/oembed")
            .query(&[("url", watch_url), ("format", "json")])
            .send()
            .await?
            .error_for_status()?;
        let data: OEmbedResponse = response.json().await?;
        Ok(LinkMetadata {
            title: data.title,
            thumbnail_url: data.thumbnail_url,
        })
    }
}

/// Build a YouTube item for a validated reference. Infallible: a failed
/// or hostile metadata response degrades to the default title and the
/// deterministic thumbnail for the video id.
pub async fn build_video_item<F>(fetcher: &F, video: &VideoRef) -> Item
where
    F: LinkMetadataFetcher + ?Sized,
{
    let (title, thumbnail) = match fetcher.fetch(&video.canonical_url).await {
        Ok(meta) => {
            let title = meta.title.trim();
            let title = if title.is_empty() {
                DEFAULT_VIDEO_TITLE.to_string()
            } else {
                title.to_string()
            };
            (
                title,
                sanitizer::validate_youtube_thumbnail(&meta.thumbnail_url, &video.video_id),
            )
        }
        Err(e) => {
            tracing::warn!("link metadata lookup failed, using fallbacks: {}", e);
            (
                DEFAULT_VIDEO_TITLE.to_string(),
                sanitizer::fallback_thumbnail(&video.video_id),
            )
        }
    };

    Item::Youtube {
        url: video.canonical_url.clone(),
        video_id: video.video_id.clone(),
        title,
        thumbnail,
    }
}
