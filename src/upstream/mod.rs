mod spotify;

pub use spotify::{SpotifyClient, DEFAULT_API_BASE_URL};

use crate::model::{Album, Device, PlaybackSnapshot, SavedAlbumsPage};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Media service operations the bridge depends on. None of them are cached
/// or deduplicated by the implementation.
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// `None` when nothing is playing or the item is not a track.
    async fn playback_state(&self) -> Result<Option<PlaybackSnapshot>, UpstreamError>;

    async fn start_playback(
        &self,
        device_id: &str,
        context: Option<PlayContext>,
    ) -> Result<(), UpstreamError>;

    async fn pause_playback(&self, device_id: &str) -> Result<(), UpstreamError>;

    async fn available_devices(&self) -> Result<Vec<Device>, UpstreamError>;

    async fn saved_albums(&self, limit: u32, market: &str)
        -> Result<SavedAlbumsPage, UpstreamError>;

    async fn album(&self, album_id: &str, market: &str) -> Result<Album, UpstreamError>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, image_id: &str) -> Result<Vec<u8>, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayContext {
    pub context_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<PlayOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayOffset {
    pub uri: String,
}

impl PlayContext {
    pub fn new(context_uri: impl Into<String>, skip_to_uri: Option<String>) -> Self {
        Self {
            context_uri: context_uri.into(),
            offset: skip_to_uri
                .filter(|uri| !uri.is_empty())
                .map(|uri| PlayOffset { uri }),
        }
    }
}

/// Clone so a single in-flight fetch can hand the same failure to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("config error: {0}")]
    Config(&'static str),
    #[error("url error: {0}")]
    Url(String),
    #[error("http error: {0}")]
    Http(Arc<reqwest::Error>),
    #[error("json error: {0}")]
    Json(Arc<serde_json::Error>),
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(String),
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
