mod player_state;

pub use player_state::FormattedPlayerState;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArtistRef {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub uri: String,
    #[serde(rename = "type", default = "default_artist_kind")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AlbumRef {
    pub name: String,
    pub uri: String,
    #[serde(rename = "type", default = "default_album_kind")]
    pub kind: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// A full track object as returned inside playback state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Track {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub uri: String,
    pub album: AlbumRef,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
}

/// A simplified track object as listed inside an album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackRef {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub tracks: Page<TrackRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAlbum {
    #[serde(default)]
    pub added_at: Option<String>,
    pub album: Album,
}

pub type SavedAlbumsPage = Page<SavedAlbum>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Device {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub volume_percent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackContext {
    pub uri: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Playback item union. Episodes (podcasts) are tracked only so they can be
/// recognised and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlaybackItem {
    Track(Track),
    Episode(EpisodeRef),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EpisodeRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
}

/// Wire shape of `GET me/player`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackStateResponse {
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub context: Option<PlaybackContext>,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub shuffle_state: bool,
    #[serde(default = "default_repeat_state")]
    pub repeat_state: String,
    #[serde(default)]
    pub item: Option<PlaybackItem>,
}

impl PlaybackStateResponse {
    /// Only track playback produces a snapshot; empty, episode and unknown
    /// items are treated as absent.
    pub fn into_snapshot(self) -> Option<PlaybackSnapshot> {
        match self.item {
            Some(PlaybackItem::Track(track)) => Some(PlaybackSnapshot {
                device: self.device,
                context: self.context,
                progress_ms: self.progress_ms,
                is_playing: self.is_playing,
                shuffle_state: self.shuffle_state,
                repeat_state: self.repeat_state,
                track,
            }),
            _ => None,
        }
    }
}

/// Upstream playback state at one poll instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub device: Device,
    pub context: Option<PlaybackContext>,
    pub progress_ms: Option<u64>,
    pub is_playing: bool,
    pub shuffle_state: bool,
    pub repeat_state: String,
    pub track: Track,
}

impl PlaybackSnapshot {
    pub fn track_uri(&self) -> &str {
        &self.track.uri
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Position, shuffle, repeat and device are ignored: they move every tick
    /// or are not surfaced as a state change.
    pub fn differs_from(&self, previous: &PlaybackSnapshot) -> bool {
        self.track.uri != previous.track.uri || self.is_playing != previous.is_playing
    }

    pub fn formatted(&self) -> FormattedPlayerState {
        FormattedPlayerState::from(self)
    }
}

// Artwork hosted elsewhere keeps its full URL, which the image store rejects
// as an id.
pub fn image_id_from_url(url: &str) -> &str {
    url.strip_prefix(crate::images::DEFAULT_IMAGE_BASE_URL)
        .unwrap_or(url)
}

pub fn first_image_id(images: &[Image]) -> String {
    images
        .first()
        .map(|image| image_id_from_url(&image.url).to_string())
        .unwrap_or_default()
}

/// `spotify:album:4aawyAB9vmqN3uQ7FjRGTy` -> `4aawyAB9vmqN3uQ7FjRGTy`.
pub fn id_from_uri(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}

fn default_artist_kind() -> String {
    "artist".to_string()
}

fn default_album_kind() -> String {
    "album".to_string()
}

fn default_repeat_state() -> String {
    "off".to_string()
}
