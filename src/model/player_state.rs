use super::{first_image_id, ArtistRef, PlaybackSnapshot};
use serde::{Deserialize, Serialize};

const DEFAULT_CONTEXT_URI: &str = "spotify:collection";
const CONTEXT_TITLE: &str = "Your Library";

/// Player state in the shape the remote renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedPlayerState {
    pub context_uri: String,
    pub context_title: String,
    pub is_paused: bool,
    pub is_paused_bool: bool,
    pub playback_options: PlaybackOptions,
    pub playback_position: Option<u64>,
    pub playback_speed: u32,
    pub playing_remotely: bool,
    pub remote_device_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub track: FormattedTrack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackOptions {
    pub repeat: String,
    pub shuffle: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedTrack {
    pub album: FormattedRef,
    pub artist: FormattedRef,
    pub artists: Vec<FormattedRef>,
    pub duration_ms: u64,
    pub image_id: String,
    pub is_episode: bool,
    pub is_podcast: bool,
    pub name: String,
    pub saved: bool,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedRef {
    pub name: String,
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&ArtistRef> for FormattedRef {
    fn from(artist: &ArtistRef) -> Self {
        Self {
            name: artist.name.clone(),
            uri: artist.uri.clone(),
            kind: artist.kind.clone(),
        }
    }
}

impl From<&PlaybackSnapshot> for FormattedPlayerState {
    fn from(state: &PlaybackSnapshot) -> Self {
        let track = &state.track;
        let artist = track
            .artists
            .first()
            .map(FormattedRef::from)
            .unwrap_or_else(|| FormattedRef {
                name: "Unknown Artist".to_string(),
                uri: "spotify:artist".to_string(),
                kind: "artist".to_string(),
            });

        Self {
            context_uri: state
                .context
                .as_ref()
                .map(|context| context.uri.clone())
                .unwrap_or_else(|| DEFAULT_CONTEXT_URI.to_string()),
            context_title: CONTEXT_TITLE.to_string(),
            is_paused: !state.is_playing,
            is_paused_bool: !state.is_playing,
            playback_options: PlaybackOptions {
                repeat: state.repeat_state.clone(),
                shuffle: state.shuffle_state,
            },
            playback_position: state.progress_ms,
            playback_speed: 1,
            playing_remotely: true,
            remote_device_id: state.device.id.clone().unwrap_or_default(),
            kind: "track".to_string(),
            track: FormattedTrack {
                album: FormattedRef {
                    name: track.album.name.clone(),
                    uri: track.album.uri.clone(),
                    kind: track.album.kind.clone(),
                },
                artist,
                artists: track.artists.iter().map(FormattedRef::from).collect(),
                duration_ms: track.duration_ms,
                image_id: first_image_id(&track.album.images),
                is_episode: false,
                is_podcast: false,
                name: track.name.clone(),
                saved: true,
                uri: track.uri.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::fixtures::snapshot;
    use crate::model::PlaybackContext;

    #[test]
    fn formats_paused_track_with_library_context() {
        let formatted = snapshot("spotify:track:t1", false, Some("dev")).formatted();
        let json = serde_json::to_value(&formatted).unwrap();

        assert_eq!(json["context_uri"], "spotify:collection");
        assert_eq!(json["context_title"], "Your Library");
        assert_eq!(json["is_paused"], true);
        assert_eq!(json["is_paused_bool"], true);
        assert_eq!(json["type"], "track");
        assert_eq!(json["remote_device_id"], "dev");
        assert_eq!(json["track"]["image_id"], "img1");
        assert_eq!(json["track"]["artist"]["name"], "Artist");
        assert_eq!(json["track"]["album"]["type"], "album");
        assert_eq!(json["playback_options"]["repeat"], "off");
    }

    #[test]
    fn missing_artist_falls_back_to_unknown() {
        let mut snap = snapshot("spotify:track:t1", true, None);
        snap.track.artists.clear();
        snap.context = Some(PlaybackContext {
            uri: "spotify:playlist:p1".to_string(),
            kind: Some("playlist".to_string()),
        });

        let formatted = snap.formatted();
        assert_eq!(formatted.track.artist.name, "Unknown Artist");
        assert_eq!(formatted.track.artist.uri, "spotify:artist");
        assert_eq!(formatted.context_uri, "spotify:playlist:p1");
        assert_eq!(formatted.remote_device_id, "");
    }
}
