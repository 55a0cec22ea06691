use super::BridgeContext;
use crate::dispatch::{Operation, OperationError, Outcome, Router};
use crate::model::{first_image_id, Album, SavedAlbumsPage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GET_HOME: &str = "com.spotify.superbird.get_home";
pub const GET_CHILDREN_OF_ITEM: &str = "com.spotify.get_children_of_item";
pub const GET_IMAGE: &str = "com.spotify.get_image";
pub const GET_THUMBNAIL_IMAGE: &str = "com.spotify.get_thumbnail_image";
pub const PERMISSIONS: &str = "com.spotify.superbird.permissions";
pub const PLAY_URI: &str = "com.spotify.play_uri";
pub const SET_PLAYBACK_SPEED: &str = "com.spotify.set_playback_speed";
pub const INSTRUMENTATION_LOG: &str = "com.spotify.superbird.instrumentation.log";

const ALBUMS_SECTION_TITLE: &str = "Albums";
const ALBUMS_SECTION_URI: &str = "spotify:collection:albums";
const ALBUM_URI_PREFIX: &str = "spotify:album:";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

pub fn register_all(router: &mut Router<BridgeContext>) {
    router.register(GET_HOME, GetHome);
    router.register(GET_CHILDREN_OF_ITEM, GetChildrenOfItem);
    router.register(GET_IMAGE, GetImage);
    router.register(GET_THUMBNAIL_IMAGE, GetImage);
    router.register(PERMISSIONS, Permissions);
    router.register(PLAY_URI, PlayUri);
    router.register(SET_PLAYBACK_SPEED, SetPlaybackSpeed);
    router.register(INSTRUMENTATION_LOG, InstrumentationLog);
}

#[derive(Debug, Serialize)]
struct HomePayload {
    items: Vec<HomeSection>,
}

#[derive(Debug, Serialize)]
struct HomeSection {
    title: &'static str,
    uri: &'static str,
    children: Vec<HomeItem>,
    total: u32,
}

#[derive(Debug, Serialize)]
struct HomeItem {
    title: String,
    subtitle: String,
    uri: String,
    image_id: String,
}

impl From<SavedAlbumsPage> for HomePayload {
    fn from(page: SavedAlbumsPage) -> Self {
        let children = page
            .items
            .into_iter()
            .map(|saved| {
                let album = saved.album;
                HomeItem {
                    subtitle: album
                        .artists
                        .first()
                        .map(|artist| artist.name.clone())
                        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
                    image_id: first_image_id(&album.images),
                    title: album.name,
                    uri: album.uri,
                }
            })
            .collect();

        Self {
            items: vec![HomeSection {
                title: ALBUMS_SECTION_TITLE,
                uri: ALBUMS_SECTION_URI,
                children,
                total: page.total,
            }],
        }
    }
}

struct GetHome;

#[async_trait]
impl Operation<BridgeContext> for GetHome {
    type Args = Value;

    async fn call(&self, _args: Value, ctx: &BridgeContext) -> Result<Outcome, OperationError> {
        let page = ctx.library.saved_albums().await?;
        Outcome::reply(HomePayload::from(page))
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenArgs {
    parent_id: String,
}

#[derive(Debug, Serialize)]
struct ChildrenPayload {
    success: bool,
    total: u32,
    items: Vec<ChildItem>,
}

#[derive(Debug, Serialize)]
struct ChildItem {
    id: Option<String>,
    image_id: String,
    playable: bool,
    subtitle: String,
    title: String,
    uri: String,
    available_offline: bool,
    content_description: &'static str,
    has_children: bool,
    metadata: ChildMetadata,
}

#[derive(Debug, Serialize)]
struct ChildMetadata {
    is_explicit_content: bool,
    duration_ms: u64,
}

impl From<Album> for ChildrenPayload {
    fn from(album: Album) -> Self {
        let image_id = first_image_id(&album.images);
        let items = album
            .tracks
            .items
            .into_iter()
            .map(|track| ChildItem {
                id: track.id,
                image_id: image_id.clone(),
                playable: true,
                subtitle: track
                    .artists
                    .iter()
                    .map(|artist| artist.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                title: track.name,
                uri: track.uri,
                available_offline: false,
                content_description: "",
                has_children: false,
                metadata: ChildMetadata {
                    is_explicit_content: track.explicit,
                    duration_ms: track.duration_ms,
                },
            })
            .collect();

        Self {
            success: true,
            total: album.tracks.total,
            items,
        }
    }
}

/// Only albums can be browsed; other parents get no answer.
struct GetChildrenOfItem;

#[async_trait]
impl Operation<BridgeContext> for GetChildrenOfItem {
    type Args = ChildrenArgs;

    async fn call(&self, args: ChildrenArgs, ctx: &BridgeContext) -> Result<Outcome, OperationError> {
        let is_album = args
            .parent_id
            .strip_prefix(ALBUM_URI_PREFIX)
            .is_some_and(|id| !id.is_empty());
        if !is_album {
            tracing::debug!(parent_id = %args.parent_id, "not an album; no children served");
            return Ok(Outcome::NoReply);
        }

        let album = ctx.library.album(&args.parent_id).await?;
        Outcome::reply(ChildrenPayload::from(album))
    }
}

#[derive(Debug, Deserialize)]
struct ImageArgs {
    id: String,
}

#[derive(Debug, Serialize)]
struct ImagePayload {
    image_data: String,
}

/// Serves both full-size and thumbnail requests; upstream has one size per id.
struct GetImage;

#[async_trait]
impl Operation<BridgeContext> for GetImage {
    type Args = ImageArgs;

    async fn call(&self, args: ImageArgs, ctx: &BridgeContext) -> Result<Outcome, OperationError> {
        let image_data = ctx.images.base64(&args.id).await?;
        Outcome::reply(ImagePayload { image_data })
    }
}

struct Permissions;

#[async_trait]
impl Operation<BridgeContext> for Permissions {
    type Args = Value;

    async fn call(&self, _args: Value, _ctx: &BridgeContext) -> Result<Outcome, OperationError> {
        Ok(Outcome::NoReply)
    }
}

#[derive(Debug, Deserialize)]
struct PlayUriArgs {
    uri: String,
    #[serde(rename = "contextURI")]
    context_uri: String,
    #[serde(rename = "skipToURI", default)]
    skip_to_uri: Option<String>,
}

struct PlayUri;

#[async_trait]
impl Operation<BridgeContext> for PlayUri {
    type Args = PlayUriArgs;

    async fn call(&self, args: PlayUriArgs, ctx: &BridgeContext) -> Result<Outcome, OperationError> {
        tracing::info!(uri = %args.uri, context_uri = %args.context_uri, "play requested");
        ctx.playback
            .play_uri(&args.context_uri, args.skip_to_uri)
            .await?;
        Ok(Outcome::NoReply)
    }
}

#[derive(Debug, Deserialize)]
struct PlaybackSpeedArgs {
    playback_speed: f64,
}

/// Speed 0 pauses, anything else resumes.
struct SetPlaybackSpeed;

#[async_trait]
impl Operation<BridgeContext> for SetPlaybackSpeed {
    type Args = PlaybackSpeedArgs;

    async fn call(
        &self,
        args: PlaybackSpeedArgs,
        ctx: &BridgeContext,
    ) -> Result<Outcome, OperationError> {
        ctx.playback.set_playing(args.playback_speed != 0.0).await?;
        Ok(Outcome::NoReply)
    }
}

struct InstrumentationLog;

#[async_trait]
impl Operation<BridgeContext> for InstrumentationLog {
    type Args = Value;

    async fn call(&self, args: Value, _ctx: &BridgeContext) -> Result<Outcome, OperationError> {
        tracing::trace!(%args, "remote instrumentation");
        Ok(Outcome::NoReply)
    }
}
