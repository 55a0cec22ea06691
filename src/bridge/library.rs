use crate::cache::{ContentCache, Ttl};
use crate::model::{id_from_uri, Album, Device, SavedAlbumsPage};
use crate::upstream::{MediaApi, UpstreamError};
use std::sync::Arc;

const SAVED_ALBUMS_KEY: &str = "albums_list";
const DEVICES_KEY: &str = "devices";

#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub market: String,
    pub saved_album_limit: u32,
    pub library_ttl: Ttl,
    pub device_ttl: Ttl,
    pub capacity: usize,
}

/// Cached read-only queries against the media service.
#[derive(Clone)]
pub struct Library {
    api: Arc<dyn MediaApi>,
    options: LibraryOptions,
    saved_albums: ContentCache<SavedAlbumsPage, UpstreamError>,
    albums: ContentCache<Album, UpstreamError>,
    devices: ContentCache<Vec<Device>, UpstreamError>,
}

impl Library {
    pub fn new(api: Arc<dyn MediaApi>, options: LibraryOptions) -> Self {
        Self {
            saved_albums: ContentCache::new(options.capacity),
            albums: ContentCache::new(options.capacity),
            devices: ContentCache::new(options.capacity),
            api,
            options,
        }
    }

    pub async fn saved_albums(&self) -> Result<SavedAlbumsPage, UpstreamError> {
        let api = Arc::clone(&self.api);
        let limit = self.options.saved_album_limit;
        let market = self.options.market.clone();
        self.saved_albums
            .get_or_fetch(SAVED_ALBUMS_KEY, self.options.library_ttl, move || async move {
                api.saved_albums(limit, &market).await
            })
            .await
    }

    /// `album_uri` is a full `spotify:album:<id>` uri.
    pub async fn album(&self, album_uri: &str) -> Result<Album, UpstreamError> {
        let api = Arc::clone(&self.api);
        let market = self.options.market.clone();
        let album_id = id_from_uri(album_uri).to_string();
        self.albums
            .get_or_fetch(
                &format!("album_{album_uri}"),
                self.options.library_ttl,
                move || async move { api.album(&album_id, &market).await },
            )
            .await
    }

    pub async fn devices(&self) -> Result<Vec<Device>, UpstreamError> {
        let api = Arc::clone(&self.api);
        self.devices
            .get_or_fetch(DEVICES_KEY, self.options.device_ttl, move || async move {
                api.available_devices().await
            })
            .await
    }
}
