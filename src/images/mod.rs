use crate::cache::{ContentCache, Ttl};
use crate::upstream::{ImageSource, UpstreamError};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode, Url};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_IMAGE_BASE_URL: &str = "https://i.scdn.co/image/";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageError {
    #[error("invalid image id: {0:?}")]
    InvalidId(String),
    #[error("image fetch failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("image cache io error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for ImageError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

#[derive(Clone)]
pub struct ImageStore {
    source: Arc<dyn ImageSource>,
    dir: Option<PathBuf>,
    memory: ContentCache<String, ImageError>,
}

impl ImageStore {
    pub fn new(source: Arc<dyn ImageSource>, dir: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            source,
            dir,
            memory: ContentCache::new(capacity),
        }
    }

    pub async fn base64(&self, image_id: &str) -> Result<String, ImageError> {
        validate_image_id(image_id)?;

        let source = Arc::clone(&self.source);
        let path = self.dir.as_ref().map(|dir| image_path(dir, image_id));
        let id = image_id.to_string();
        self.memory
            .get_or_fetch(image_id, Ttl::Infinite, move || async move {
                let bytes = load_or_fetch(source.as_ref(), path.as_deref(), &id).await?;
                Ok(general_purpose::STANDARD.encode(bytes))
            })
            .await
    }
}

async fn load_or_fetch(
    source: &dyn ImageSource,
    path: Option<&Path>,
    image_id: &str,
) -> Result<Vec<u8>, ImageError> {
    if let Some(path) = path {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                tracing::debug!(image_id, "image served from disk cache");
                return Ok(bytes);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }

    tracing::info!(image_id, "fetching image");
    let bytes = source.fetch(image_id).await?;

    if let Some(path) = path {
        if let Err(err) = persist(path, &bytes).await {
            tracing::warn!(image_id, error = %err, "failed to persist image");
        }
    }
    Ok(bytes)
}

async fn persist(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, bytes).await
}

// Artwork is served as JPEG.
fn image_path(dir: &Path, image_id: &str) -> PathBuf {
    dir.join(format!("{image_id}.jpg"))
}

fn validate_image_id(image_id: &str) -> Result<(), ImageError> {
    if image_id.is_empty() || !image_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ImageError::InvalidId(image_id.to_string()));
    }
    Ok(())
}

pub struct HttpImageSource {
    http: Client,
    base_url: Url,
}

impl HttpImageSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let mut parsed =
            Url::parse(base_url.trim()).map_err(|err| UpstreamError::Url(err.to_string()))?;
        if !parsed.path().ends_with('/') {
            let new_path = format!("{}/", parsed.path().trim_end_matches('/'));
            parsed.set_path(&new_path);
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parsed,
        })
    }

    fn image_url(&self, image_id: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(image_id)
            .map_err(|err| UpstreamError::Url(err.to_string()))
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, image_id: &str) -> Result<Vec<u8>, UpstreamError> {
        let resp = self.http.get(self.image_url(image_id)?).send().await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited {
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct CountingImageSource {
        pub calls: AtomicUsize,
    }

    impl CountingImageSource {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageSource for CountingImageSource {
        async fn fetch(&self, image_id: &str) -> Result<Vec<u8>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if image_id == "missing" {
                return Err(UpstreamError::Api {
                    status: 404,
                    body: "not found".to_string(),
                });
            }
            Ok(format!("jpeg:{image_id}").into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CountingImageSource;
    use super::*;

    fn encoded(id: &str) -> String {
        general_purpose::STANDARD.encode(format!("jpeg:{id}"))
    }

    #[tokio::test]
    async fn fetches_once_and_serves_from_memory() {
        let source = Arc::new(CountingImageSource::default());
        let store = ImageStore::new(source.clone(), None, 16);

        assert_eq!(store.base64("abc").await.unwrap(), encoded("abc"));
        assert_eq!(store.base64("abc").await.unwrap(), encoded("abc"));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn disk_cache_survives_a_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingImageSource::default());

        let first = ImageStore::new(source.clone(), Some(dir.path().to_path_buf()), 16);
        first.base64("abc").await.unwrap();
        assert!(dir.path().join("abc.jpg").exists());

        let second = ImageStore::new(source.clone(), Some(dir.path().to_path_buf()), 16);
        assert_eq!(second.base64("abc").await.unwrap(), encoded("abc"));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn rejects_path_like_ids_without_fetching() {
        let source = Arc::new(CountingImageSource::default());
        let store = ImageStore::new(source.clone(), None, 16);

        for id in ["", "../etc/passwd", "a/b", "abc.jpg"] {
            assert!(matches!(
                store.base64(id).await,
                Err(ImageError::InvalidId(_))
            ));
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_is_retried() {
        let source = Arc::new(CountingImageSource::default());
        let store = ImageStore::new(source.clone(), None, 16);

        assert!(store.base64("missing").await.is_err());
        assert!(store.base64("missing").await.is_err());
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn image_url_joins_base() {
        let source =
            HttpImageSource::new("https://images.example.test/image", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.image_url("ab67").unwrap().as_str(),
            "https://images.example.test/image/ab67"
        );
    }
}
