use super::{MediaApi, PlayContext, UpstreamError};
use crate::model::{Album, Device, DeviceList, PlaybackSnapshot, PlaybackStateResponse, SavedAlbumsPage};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
    Client, Method, Request, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1/";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    http: Client,
    base_url: Url,
    access_token: String,
}

#[derive(Clone, Debug)]
pub struct SpotifyClientBuilder {
    base_url: String,
    access_token: String,
    timeout: Duration,
}

impl SpotifyClientBuilder {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SpotifyClient, UpstreamError> {
        SpotifyClient::from_parts(self.base_url, self.access_token, self.timeout)
    }
}

impl SpotifyClient {
    pub fn builder(access_token: impl Into<String>) -> SpotifyClientBuilder {
        SpotifyClientBuilder::new(access_token)
    }

    fn from_parts(
        base_url: String,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        if access_token.trim().is_empty() {
            return Err(UpstreamError::Config("access token must not be empty"));
        }

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
            access_token: access_token.trim().to_string(),
        })
    }

    pub fn build_playback_state_request(&self) -> Result<Request, UpstreamError> {
        self.build_request(Method::GET, "me/player", &[])
    }

    pub fn build_start_playback_request(
        &self,
        device_id: &str,
        context: Option<&PlayContext>,
    ) -> Result<Request, UpstreamError> {
        let body = match context {
            Some(context) => serde_json::to_vec(context)?,
            None => Vec::new(),
        };
        let mut builder =
            self.build_request_builder(Method::PUT, "me/player/play", &[("device_id", device_id)])?;
        if !body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        Ok(builder.body(body).build()?)
    }

    pub fn build_pause_request(&self, device_id: &str) -> Result<Request, UpstreamError> {
        let builder =
            self.build_request_builder(Method::PUT, "me/player/pause", &[("device_id", device_id)])?;
        Ok(builder.body(Vec::new()).build()?)
    }

    pub fn build_devices_request(&self) -> Result<Request, UpstreamError> {
        self.build_request(Method::GET, "me/player/devices", &[])
    }

    pub fn build_saved_albums_request(
        &self,
        limit: u32,
        market: &str,
    ) -> Result<Request, UpstreamError> {
        let limit = limit.to_string();
        self.build_request(
            Method::GET,
            "me/albums",
            &[("limit", limit.as_str()), ("market", market)],
        )
    }

    pub fn build_album_request(&self, album_id: &str, market: &str) -> Result<Request, UpstreamError> {
        if album_id.trim().is_empty() {
            return Err(UpstreamError::Config("album id must not be empty"));
        }
        self.build_request(
            Method::GET,
            &format!("albums/{}", album_id.trim()),
            &[("market", market)],
        )
    }

    async fn execute(&self, req: Request) -> Result<RawResponse, UpstreamError> {
        let resp = self.http.execute(req).await?;
        let status = resp.status();
        let retry_after_secs = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        let body = resp.text().await?;
        Ok(RawResponse {
            status,
            retry_after_secs,
            body,
        })
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Request, UpstreamError> {
        Ok(self.build_request_builder(method, path, query)?.build()?)
    }

    fn build_request_builder(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::RequestBuilder, UpstreamError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| UpstreamError::Url(err.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        Ok(self.http.request(method, url).headers(self.common_headers()?))
    }

    fn common_headers(&self) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.access_token))
                .map_err(|err| UpstreamError::InvalidHeaderValue(err.to_string()))?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl MediaApi for SpotifyClient {
    async fn playback_state(&self) -> Result<Option<PlaybackSnapshot>, UpstreamError> {
        let resp = self.execute(self.build_playback_state_request()?).await?;
        parse_playback_state_response(&resp)
    }

    async fn start_playback(
        &self,
        device_id: &str,
        context: Option<PlayContext>,
    ) -> Result<(), UpstreamError> {
        let req = self.build_start_playback_request(device_id, context.as_ref())?;
        let resp = self.execute(req).await?;
        parse_command_response(&resp)
    }

    async fn pause_playback(&self, device_id: &str) -> Result<(), UpstreamError> {
        let resp = self.execute(self.build_pause_request(device_id)?).await?;
        parse_command_response(&resp)
    }

    async fn available_devices(&self) -> Result<Vec<Device>, UpstreamError> {
        let resp = self.execute(self.build_devices_request()?).await?;
        parse_json_response::<DeviceList>(&resp).map(|list| list.devices)
    }

    async fn saved_albums(
        &self,
        limit: u32,
        market: &str,
    ) -> Result<SavedAlbumsPage, UpstreamError> {
        let resp = self
            .execute(self.build_saved_albums_request(limit, market)?)
            .await?;
        parse_json_response(&resp)
    }

    async fn album(&self, album_id: &str, market: &str) -> Result<Album, UpstreamError> {
        let resp = self.execute(self.build_album_request(album_id, market)?).await?;
        parse_json_response(&resp)
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

fn check_status(resp: &RawResponse) -> Result<(), UpstreamError> {
    if resp.status == StatusCode::TOO_MANY_REQUESTS {
        return Err(UpstreamError::RateLimited {
            retry_after_secs: resp.retry_after_secs,
        });
    }
    if !resp.status.is_success() {
        return Err(UpstreamError::Api {
            status: resp.status.as_u16(),
            body: resp.body.clone(),
        });
    }
    Ok(())
}

pub fn parse_playback_state_response(
    resp: &RawResponse,
) -> Result<Option<PlaybackSnapshot>, UpstreamError> {
    if resp.status == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    check_status(resp)?;
    if resp.body.trim().is_empty() {
        return Ok(None);
    }
    let state: PlaybackStateResponse = serde_json::from_str(&resp.body)?;
    Ok(state.into_snapshot())
}

/// Player commands answer with a non-JSON acknowledgement; the body is never parsed.
pub fn parse_command_response(resp: &RawResponse) -> Result<(), UpstreamError> {
    check_status(resp)
}

pub fn parse_json_response<T: DeserializeOwned>(resp: &RawResponse) -> Result<T, UpstreamError> {
    check_status(resp)?;
    Ok(serde_json::from_str(&resp.body)?)
}
