
mod library;
mod operations;

use library::{Library, LibraryOptions};

use crate::cache::{Ttl, DEFAULT_MAX_ENTRIES};
use crate::dispatch::{CallResult, DispatchError, Router};
use crate::images::ImageStore;
use crate::model::FormattedPlayerState;
use crate::sync::{PlaybackChanged, PlaybackSync};
use crate::upstream::MediaApi;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const PLAYER_STATE: &str = "com.spotify.superbird.player_state";
const SETTINGS: &str = "settings";
const SETTINGS_RESPONSE: &str = "settings_response";

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub market: String,
    pub saved_album_limit: u32,
    pub library_ttl: Ttl,
    pub device_ttl: Ttl,
    pub cache_capacity: usize,
    pub poll_interval: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            market: "US".to_string(),
            saved_album_limit: 25,
            library_ttl: Ttl::secs(900),
            device_ttl: Ttl::secs(30),
            cache_capacity: DEFAULT_MAX_ENTRIES,
            poll_interval: Duration::from_millis(1500),
        }
    }
}

pub struct BridgeContext {
    pub library: Library,
    pub images: ImageStore,
    pub playback: PlaybackSync,
}

impl BridgeContext {
    pub fn new(api: Arc<dyn MediaApi>, images: ImageStore, options: BridgeOptions) -> Self {
        let playback = PlaybackSync::new(Arc::clone(&api), options.poll_interval);
        let library = Library::new(
            api,
            LibraryOptions {
                market: options.market,
                saved_album_limit: options.saved_album_limit,
                library_ttl: options.library_ttl,
                device_ttl: options.device_ttl,
                capacity: options.cache_capacity,
            },
        );
        Self {
            library,
            images,
            playback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: Value,
}

impl PushMessage {
    pub fn new(message_type: &str, payload: Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            payload,
        }
    }

    pub fn player_state(state: &FormattedPlayerState) -> Result<Self, serde_json::Error> {
        Ok(Self::new(PLAYER_STATE, serde_json::to_value(state)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Reply(CallResult),
    Push(PushMessage),
}

impl OutboundMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<PushMessage> for OutboundMessage {
    fn from(message: PushMessage) -> Self {
        Self::Push(message)
    }
}

#[derive(Debug, Deserialize)]
struct SettingsRequest {
    #[serde(default)]
    key: String,
}

pub struct Bridge {
    router: Router<BridgeContext>,
    context: BridgeContext,
}

impl Bridge {
    pub fn new(context: BridgeContext) -> Self {
        let mut router = Router::new();
        operations::register_all(&mut router);
        tracing::debug!(operations = ?router.operations(), "operations registered");
        Self { router, context }
    }

    pub fn start(&self) {
        self.context.playback.start();
        tracing::info!(phase = ?self.context.playback.phase(), "playback sync started");
    }

    pub fn stop(&self) {
        self.context.playback.stop();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackChanged> {
        self.context.playback.subscribe()
    }

    pub fn greeting() -> Vec<OutboundMessage> {
        vec![
            PushMessage::new("remote_control_connection_status", json!("finished")).into(),
            PushMessage::new("setup_status", json!("finished")).into(),
            PushMessage::new(
                "com.spotify.session_state",
                json!({
                    "connection_type": "wlan",
                    "is_in_forced_offline_mode": false,
                    "is_logged_in": true,
                    "is_offline": false,
                }),
            )
            .into(),
        ]
    }

    pub fn player_state_push(&self) -> Option<OutboundMessage> {
        let state = self.context.playback.formatted_state()?;
        match PushMessage::player_state(&state) {
            Ok(message) => Some(message.into()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode player state");
                None
            }
        }
    }

    /// Lists output devices once so a misconfigured account shows up in the
    /// log at startup.
    pub async fn probe_devices(&self) {
        match self.context.library.devices().await {
            Ok(devices) if devices.is_empty() => {
                tracing::warn!("no playback devices available");
            }
            Ok(devices) => {
                for device in devices {
                    tracing::info!(
                        name = %device.name,
                        kind = %device.kind,
                        active = device.is_active,
                        "playback device"
                    );
                }
            }
            Err(err) => tracing::warn!(error = %err, "device probe failed"),
        }
    }

    /// Handles one inbound text frame. Returns the message to send back, if
    /// any. Failures are logged here and never reach the remote.
    pub async fn handle_inbound_message(&self, raw: &str) -> Option<OutboundMessage> {
        let message: Value = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "inbound frame is not json");
                return None;
            }
        };

        if message.get("type").and_then(Value::as_str) == Some(SETTINGS) {
            return settings_response(message);
        }

        match self.router.dispatch(message, &self.context).await {
            Ok(reply) => reply.map(OutboundMessage::Reply),
            Err(err) => {
                log_dispatch_error(&err);
                None
            }
        }
    }
}

fn settings_response(message: Value) -> Option<OutboundMessage> {
    let request: SettingsRequest = serde_json::from_value(message).ok()?;
    let value = match request.key.as_str() {
        "onboarding_status" => "finished",
        "local-storage-data" => "{}",
        other => {
            tracing::debug!(key = other, "ignoring settings request");
            return None;
        }
    };
    Some(
        PushMessage::new(
            SETTINGS_RESPONSE,
            json!({ "key": request.key, "value": value }),
        )
        .into(),
    )
}

fn log_dispatch_error(err: &DispatchError) {
    match err {
        DispatchError::Malformed(_) | DispatchError::InvalidArgs { .. } => {
            tracing::debug!(error = %err, "request rejected");
        }
        DispatchError::UnknownOperation(operation) => {
            tracing::info!(operation = %operation, "unknown operation");
        }
        DispatchError::Handler { .. } | DispatchError::Panicked { .. } => {
            tracing::warn!(error = %err, "operation failed");
        }
    }
}
