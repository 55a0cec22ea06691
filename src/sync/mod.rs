mod scheduler;

pub use scheduler::{RefetchScheduler, SyncPhase};

use crate::model::{FormattedPlayerState, PlaybackSnapshot};
use crate::upstream::{MediaApi, PlayContext, UpstreamError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct PlaybackChanged {
    pub snapshot: PlaybackSnapshot,
    pub formatted: FormattedPlayerState,
}

struct SyncShared {
    api: Arc<dyn MediaApi>,
    current: RwLock<Option<PlaybackSnapshot>>,
    events: broadcast::Sender<PlaybackChanged>,
    // one upstream state query at a time, and events leave in poll order
    fetch_lock: Mutex<()>,
}

impl SyncShared {
    async fn refetch(&self) {
        let _fetching = self.fetch_lock.lock().await;

        let next = match self.api.playback_state().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::trace!("no track playback upstream");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "playback state fetch failed");
                return;
            }
        };

        let changed = {
            let mut current = self.current.write();
            let changed = current
                .as_ref()
                .map_or(true, |previous| next.differs_from(previous));
            *current = Some(next.clone());
            changed
        };

        if changed {
            tracing::info!(
                track_uri = %next.track_uri(),
                is_playing = next.is_playing,
                "playback state changed"
            );
            let event = PlaybackChanged {
                formatted: next.formatted(),
                snapshot: next,
            };
            // no subscribers is fine
            let _ = self.events.send(event);
        }
    }
}

#[derive(Clone)]
pub struct PlaybackSync {
    shared: Arc<SyncShared>,
    scheduler: Arc<RefetchScheduler>,
}

impl PlaybackSync {
    pub fn new(api: Arc<dyn MediaApi>, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(SyncShared {
                api,
                current: RwLock::new(None),
                events,
                fetch_lock: Mutex::new(()),
            }),
            scheduler: Arc::new(RefetchScheduler::new(interval)),
        }
    }

    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        self.scheduler.start(move || {
            let shared = Arc::clone(&shared);
            async move { shared.refetch().await }
        });
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn phase(&self) -> SyncPhase {
        self.scheduler.phase()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackChanged> {
        self.shared.events.subscribe()
    }

    pub fn current_state(&self) -> Option<PlaybackSnapshot> {
        self.shared.current.read().clone()
    }

    pub fn formatted_state(&self) -> Option<FormattedPlayerState> {
        self.current_state().as_ref().map(PlaybackSnapshot::formatted)
    }

    pub async fn refetch(&self) {
        self.shared.refetch().await;
    }

    pub async fn set_playing(&self, playing: bool) -> Result<(), UpstreamError> {
        let Some(device_id) = self.active_device() else {
            tracing::debug!(playing, "no known device; ignoring play/pause");
            return Ok(());
        };

        if playing {
            self.shared.api.start_playback(&device_id, None).await?;
        } else {
            self.shared.api.pause_playback(&device_id).await?;
        }
        self.resync().await;
        Ok(())
    }

    pub async fn play_uri(
        &self,
        context_uri: &str,
        skip_to_uri: Option<String>,
    ) -> Result<(), UpstreamError> {
        let Some(device_id) = self.active_device() else {
            tracing::debug!(context_uri, "no known device; ignoring play_uri");
            return Ok(());
        };

        let context = PlayContext::new(context_uri, skip_to_uri);
        self.shared
            .api
            .start_playback(&device_id, Some(context))
            .await?;
        self.resync().await;
        Ok(())
    }

    fn active_device(&self) -> Option<String> {
        self.shared
            .current
            .read()
            .as_ref()
            .and_then(|snapshot| snapshot.device_id().map(str::to_string))
    }

    async fn resync(&self) {
        if !self.scheduler.refetch_now() {
            self.shared.refetch().await;
        }
    }
}
