use crate::api::client::RemoteClient;
use crate::api::models::{AuthoritativeState, Track};
use crate::error::{EngineError, EngineResult};
use crate::playback::backend::{PlaybackBackend, PlaybackMode};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// `PlaybackBackend` over the remote playback-control API.
///
/// Keeps the device-activation bookkeeping: `play` on an inactive device goes
/// through transfer + settle inside the client, then the activation is
/// confirmed here with the delayed state polls, since transfer offers no
/// synchronous completion signal.
pub struct RemoteBackend {
    client: Arc<RemoteClient>,
    /// Whether our device was last seen active on the provider side.
    device_active: AtomicBool,
    /// Set after the first successful API contact.
    ready: AtomicBool,
}

impl RemoteBackend {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            device_active: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn note_contact(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    fn track_uri(track: &Track) -> EngineResult<String> {
        track.provider_uri().ok_or_else(|| {
            EngineError::NotFound(format!("track {} has no provider id", track.id))
        })
    }
}

#[async_trait]
impl PlaybackBackend for RemoteBackend {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::Remote
    }

    async fn play(&self, track: &Track, position_ms: u64) -> EngineResult<()> {
        let uri = Self::track_uri(track)?;
        let was_active = self.device_active.load(Ordering::Relaxed);

        let ack = match self.client.play(&uri, position_ms, was_active).await {
            Ok(ack) => ack,
            Err(EngineError::DeviceNotActive) if was_active => {
                // Our activation knowledge was stale: transfer and retry once.
                log::warn!("[remote] device lost activation, transferring and retrying");
                self.device_active.store(false, Ordering::Relaxed);
                self.client.play(&uri, position_ms, false).await?
            }
            Err(e) => return Err(e),
        };
        self.note_contact();
        if !ack.confirmed {
            log::warn!(
                "[remote] play for {} proceeding unconfirmed (command {})",
                track.id,
                ack.command_id
            );
        }

        if !was_active {
            match self.client.await_activation().await {
                Ok(active) => {
                    self.device_active.store(active, Ordering::Relaxed);
                    if !active {
                        log::warn!("[remote] device did not report active after transfer");
                    }
                }
                Err(e) => log::warn!("[remote] activation confirmation failed: {}", e),
            }
        }
        Ok(())
    }

    async fn pause(&self) -> EngineResult<()> {
        self.client.toggle_play(false).await?;
        self.note_contact();
        Ok(())
    }

    async fn resume(&self) -> EngineResult<()> {
        self.client.toggle_play(true).await?;
        self.note_contact();
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        self.client.seek(position_ms).await?;
        self.note_contact();
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> EngineResult<()> {
        self.client.set_volume(volume).await?;
        self.note_contact();
        Ok(())
    }

    async fn state(&self) -> EngineResult<Option<AuthoritativeState>> {
        let state = self.client.get_state().await?;
        self.note_contact();

        let Some(state) = state else {
            return Ok(None);
        };

        if let Some(device) = &state.device {
            let ours = device.id.as_deref() == Some(self.client.device_id());
            self.device_active
                .store(ours && device.is_active, Ordering::Relaxed);
        }

        let duration = state
            .item
            .as_ref()
            .and_then(|item| item.duration_ms)
            .unwrap_or(0);
        Ok(Some(AuthoritativeState::new(
            state.item.map(|item| item.uri),
            state.progress_ms.unwrap_or(0),
            duration,
            !state.is_playing,
            Instant::now(),
        )))
    }

    async fn is_active(&self) -> bool {
        self.device_active.load(Ordering::Relaxed)
    }

    async fn skip_next(&self) -> EngineResult<()> {
        self.client.next().await?;
        Ok(())
    }

    async fn skip_previous(&self) -> EngineResult<()> {
        self.client.previous().await?;
        Ok(())
    }
}
