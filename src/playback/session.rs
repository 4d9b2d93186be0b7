use crate::api::client::RemoteClient;
use crate::api::models::{AuthoritativeState, RankMetric, Track};
use crate::api::rate_limit::RateLimiter;
use crate::api::token::TokenProvider;
use crate::audio::preview::{LocalPreviewBackend, PreviewSearch};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{
    ErrorPayload, PlaybackState, ProgressPayload, QueueChangedPayload, SessionEvent,
    StateChangedPayload, TrackChangedPayload,
};
use crate::playback::backend::{PlaybackBackend, PlaybackMode};
use crate::playback::clock::{PositionClock, UserActionMemory};
use crate::playback::end_detect::EndOfTrackDetector;
use crate::playback::queue::{PlayQueue, QueueView};
use crate::playback::remote::RemoteBackend;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Read-only view of the whole session for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub mode: PlaybackMode,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub queue: QueueView,
    pub backend_ready: bool,
    pub backend_active: bool,
    pub last_error: Option<String>,
}

struct SessionInner {
    id: Uuid,
    config: EngineConfig,
    tracks: RwLock<Vec<Track>>,
    queue: RwLock<PlayQueue>,
    clock: RwLock<PositionClock>,
    actions: RwLock<UserActionMemory>,
    detector: Mutex<EndOfTrackDetector>,
    state: RwLock<PlaybackState>,
    last_error: RwLock<Option<String>>,
    mode: RwLock<PlaybackMode>,
    remote: Arc<RemoteBackend>,
    local: Arc<LocalPreviewBackend>,
    /// Re-entrancy guard: one load-and-play sequence in flight at a time.
    loading: AtomicBool,
    /// One scheduled auto-advance at a time.
    advance_pending: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    volume: RwLock<f32>,
}

/// The orchestrator: owns the queue, the position model, end-of-track
/// detection and both backends behind one mode-agnostic contract.
///
/// States: Idle -> Loading -> Playing <-> Paused -> Loading(next) ..., with
/// Error reachable from any state and recoverable back to Idle. Nothing here
/// is fatal to the process; failures resolve to a visible, recoverable state
/// with queue and position intact.
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl PlaybackSession {
    pub fn new(
        config: EngineConfig,
        tokens: Arc<dyn TokenProvider>,
        search: Arc<dyn PreviewSearch>,
        device_id: impl Into<String>,
    ) -> EngineResult<Self> {
        let limiter = Arc::new(RateLimiter::new(&config));
        let client = Arc::new(RemoteClient::new(&config, Arc::clone(&limiter), tokens, device_id)?);
        let remote = Arc::new(RemoteBackend::new(client));
        let local = Arc::new(LocalPreviewBackend::new(&config, search)?);

        let (events, _) = broadcast::channel(256);
        let now = Instant::now();
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            tracks: RwLock::new(Vec::new()),
            queue: RwLock::new(PlayQueue::new(RankMetric::Votes)),
            clock: RwLock::new(PositionClock::new(
                Duration::from_millis(config.jump_threshold_ms),
                Duration::from_millis(config.seek_echo_window_ms),
                now,
            )),
            actions: RwLock::new(UserActionMemory::default()),
            detector: Mutex::new(EndOfTrackDetector::new(&config)),
            state: RwLock::new(PlaybackState::Idle),
            last_error: RwLock::new(None),
            mode: RwLock::new(PlaybackMode::Remote),
            remote,
            local,
            loading: AtomicBool::new(false),
            advance_pending: AtomicBool::new(false),
            events,
            volume: RwLock::new(config.effective_volume()),
            config,
        });

        let mut session = Self {
            inner,
            tasks: Vec::new(),
        };
        session.spawn_loops();
        log::info!("[session {}] created", session.inner.id);
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Install (or refresh) the room's track list. Safe to call while a
    /// session is in progress: the queue keeps its order and position when
    /// only vote scores changed.
    pub async fn set_tracks(&self, tracks: Vec<Track>) {
        *self.inner.tracks.write().await = tracks;
        self.inner.rebuild_queue().await;
        self.inner.emit_queue().await;
    }

    pub async fn set_metric(&self, metric: RankMetric) {
        self.inner.queue.write().await.set_metric(metric);
    }

    /// Play a queue position, or resume when called with no index while the
    /// current track is paused. Guarded so rapid double-clicks cannot issue
    /// two concurrent load-and-play sequences.
    pub async fn play(&self, index: Option<usize>) -> EngineResult<()> {
        let inner = &self.inner;

        if index.is_none() && *inner.state.read().await == PlaybackState::Paused {
            if inner.queue.read().await.current_track().is_some() {
                let backend = inner.backend().await;
                if let Err(e) = backend.resume().await {
                    inner.enter_error(&e).await;
                    return Err(e);
                }
                let now = Instant::now();
                inner.clock.write().await.set_playing(true, now);
                inner.set_state(PlaybackState::Playing).await;
                return Ok(());
            }
        }

        if let Some(position) = index {
            if !inner.queue.write().await.jump_to(position) {
                return Err(EngineError::NotFound(format!(
                    "queue position {} out of range",
                    position
                )));
            }
        }

        match SessionInner::load_current(inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.enter_error(&e).await;
                Err(e)
            }
        }
    }

    /// Start the room's queue from the top.
    pub async fn play_all(&self) -> EngineResult<()> {
        if self.inner.queue.read().await.is_empty() {
            self.inner.rebuild_queue().await;
        }
        self.play(Some(0)).await
    }

    pub async fn pause(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let now = Instant::now();
        // Optimistic: freeze the position model before the backend confirms
        inner.actions.write().await.note_pause(now);
        inner.clock.write().await.set_playing(false, now);
        inner.set_state(PlaybackState::Paused).await;

        let backend = inner.backend().await;
        if let Err(e) = backend.pause().await {
            inner.enter_error(&e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Seek within the current track. The smoothed position jumps in the
    /// same tick; a stale echo of the pre-seek position arriving within the
    /// echo window is ignored.
    pub async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let inner = &self.inner;
        let now = Instant::now();
        inner.actions.write().await.note_seek(now);
        let (position, duration) = {
            let mut clock = inner.clock.write().await;
            clock.seek_to(position_ms, now);
            (clock.position_ms(now), clock.duration_ms())
        };
        // Emit progress immediately so the scrubber reflects the jump
        inner.emit(SessionEvent::Progress(progress_payload(position, duration)));

        let backend = inner.backend().await;
        if let Err(e) = backend.seek(position_ms).await {
            inner.enter_error(&e).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn next(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let advanced = inner.queue.write().await.advance();
        if advanced {
            inner.emit_queue().await;
            match SessionInner::load_current(inner).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    inner.enter_error(&e).await;
                    Err(e)
                }
            }
        } else if *inner.mode.read().await == PlaybackMode::Remote {
            // Nothing to advance to in our queue; defer to the remote
            // player's own context.
            let backend = inner.backend().await;
            if let Err(e) = backend.skip_next().await {
                inner.enter_error(&e).await;
                return Err(e);
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Restart the current track when well into it, otherwise step back.
    pub async fn previous(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let now = Instant::now();
        let position = inner.clock.read().await.position_ms(now);
        if position > inner.config.restart_threshold_ms {
            return self.seek(0).await;
        }

        let retreated = inner.queue.write().await.retreat();
        if retreated {
            inner.emit_queue().await;
            match SessionInner::load_current(inner).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    inner.enter_error(&e).await;
                    Err(e)
                }
            }
        } else if *inner.mode.read().await == PlaybackMode::Remote {
            let backend = inner.backend().await;
            if let Err(e) = backend.skip_previous().await {
                inner.enter_error(&e).await;
                return Err(e);
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    pub async fn set_volume(&self, volume: f32) -> EngineResult<()> {
        let inner = &self.inner;
        let volume = volume.clamp(0.0, 1.0);
        *inner.volume.write().await = volume;

        let backend = inner.backend().await;
        if let Err(e) = backend.set_volume(volume).await {
            inner.enter_error(&e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Toggle between the stable order and a weighted-shuffle permutation.
    /// Returns the new shuffle state.
    pub async fn toggle_shuffle(&self) -> bool {
        let shuffled = self.inner.queue.write().await.toggle_shuffle();
        self.inner.emit_queue().await;
        shuffled
    }

    /// Switch between remote and preview playback. Only legal from a
    /// quiescent state; a playing backend is paused first, and the queue is
    /// re-initialized against the track subset playable in the new mode.
    pub async fn switch_mode(&self, mode: PlaybackMode) -> EngineResult<()> {
        let inner = &self.inner;
        if *inner.mode.read().await == mode {
            return Ok(());
        }
        let state = *inner.state.read().await;
        if state == PlaybackState::Loading {
            return Err(EngineError::Config(
                "cannot switch playback mode while loading".into(),
            ));
        }
        if state == PlaybackState::Playing {
            let backend = inner.backend().await;
            if let Err(e) = backend.pause().await {
                log::warn!("[session {}] pause before mode switch failed: {}", inner.id, e);
            }
        }

        *inner.mode.write().await = mode;
        inner.rebuild_queue().await;
        {
            let now = Instant::now();
            let mut clock = inner.clock.write().await;
            clock.track_changed(0, now);
            clock.set_playing(false, now);
        }
        inner.set_state(PlaybackState::Idle).await;
        inner.emit(SessionEvent::ModeChanged(crate::events::ModeChangedPayload {
            mode,
        }));
        inner.emit_queue().await;
        log::info!("[session {}] switched to {:?} mode", inner.id, mode);
        Ok(())
    }

    /// Feed a push-style authoritative snapshot (state-changed notification
    /// from the provider SDK). Polled reads go through the same path.
    pub async fn ingest_remote_state(&self, auth: AuthoritativeState) {
        self.inner.ingest_snapshot(auth).await;
    }

    /// Leave the Error state, keeping queue and position intact.
    pub async fn recover(&self) {
        let inner = &self.inner;
        if *inner.state.read().await == PlaybackState::Error {
            *inner.last_error.write().await = None;
            inner.set_state(PlaybackState::Idle).await;
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = &self.inner;
        let now = Instant::now();
        let mode = *inner.mode.read().await;
        let (is_playing, position_ms, duration_ms) = {
            let clock = inner.clock.read().await;
            (clock.is_playing(), clock.position_ms(now), clock.duration_ms())
        };
        let (current_track, queue) = {
            let queue = inner.queue.read().await;
            (queue.current_track().cloned(), queue.view())
        };
        let backend = inner.backend().await;
        SessionSnapshot {
            state: *inner.state.read().await,
            mode,
            current_track,
            is_playing,
            position_ms,
            duration_ms,
            queue,
            backend_ready: match mode {
                PlaybackMode::Remote => inner.remote.is_ready(),
                PlaybackMode::LocalPreview => true,
            },
            backend_active: backend.is_active().await,
            last_error: inner.last_error.read().await.clone(),
        }
    }

    pub fn remote_client(&self) -> Arc<RemoteClient> {
        Arc::clone(self.inner.remote.client())
    }

    fn spawn_loops(&mut self) {
        // Frame tick: progress emission, local-element reconciliation and
        // end-of-track detection.
        let weak = Arc::downgrade(&self.inner);
        let tick_ms = self.inner.config.tick_interval_ms;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(tick_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                SessionInner::tick(&inner).await;
            }
        }));

        // Authoritative state poll, remote mode only. The rate limiter
        // enforces the provider-facing floor on top of this cadence.
        let weak = Arc::downgrade(&self.inner);
        let poll_ms = self.inner.config.remote_poll_interval_ms;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(poll_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                SessionInner::poll_remote(&inner).await;
            }
        }));
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl SessionInner {
    async fn backend(&self) -> Arc<dyn PlaybackBackend> {
        match *self.mode.read().await {
            PlaybackMode::Remote => Arc::clone(&self.remote) as Arc<dyn PlaybackBackend>,
            PlaybackMode::LocalPreview => Arc::clone(&self.local) as Arc<dyn PlaybackBackend>,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn emit_queue(&self) {
        let view = self.queue.read().await.view();
        self.emit(SessionEvent::QueueChanged(QueueChangedPayload {
            order: view.order,
            current_index: view.current_index,
            shuffled: view.shuffled,
        }));
    }

    async fn set_state(&self, new: PlaybackState) {
        let mut state = self.state.write().await;
        if *state != new {
            *state = new;
            drop(state);
            self.emit(SessionEvent::StateChanged(StateChangedPayload {
                state: new,
            }));
        }
    }

    async fn enter_error(&self, error: &EngineError) {
        log::error!("[session {}] {}", self.id, error);
        *self.last_error.write().await = Some(error.to_string());
        self.set_state(PlaybackState::Error).await;
        self.emit(SessionEvent::Error(ErrorPayload {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }));
    }

    /// Rebuild the queue from the subset of the room's tracks playable in
    /// the current mode.
    async fn rebuild_queue(&self) {
        let mode = *self.mode.read().await;
        let tracks = self.tracks.read().await;
        let playable: Vec<Track> = tracks
            .iter()
            .filter(|t| match mode {
                PlaybackMode::Remote => t.remotely_playable(),
                PlaybackMode::LocalPreview => t.preview_playable(),
            })
            .cloned()
            .collect();
        drop(tracks);
        self.queue.write().await.initialize(playable);
    }

    /// Load and play the queue-current track through the active backend,
    /// under the re-entrancy guard. The guard is released shortly after the
    /// call settles, covering backend-side settle delays.
    async fn load_current(inner: &Arc<Self>) -> EngineResult<()> {
        if inner
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("[session {}] load already in flight, ignoring", inner.id);
            return Ok(());
        }

        let result = Self::load_current_inner(inner).await;

        let release = Duration::from_millis(inner.config.load_guard_release_ms);
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            tokio::time::sleep(release).await;
            if let Some(inner) = weak.upgrade() {
                inner.loading.store(false, Ordering::SeqCst);
            }
        });

        result
    }

    async fn load_current_inner(inner: &Arc<Self>) -> EngineResult<()> {
        let track = inner.queue.read().await.current_track().cloned();
        let Some(track) = track else {
            inner.set_state(PlaybackState::Idle).await;
            return Ok(());
        };

        inner.set_state(PlaybackState::Loading).await;
        let backend = inner.backend().await;
        log::info!(
            "[session {}] loading {} - {} via {:?}",
            inner.id,
            track.artist,
            track.title,
            backend.mode()
        );

        backend.play(&track, 0).await?;

        // Is this still the track we meant to play? A user action may have
        // superseded this load while the backend settled.
        let still_current = inner
            .queue
            .read()
            .await
            .current_track()
            .map(|t| t.id == track.id)
            .unwrap_or(false);
        if !still_current {
            log::debug!("[session {}] load superseded, discarding result", inner.id);
            return Ok(());
        }

        let duration_ms = match backend.mode() {
            // Remote duration arrives with the first authoritative snapshot
            PlaybackMode::Remote => 0,
            PlaybackMode::LocalPreview => inner.config.preview_duration_ms,
        };
        {
            let now = Instant::now();
            let mut clock = inner.clock.write().await;
            clock.track_changed(duration_ms, now);
            clock.set_playing(true, now);
        }
        inner.detector.lock().await.track_changed(&track.id);
        *inner.last_error.write().await = None;
        inner.set_state(PlaybackState::Playing).await;

        inner.emit(SessionEvent::TrackChanged(TrackChangedPayload {
            track_id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            duration_ms,
            album_art_url: track.album_art_url.clone(),
        }));
        Ok(())
    }

    /// Single rebase path for authoritative snapshots from either origin.
    async fn ingest_snapshot(&self, auth: AuthoritativeState) {
        // Identity check: a snapshot for some other track is a stale result
        // of a superseded command, not a rebase source.
        if let Some(track_ref) = &auth.track_ref {
            let matches = {
                let queue = self.queue.read().await;
                match queue.current_track() {
                    Some(t) => {
                        t.id == *track_ref
                            || t.provider_uri().as_deref() == Some(track_ref.as_str())
                    }
                    None => false,
                }
            };
            if !matches {
                log::debug!(
                    "[session {}] ignoring snapshot for foreign track {}",
                    self.id,
                    track_ref
                );
                return;
            }
        }

        let now = Instant::now();
        let actions = *self.actions.read().await;

        // A play-flag flip right after a user pause is an echo of the
        // pre-pause state, not a remote resume.
        let grace = Duration::from_millis(self.config.action_grace_ms);
        if !auth.is_paused && !self.clock.read().await.is_playing() && actions.any_within(grace, now)
        {
            return;
        }

        let (was_playing, playing_now) = {
            let mut clock = self.clock.write().await;
            let was = clock.is_playing();
            clock.apply_authoritative(&auth, &actions, now);
            (was, clock.is_playing())
        };

        if was_playing != playing_now {
            let state = *self.state.read().await;
            if matches!(state, PlaybackState::Playing | PlaybackState::Paused) {
                self.set_state(if playing_now {
                    PlaybackState::Playing
                } else {
                    PlaybackState::Paused
                })
                .await;
            }
        }
    }

    /// One frame tick: reconcile the local element (preview mode), emit
    /// progress, and run end-of-track detection.
    async fn tick(inner: &Arc<Self>) {
        let state = *inner.state.read().await;
        if !matches!(state, PlaybackState::Playing | PlaybackState::Paused) {
            return;
        }

        if *inner.mode.read().await == PlaybackMode::LocalPreview {
            match inner.local.state().await {
                Ok(Some(auth)) => inner.ingest_snapshot(auth).await,
                Ok(None) => {}
                Err(e) => {
                    inner.enter_error(&e).await;
                    return;
                }
            }
        }

        let now = Instant::now();
        let (position_ms, duration_ms, playing, suppressed) = {
            let mut clock = inner.clock.write().await;
            (
                clock.position_ms(now),
                clock.duration_ms(),
                clock.is_playing(),
                clock.take_tick_suppression(),
            )
        };

        if playing && !suppressed {
            inner.emit(SessionEvent::Progress(progress_payload(
                position_ms,
                duration_ms,
            )));
        }

        let current = inner.queue.read().await.current_track().cloned();
        if let Some(track) = current {
            let actions = *inner.actions.read().await;
            let fired = inner.detector.lock().await.check(
                &track.id,
                duration_ms,
                position_ms,
                playing,
                &actions,
                now,
            );
            if fired {
                inner.emit(SessionEvent::TrackEnded {
                    track_id: track.id.clone(),
                });
                Self::schedule_advance(inner);
            }
        }
    }

    /// Advance after a short delay, and only when there is somewhere to
    /// advance to.
    fn schedule_advance(inner: &Arc<Self>) {
        if inner.advance_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = Duration::from_millis(inner.config.advance_delay_ms);
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.advance_pending.store(false, Ordering::SeqCst);

            if inner.queue.read().await.len() <= 1 {
                log::debug!("[session {}] track ended with nothing to advance to", inner.id);
                return;
            }
            inner.queue.write().await.advance();
            inner.emit_queue().await;
            if let Err(e) = Self::load_current(&inner).await {
                inner.enter_error(&e).await;
            }
        });
    }

    async fn poll_remote(inner: &Arc<Self>) {
        if *inner.mode.read().await != PlaybackMode::Remote {
            return;
        }
        let state = *inner.state.read().await;
        if !matches!(state, PlaybackState::Playing | PlaybackState::Paused) {
            return;
        }

        match inner.remote.state().await {
            Ok(Some(auth)) => inner.ingest_snapshot(auth).await,
            Ok(None) => {
                log::debug!("[session {}] no active remote playback session", inner.id)
            }
            Err(EngineError::RateLimited { retry_after_secs }) => {
                log::debug!(
                    "[session {}] state poll rate limited, backing off {}s",
                    inner.id,
                    retry_after_secs
                );
            }
            Err(EngineError::Unauthorized) => {
                inner.enter_error(&EngineError::Unauthorized).await;
            }
            Err(e) => {
                // Transient poll failures are absorbed; the next cycle retries
                log::warn!("[session {}] state poll failed: {}", inner.id, e);
            }
        }
    }
}

fn progress_payload(position_ms: u64, duration_ms: u64) -> ProgressPayload {
    let position_fraction = if duration_ms > 0 {
        position_ms as f64 / duration_ms as f64
    } else {
        0.0
    };
    ProgressPayload {
        position_ms,
        duration_ms,
        position_fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::token::StaticTokenProvider;
    use crate::audio::preview::{PreviewCandidate, PreviewSearch};
    use async_trait::async_trait;

    struct NoSearch;

    #[async_trait]
    impl PreviewSearch for NoSearch {
        async fn search(
            &self,
            _title: &str,
            _artist: &str,
        ) -> EngineResult<Vec<PreviewCandidate>> {
            Ok(Vec::new())
        }
    }

    fn session() -> PlaybackSession {
        PlaybackSession::new(
            EngineConfig::default(),
            Arc::new(StaticTokenProvider::new("test-token")),
            Arc::new(NoSearch),
            "device-1",
        )
        .unwrap()
    }

    fn track(id: &str, provider: Option<&str>, artist: &str, votes: i64) -> Track {
        Track {
            id: id.into(),
            provider_id: provider.map(String::from),
            title: format!("Title {}", id),
            artist: artist.into(),
            album_art_url: None,
            vote_score: votes,
            tempo: None,
            energy: None,
            danceability: None,
            preview_url: None,
        }
    }

    #[tokio::test]
    async fn fresh_session_is_idle_with_empty_queue() {
        let s = session();
        let snap = s.snapshot().await;
        assert_eq!(snap.state, PlaybackState::Idle);
        assert_eq!(snap.mode, PlaybackMode::Remote);
        assert!(snap.current_track.is_none());
        assert!(snap.queue.order.is_empty());
        assert_eq!(snap.position_ms, 0);
        assert!(snap.last_error.is_none());
        assert!(!snap.backend_active);
    }

    #[tokio::test]
    async fn set_tracks_filters_by_mode_playability() {
        let s = session();
        s.set_tracks(vec![
            track("a", Some("p-a"), "Artist A", 5),
            track("b", None, "Artist B", 3),
            track("c", Some("p-c"), "", 1),
        ])
        .await;

        // Remote mode: provider id required -> a and c
        let snap = s.snapshot().await;
        assert_eq!(snap.queue.order.len(), 2);

        // Preview mode: title+artist required -> a and b
        s.switch_mode(PlaybackMode::LocalPreview).await.unwrap();
        let snap = s.snapshot().await;
        assert_eq!(snap.mode, PlaybackMode::LocalPreview);
        assert_eq!(snap.queue.order.len(), 2);
        assert_eq!(snap.state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn vote_refresh_keeps_queue_in_place() {
        let s = session();
        s.set_tracks(vec![
            track("a", Some("p-a"), "A", 5),
            track("b", Some("p-b"), "B", 0),
            track("c", Some("p-c"), "C", -2),
        ])
        .await;
        s.toggle_shuffle().await;
        let before = s.snapshot().await.queue;

        // Same tracks, new vote counts
        s.set_tracks(vec![
            track("a", Some("p-a"), "A", 9),
            track("b", Some("p-b"), "B", 4),
            track("c", Some("p-c"), "C", 1),
        ])
        .await;
        let after = s.snapshot().await.queue;
        assert_eq!(before.order, after.order);
        assert_eq!(before.current_index, after.current_index);
        assert!(after.shuffled);
    }

    #[tokio::test]
    async fn toggle_shuffle_round_trip_restores_rotated_original() {
        let s = session();
        s.set_tracks(vec![
            track("a", Some("p-a"), "A", 4),
            track("b", Some("p-b"), "B", 3),
            track("c", Some("p-c"), "C", 2),
            track("d", Some("p-d"), "D", 1),
        ])
        .await;

        assert!(s.toggle_shuffle().await);
        assert!(!s.toggle_shuffle().await);
        let snap = s.snapshot().await;
        // Anchored at the pre-shuffle current track (index 0), the rotation
        // is the identity
        assert_eq!(snap.queue.order, vec![0, 1, 2, 3]);
        assert_eq!(snap.queue.current_index, 0);
    }

    #[tokio::test]
    async fn play_on_empty_queue_settles_to_idle() {
        let s = session();
        let result = s.play(None).await;
        assert!(result.is_ok());
        assert_eq!(s.snapshot().await.state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn play_with_out_of_range_index_is_rejected() {
        let s = session();
        s.set_tracks(vec![track("a", Some("p-a"), "A", 0)]).await;
        let err = s.play(Some(5)).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn ingest_ignores_snapshot_for_foreign_track() {
        let s = session();
        s.set_tracks(vec![track("a", Some("p-a"), "A", 0)]).await;

        let now = Instant::now();
        s.ingest_remote_state(AuthoritativeState::new(
            Some("spotify:track:someone-else".into()),
            42_000,
            200_000,
            false,
            now,
        ))
        .await;
        assert_eq!(s.snapshot().await.position_ms, 0);
    }

    #[tokio::test]
    async fn recover_clears_error_state() {
        let s = session();
        s.inner.enter_error(&EngineError::Unauthorized).await;
        assert_eq!(s.snapshot().await.state, PlaybackState::Error);
        assert!(s.snapshot().await.last_error.is_some());

        s.recover().await;
        let snap = s.snapshot().await;
        assert_eq!(snap.state, PlaybackState::Idle);
        assert!(snap.last_error.is_none());
    }

    #[tokio::test]
    async fn mode_switch_emits_events() {
        let s = session();
        let mut rx = s.subscribe();
        s.switch_mode(PlaybackMode::LocalPreview).await.unwrap();

        let mut saw_mode_change = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::ModeChanged(_)) {
                saw_mode_change = true;
            }
        }
        assert!(saw_mode_change);
    }
}
