use crate::playback::backend::PlaybackMode;
use serde::Serialize;

pub const PLAYBACK_PROGRESS: &str = "playback:progress";
pub const PLAYBACK_TRACK_CHANGED: &str = "playback:track-changed";
pub const PLAYBACK_STATE_CHANGED: &str = "playback:state-changed";
pub const PLAYBACK_TRACK_ENDED: &str = "playback:track-ended";
pub const PLAYBACK_QUEUE_CHANGED: &str = "playback:queue-changed";
pub const SESSION_MODE_CHANGED: &str = "session:mode-changed";
pub const SESSION_ERROR: &str = "session:error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub position_fraction: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackChangedPayload {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub duration_ms: u64,
    pub album_art_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedPayload {
    pub state: PlaybackState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueChangedPayload {
    pub order: Vec<usize>,
    pub current_index: usize,
    pub shuffled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChangedPayload {
    pub mode: PlaybackMode,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

/// One event stream for the UI layer, delivered over a broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    Progress(ProgressPayload),
    TrackChanged(TrackChangedPayload),
    StateChanged(StateChangedPayload),
    TrackEnded { track_id: String },
    QueueChanged(QueueChangedPayload),
    ModeChanged(ModeChangedPayload),
    Error(ErrorPayload),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Progress(_) => PLAYBACK_PROGRESS,
            SessionEvent::TrackChanged(_) => PLAYBACK_TRACK_CHANGED,
            SessionEvent::StateChanged(_) => PLAYBACK_STATE_CHANGED,
            SessionEvent::TrackEnded { .. } => PLAYBACK_TRACK_ENDED,
            SessionEvent::QueueChanged(_) => PLAYBACK_QUEUE_CHANGED,
            SessionEvent::ModeChanged(_) => SESSION_MODE_CHANGED,
            SessionEvent::Error(_) => SESSION_ERROR,
        }
    }
}
