use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Immutable-per-session view of a votable track.
///
/// `vote_score` is owned by the vote store and read-only here; the ranking
/// features are optional metadata used by the weighted shuffle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    /// Streaming-provider track id. Absent means "not remotely playable".
    pub provider_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub album_art_url: Option<String>,
    #[serde(default)]
    pub vote_score: i64,
    pub tempo: Option<f64>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub preview_url: Option<String>,
}

impl Track {
    pub fn remotely_playable(&self) -> bool {
        self.provider_id.is_some()
    }

    /// A preview is locatable by search even without a stored URL,
    /// as long as both title and artist are known.
    pub fn preview_playable(&self) -> bool {
        !self.title.is_empty() && !self.artist.is_empty()
    }

    pub fn provider_uri(&self) -> Option<String> {
        self.provider_id.as_ref().map(|id| format!("spotify:track:{}", id))
    }
}

/// The metric the room is currently ranking by; biases the weighted shuffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    Votes,
    Tempo,
    Energy,
    Danceability,
}

impl RankMetric {
    pub fn feature_of(&self, track: &Track) -> Option<f64> {
        match self {
            RankMetric::Votes => None,
            RankMetric::Tempo => track.tempo,
            RankMetric::Energy => track.energy,
            RankMetric::Danceability => track.danceability,
        }
    }
}

/// Last confirmed playback snapshot from whichever backend is active.
///
/// One shape regardless of origin (poll or push); a single rebase function
/// consumes it. Superseded whenever a newer snapshot arrives or a user action
/// invalidates it.
#[derive(Debug, Clone)]
pub struct AuthoritativeState {
    /// Backend's identity for the playing item (provider URI or track id).
    pub track_ref: Option<String>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_paused: bool,
    pub received_at: DateTime<Utc>,
    /// Monotonic receipt time, for extrapolation between snapshots.
    pub received_instant: Instant,
}

impl AuthoritativeState {
    pub fn new(
        track_ref: Option<String>,
        position_ms: u64,
        duration_ms: u64,
        is_paused: bool,
        now: Instant,
    ) -> Self {
        Self {
            track_ref,
            position_ms,
            duration_ms,
            is_paused,
            received_at: Utc::now(),
            received_instant: now,
        }
    }

    /// Position this snapshot implies at `now`, extrapolated while playing.
    pub fn position_at(&self, now: Instant) -> u64 {
        if self.is_paused {
            return self.position_ms;
        }
        let elapsed = now.saturating_duration_since(self.received_instant);
        let projected = self.position_ms + elapsed.as_millis() as u64;
        if self.duration_ms > 0 {
            projected.min(self.duration_ms)
        } else {
            projected
        }
    }
}

// Wire types for the remote playback-control API's state document.

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePlayerState {
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub item: Option<RemoteItem>,
    #[serde(default)]
    pub device: Option<RemoteDevice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteItem {
    pub uri: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteDevice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub volume_percent: Option<u8>,
}
