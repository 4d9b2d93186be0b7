use crate::config::EngineConfig;
use crate::playback::clock::UserActionMemory;
use std::time::Duration;
use tokio::time::Instant;

/// Decides when a track has ended and the queue should auto-advance.
///
/// "Ended" is ambiguous across backends: some pause exactly at the end
/// instead of firing a terminal event, and authoritative positions lag. The
/// detector watches the smoothed position and fires at most once per track
/// instance.
pub struct EndOfTrackDetector {
    fired_for: Option<String>,
    last_fired_at: Option<Instant>,
    ending_playing: Duration,
    ending_paused: Duration,
    min_duration: Duration,
    grace: Duration,
    throttle: Duration,
}

impl EndOfTrackDetector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fired_for: None,
            last_fired_at: None,
            ending_playing: Duration::from_millis(config.ending_playing_ms),
            ending_paused: Duration::from_millis(config.ending_paused_ms),
            min_duration: Duration::from_millis(config.min_end_detect_duration_ms),
            grace: Duration::from_millis(config.action_grace_ms),
            throttle: Duration::from_millis(config.advance_throttle_ms),
        }
    }

    /// Forget the fired mark when a new track starts, so the new instance can
    /// end too.
    pub fn track_changed(&mut self, track_id: &str) {
        if self.fired_for.as_deref() != Some(track_id) {
            self.fired_for = None;
        }
    }

    /// Returns true exactly once per track instance when the ending
    /// conditions hold. The caller schedules the actual advance.
    pub fn check(
        &mut self,
        track_id: &str,
        duration_ms: u64,
        position_ms: u64,
        playing: bool,
        actions: &UserActionMemory,
        now: Instant,
    ) -> bool {
        if self.fired_for.as_deref() == Some(track_id) {
            return false;
        }
        if actions.any_within(self.grace, now) {
            // A user just paused or scrubbed; whatever this looks like, it is
            // not the track ending.
            return false;
        }
        if let Some(at) = self.last_fired_at {
            if now.saturating_duration_since(at) < self.throttle {
                return false;
            }
        }
        if duration_ms == 0 {
            return false;
        }

        let remaining = Duration::from_millis(duration_ms.saturating_sub(position_ms));
        let ending = if playing {
            // Short clips produce false positives near their whole length
            duration_ms > self.min_duration.as_millis() as u64 && remaining <= self.ending_playing
        } else {
            // Covers backends that pause exactly at track end
            remaining <= self.ending_paused
        };

        if ending {
            log::info!(
                "[end-detect] track {} ending: {}ms of {}ms, playing={}",
                track_id,
                position_ms,
                duration_ms,
                playing
            );
            self.fired_for = Some(track_id.to_string());
            self.last_fired_at = Some(now);
        }
        ending
    }
}
