use crate::api::models::AuthoritativeState;
use std::time::Duration;
use tokio::time::Instant;

/// Timestamps of the most recent user pause and seek. End-of-track detection
/// and stale-position adoption are suppressed for a short window after either.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserActionMemory {
    last_pause: Option<Instant>,
    last_seek: Option<Instant>,
}

impl UserActionMemory {
    pub fn note_pause(&mut self, now: Instant) {
        self.last_pause = Some(now);
    }

    pub fn note_seek(&mut self, now: Instant) {
        self.last_seek = Some(now);
    }

    pub fn seek_within(&self, window: Duration, now: Instant) -> bool {
        matches!(self.last_seek, Some(at) if now.saturating_duration_since(at) < window)
    }

    pub fn any_within(&self, window: Duration, now: Instant) -> bool {
        let hit = |at: Option<Instant>| {
            matches!(at, Some(at) if now.saturating_duration_since(at) < window)
        };
        hit(self.last_pause) || hit(self.last_seek)
    }
}

/// Converts infrequent authoritative snapshots into a continuously advancing
/// position estimate.
///
/// Holds `(base_position, base_at)`; the smoothed position is
/// `min(duration, base + (now - base_at))` while playing and frozen at the
/// base while paused. Every method takes `now` so tests inject time.
#[derive(Debug)]
pub struct PositionClock {
    base_ms: u64,
    base_at: Instant,
    playing: bool,
    duration_ms: u64,
    jump_threshold: Duration,
    seek_echo_window: Duration,
    suppress_one_tick: bool,
}

impl PositionClock {
    pub fn new(jump_threshold: Duration, seek_echo_window: Duration, now: Instant) -> Self {
        Self {
            base_ms: 0,
            base_at: now,
            playing: false,
            duration_ms: 0,
            jump_threshold,
            seek_echo_window,
            suppress_one_tick: false,
        }
    }

    pub fn position_ms(&self, now: Instant) -> u64 {
        if !self.playing {
            return self.base_ms;
        }
        let elapsed = now.saturating_duration_since(self.base_at).as_millis() as u64;
        let projected = self.base_ms + elapsed;
        if self.duration_ms > 0 {
            projected.min(self.duration_ms)
        } else {
            projected
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn set_duration(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// User-initiated seek: the base jumps to the target in the same tick.
    /// Stale authoritative echoes of the pre-seek position are rejected by
    /// `apply_authoritative` for the echo window.
    pub fn seek_to(&mut self, target_ms: u64, now: Instant) {
        self.base_ms = if self.duration_ms > 0 {
            target_ms.min(self.duration_ms)
        } else {
            target_ms
        };
        self.base_at = now;
    }

    /// Play/pause toggle: re-anchor the base at the current smoothed position
    /// so the tick continues without a discontinuity.
    pub fn set_playing(&mut self, playing: bool, now: Instant) {
        if playing == self.playing {
            return;
        }
        self.base_ms = self.position_ms(now);
        self.base_at = now;
        self.playing = playing;
    }

    /// New track: hard reset to zero and swallow one frame so the UI never
    /// shows the previous track's position counting down.
    pub fn track_changed(&mut self, duration_ms: u64, now: Instant) {
        self.base_ms = 0;
        self.base_at = now;
        self.duration_ms = duration_ms;
        self.suppress_one_tick = true;
    }

    /// Whether the next frame tick should be skipped. Reading consumes the
    /// suppression.
    pub fn take_tick_suppression(&mut self) -> bool {
        std::mem::take(&mut self.suppress_one_tick)
    }

    /// Single rebase function for authoritative snapshots from either origin
    /// (poll or push).
    ///
    /// Priority: a recent user seek wins over any snapshot; paused snapshots
    /// are trusted exactly; playing snapshots are adopted only when they
    /// disagree with the smoothed position by more than the jump threshold.
    pub fn apply_authoritative(
        &mut self,
        auth: &AuthoritativeState,
        actions: &UserActionMemory,
        now: Instant,
    ) {
        if auth.duration_ms > 0 {
            self.duration_ms = auth.duration_ms;
        }

        // Keep the play/pause axis in sync first; the re-anchor keeps the
        // position continuous across the flip.
        self.set_playing(!auth.is_paused, now);

        if actions.seek_within(self.seek_echo_window, now) {
            // Echo of the pre-seek state; adopting it would snap the
            // scrubber back.
            return;
        }

        let auth_pos = auth.position_at(now);
        if auth.is_paused {
            self.base_ms = auth_pos;
            self.base_at = now;
            return;
        }

        let current = self.position_ms(now);
        if current.abs_diff(auth_pos) > self.jump_threshold.as_millis() as u64 {
            log::debug!(
                "[clock] rebase: smoothed={}ms authoritative={}ms",
                current,
                auth_pos
            );
            self.base_ms = auth_pos;
            self.base_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JUMP: Duration = Duration::from_millis(1_200);
    const ECHO: Duration = Duration::from_millis(2_200);

    fn clock(now: Instant) -> PositionClock {
        PositionClock::new(JUMP, ECHO, now)
    }

    fn snapshot(position_ms: u64, duration_ms: u64, paused: bool, at: Instant) -> AuthoritativeState {
        AuthoritativeState::new(None, position_ms, duration_ms, paused, at)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn smoothed_position_is_monotonic_and_clamped() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        c.apply_authoritative(
            &snapshot(195_000, 200_000, false, t0),
            &UserActionMemory::default(),
            t0,
        );

        let mut last = 0;
        for step in 0..100 {
            let now = t0 + ms(step * 100);
            let pos = c.position_ms(now);
            assert!(pos >= last, "position went backwards at step {}", step);
            assert!(pos <= 200_000, "position exceeded duration");
            last = pos;
        }
        assert_eq!(c.position_ms(t0 + ms(60_000)), 200_000);
    }

    #[test]
    fn paused_position_is_frozen() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        c.apply_authoritative(
            &snapshot(42_000, 200_000, true, t0),
            &UserActionMemory::default(),
            t0,
        );
        assert_eq!(c.position_ms(t0 + ms(5_000)), 42_000);
    }

    #[test]
    fn seek_applies_within_same_tick_and_rejects_stale_echo() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        let mut actions = UserActionMemory::default();
        c.apply_authoritative(&snapshot(60_000, 200_000, false, t0), &actions, t0);

        // User seeks to 5000 at t0+1s
        let seek_at = t0 + ms(1_000);
        actions.note_seek(seek_at);
        c.seek_to(5_000, seek_at);
        assert_eq!(c.position_ms(seek_at), 5_000);

        // A stale echo of the pre-seek position arrives 800ms later
        let echo_at = seek_at + ms(800);
        c.apply_authoritative(&snapshot(61_800, 200_000, false, echo_at), &actions, echo_at);
        assert_eq!(c.position_ms(echo_at), 5_800);

        // After the echo window the authority is adopted again
        let later = seek_at + ms(3_000);
        c.apply_authoritative(&snapshot(90_000, 200_000, false, later), &actions, later);
        assert_eq!(c.position_ms(later), 90_000);
    }

    #[test]
    fn small_disagreements_do_not_rebase() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        let actions = UserActionMemory::default();
        c.apply_authoritative(&snapshot(10_000, 200_000, false, t0), &actions, t0);

        // 500ms of disagreement stays under the jump threshold
        let now = t0 + ms(2_000);
        c.apply_authoritative(&snapshot(12_500, 200_000, false, now), &actions, now);
        assert_eq!(c.position_ms(now), 12_000);

        // 5s of disagreement rebases
        let now = t0 + ms(4_000);
        c.apply_authoritative(&snapshot(19_000, 200_000, false, now), &actions, now);
        assert_eq!(c.position_ms(now), 19_000);
    }

    #[test]
    fn toggle_reanchors_without_discontinuity() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        let actions = UserActionMemory::default();
        c.apply_authoritative(&snapshot(10_000, 200_000, false, t0), &actions, t0);

        let pause_at = t0 + ms(3_000);
        c.set_playing(false, pause_at);
        assert_eq!(c.position_ms(pause_at + ms(10_000)), 13_000);

        let resume_at = pause_at + ms(10_000);
        c.set_playing(true, resume_at);
        assert_eq!(c.position_ms(resume_at + ms(1_000)), 14_000);
    }

    #[test]
    fn track_change_resets_and_suppresses_one_tick() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        let actions = UserActionMemory::default();
        c.apply_authoritative(&snapshot(150_000, 200_000, false, t0), &actions, t0);

        c.track_changed(180_000, t0 + ms(500));
        assert_eq!(c.position_ms(t0 + ms(500)), 0);
        assert_eq!(c.duration_ms(), 180_000);
        assert!(c.take_tick_suppression());
        assert!(!c.take_tick_suppression());
    }

    #[test]
    fn paused_snapshots_are_trusted_exactly() {
        let t0 = Instant::now();
        let mut c = clock(t0);
        let actions = UserActionMemory::default();
        c.apply_authoritative(&snapshot(10_000, 200_000, false, t0), &actions, t0);

        // Even a sub-threshold difference is adopted once paused
        let now = t0 + ms(1_000);
        c.apply_authoritative(&snapshot(11_300, 200_000, true, now), &actions, now);
        assert_eq!(c.position_ms(now), 11_300);
        assert!(!c.is_playing());
    }
}
