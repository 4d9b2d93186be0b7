use crate::config::EngineConfig;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Logical endpoint classes with independent call spacing.
///
/// State polls are expensive on the provider side and get a wider interval
/// than control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    PlayerState,
    Control,
}

struct LimiterState {
    last_call: HashMap<Endpoint, Instant>,
    cooldown_until: Option<Instant>,
}

/// Enforces minimum inter-call spacing per endpoint plus one global cooldown
/// window armed after any rate-limit rejection.
///
/// The provider enforces 429s per credential, not per call site, so the
/// cooldown is shared across all endpoints. State is process-lifetime only.
/// `acquire` never fails; callers simply wait longer.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    control_interval: Duration,
    state_interval: Duration,
    penalty: Duration,
}

impl RateLimiter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                last_call: HashMap::new(),
                cooldown_until: None,
            }),
            control_interval: Duration::from_millis(config.control_min_interval_ms),
            state_interval: Duration::from_millis(config.state_min_interval_ms),
            penalty: Duration::from_millis(config.rate_limit_penalty_ms),
        }
    }

    pub fn min_interval(&self, endpoint: Endpoint) -> Duration {
        match endpoint {
            Endpoint::PlayerState => self.state_interval,
            Endpoint::Control => self.control_interval,
        }
    }

    /// Waits (as a timer, no thread consumed) until both the global cooldown
    /// and this endpoint's spacing allow a call, then records the call slot.
    pub async fn acquire(&self, endpoint: Endpoint) {
        loop {
            let ready_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let mut ready_at = now;
                if let Some(cooldown) = state.cooldown_until {
                    ready_at = ready_at.max(cooldown);
                }
                if let Some(last) = state.last_call.get(&endpoint) {
                    ready_at = ready_at.max(*last + self.min_interval(endpoint));
                }
                if ready_at <= now {
                    state.last_call.insert(endpoint, now);
                    return;
                }
                ready_at
            };
            sleep_until(ready_at).await;
            // Re-check: another caller may have taken the slot, or a 429 may
            // have armed a new cooldown while we slept.
        }
    }

    /// Arms the shared cooldown after a 429, regardless of which endpoint
    /// triggered it.
    pub async fn report_rate_limited(&self) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + self.penalty;
        state.cooldown_until = Some(until);
        log::warn!(
            "[rate-limit] provider cooldown armed for {}ms",
            self.penalty.as_millis()
        );
    }

    pub async fn in_cooldown(&self) -> bool {
        let state = self.state.lock().await;
        matches!(state.cooldown_until, Some(until) if until > Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&EngineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquire_waits_min_interval() {
        let rl = limiter();
        let start = Instant::now();
        rl.acquire(Endpoint::Control).await;
        rl.acquire(Endpoint::Control).await;
        assert!(start.elapsed() >= rl.min_interval(Endpoint::Control));
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_do_not_serialize_each_other() {
        let rl = limiter();
        let start = Instant::now();
        rl.acquire(Endpoint::Control).await;
        rl.acquire(Endpoint::PlayerState).await;
        // Different keys: no spacing applies between them.
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn state_polls_are_spaced_wider_than_control() {
        let rl = limiter();
        rl.acquire(Endpoint::PlayerState).await;
        let start = Instant::now();
        rl.acquire(Endpoint::PlayerState).await;
        assert!(start.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_every_endpoint() {
        let rl = limiter();
        rl.report_rate_limited().await;
        assert!(rl.in_cooldown().await);

        let start = Instant::now();
        rl.acquire(Endpoint::Control).await;
        assert!(start.elapsed() >= Duration::from_millis(5_000));

        // A fresh endpoint key is equally blocked while cooling down.
        rl.report_rate_limited().await;
        let start = Instant::now();
        rl.acquire(Endpoint::PlayerState).await;
        assert!(start.elapsed() >= Duration::from_millis(5_000));
    }
}
