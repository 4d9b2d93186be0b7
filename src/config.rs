use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Every tunable the engine uses. All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Rate limiting
    #[serde(default = "default_control_min_interval_ms")]
    pub control_min_interval_ms: u64,
    #[serde(default = "default_state_min_interval_ms")]
    pub state_min_interval_ms: u64,
    #[serde(default = "default_rate_limit_penalty_ms")]
    pub rate_limit_penalty_ms: u64,

    // Remote transport
    /// Override for the playback-control API root (tests, regional mirrors).
    #[serde(default)]
    pub remote_api_base_url: Option<String>,
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    #[serde(default = "default_state_timeout_ms")]
    pub state_timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_transfer_settle_ms")]
    pub transfer_settle_ms: u64,
    #[serde(default = "default_activation_poll_delay_ms")]
    pub activation_poll_delay_ms: u64,
    #[serde(default = "default_activation_retry_delay_ms")]
    pub activation_retry_delay_ms: u64,

    // Position smoothing
    #[serde(default = "default_jump_threshold_ms")]
    pub jump_threshold_ms: u64,
    #[serde(default = "default_seek_echo_window_ms")]
    pub seek_echo_window_ms: u64,

    // End-of-track detection
    #[serde(default = "default_action_grace_ms")]
    pub action_grace_ms: u64,
    #[serde(default = "default_ending_playing_ms")]
    pub ending_playing_ms: u64,
    #[serde(default = "default_ending_paused_ms")]
    pub ending_paused_ms: u64,
    #[serde(default = "default_min_end_detect_duration_ms")]
    pub min_end_detect_duration_ms: u64,
    #[serde(default = "default_advance_throttle_ms")]
    pub advance_throttle_ms: u64,
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,

    // Preview playback
    #[serde(default = "default_preview_duration_ms")]
    pub preview_duration_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_failed_track_cooldown_ms")]
    pub failed_track_cooldown_ms: u64,

    // Session orchestration
    #[serde(default = "default_load_guard_release_ms")]
    pub load_guard_release_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_remote_poll_interval_ms")]
    pub remote_poll_interval_ms: u64,
    #[serde(default = "default_restart_threshold_ms")]
    pub restart_threshold_ms: u64,

    // Player preferences, persisted across sessions
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
}

fn default_control_min_interval_ms() -> u64 {
    1_000
}

fn default_state_min_interval_ms() -> u64 {
    3_000
}

fn default_rate_limit_penalty_ms() -> u64 {
    5_000
}

fn default_control_timeout_ms() -> u64 {
    5_000
}

fn default_state_timeout_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    400
}

fn default_transfer_settle_ms() -> u64 {
    700
}

fn default_activation_poll_delay_ms() -> u64 {
    2_000
}

fn default_activation_retry_delay_ms() -> u64 {
    3_000
}

fn default_jump_threshold_ms() -> u64 {
    1_200
}

fn default_seek_echo_window_ms() -> u64 {
    2_200
}

fn default_action_grace_ms() -> u64 {
    1_800
}

fn default_ending_playing_ms() -> u64 {
    900
}

fn default_ending_paused_ms() -> u64 {
    250
}

fn default_min_end_detect_duration_ms() -> u64 {
    10_000
}

fn default_advance_throttle_ms() -> u64 {
    1_200
}

fn default_advance_delay_ms() -> u64 {
    200
}

fn default_preview_duration_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_ready_timeout_ms() -> u64 {
    15_000
}

fn default_failed_track_cooldown_ms() -> u64 {
    180_000
}

fn default_load_guard_release_ms() -> u64 {
    500
}

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_remote_poll_interval_ms() -> u64 {
    3_000
}

fn default_restart_threshold_ms() -> u64 {
    15_000
}

fn default_volume() -> f32 {
    1.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_min_interval_ms: default_control_min_interval_ms(),
            state_min_interval_ms: default_state_min_interval_ms(),
            rate_limit_penalty_ms: default_rate_limit_penalty_ms(),
            remote_api_base_url: None,
            control_timeout_ms: default_control_timeout_ms(),
            state_timeout_ms: default_state_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            transfer_settle_ms: default_transfer_settle_ms(),
            activation_poll_delay_ms: default_activation_poll_delay_ms(),
            activation_retry_delay_ms: default_activation_retry_delay_ms(),
            jump_threshold_ms: default_jump_threshold_ms(),
            seek_echo_window_ms: default_seek_echo_window_ms(),
            action_grace_ms: default_action_grace_ms(),
            ending_playing_ms: default_ending_playing_ms(),
            ending_paused_ms: default_ending_paused_ms(),
            min_end_detect_duration_ms: default_min_end_detect_duration_ms(),
            advance_throttle_ms: default_advance_throttle_ms(),
            advance_delay_ms: default_advance_delay_ms(),
            preview_duration_ms: default_preview_duration_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            failed_track_cooldown_ms: default_failed_track_cooldown_ms(),
            load_guard_release_ms: default_load_guard_release_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            remote_poll_interval_ms: default_remote_poll_interval_ms(),
            restart_threshold_ms: default_restart_threshold_ms(),
            volume: default_volume(),
            muted: false,
        }
    }
}

impl EngineConfig {
    pub fn config_dir() -> EngineResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Cannot find home directory".into()))?;
        Ok(home.join(".jamsync"))
    }

    pub fn config_path() -> EngineResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load() -> EngineResult<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> EngineResult<()> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir)?;
        let path = Self::config_path()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }

    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_windows() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.state_min_interval_ms, 3_000);
        assert_eq!(cfg.control_min_interval_ms, 1_000);
        assert_eq!(cfg.rate_limit_penalty_ms, 5_000);
        assert_eq!(cfg.transfer_settle_ms, 700);
        assert_eq!(cfg.jump_threshold_ms, 1_200);
        assert_eq!(cfg.seek_echo_window_ms, 2_200);
        assert_eq!(cfg.action_grace_ms, 1_800);
        assert_eq!(cfg.preview_duration_ms, 30_000);
        assert_eq!(cfg.volume, 1.0);
        assert!(!cfg.muted);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"volume":0.5,"muted":true}"#).unwrap();
        assert_eq!(cfg.volume, 0.5);
        assert!(cfg.muted);
        assert_eq!(cfg.effective_volume(), 0.0);
        assert_eq!(cfg.ending_playing_ms, 900);
    }
}
