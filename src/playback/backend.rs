use crate::api::models::{AuthoritativeState, Track};
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The two playback execution engines. An orthogonal axis to session state;
/// the orchestrator swaps backends only in a quiescent state, never
/// mid-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackMode {
    Remote,
    LocalPreview,
}

/// Mode-agnostic transport contract. The rest of the engine talks to
/// whichever backend is current through this seam and does not notice
/// switches.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    fn mode(&self) -> PlaybackMode;

    /// Load and start the given track at a position. Optimistic: callers
    /// update their own state before the authoritative echo arrives.
    async fn play(&self, track: &Track, position_ms: u64) -> EngineResult<()>;

    async fn pause(&self) -> EngineResult<()>;

    async fn resume(&self) -> EngineResult<()>;

    async fn seek(&self, position_ms: u64) -> EngineResult<()>;

    async fn set_volume(&self, volume: f32) -> EngineResult<()>;

    /// Latest authoritative snapshot, or None when the backend has no
    /// playback session.
    async fn state(&self) -> EngineResult<Option<AuthoritativeState>>;

    /// Whether the backend's execution target is currently active
    /// (remote device activated; the local element always is).
    async fn is_active(&self) -> bool;

    /// Skip within the backend's own context. Only meaningful where the
    /// backend keeps one (the remote player); the default is a no-op.
    async fn skip_next(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn skip_previous(&self) -> EngineResult<()> {
        Ok(())
    }
}
