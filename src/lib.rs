pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;

pub use api::client::{ControlAck, RemoteClient};
pub use api::models::{AuthoritativeState, RankMetric, Track};
pub use api::rate_limit::{Endpoint, RateLimiter};
pub use api::token::{StaticTokenProvider, TokenProvider};
pub use audio::preview::{
    ItunesPreviewSearch, LocalPreviewBackend, PreviewCandidate, PreviewSearch,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use events::{PlaybackState, SessionEvent};
pub use playback::backend::{PlaybackBackend, PlaybackMode};
pub use playback::session::{PlaybackSession, SessionSnapshot};

/// Console logging for binaries and examples embedding the engine.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("jamsync=info"),
    )
    .try_init();
}
