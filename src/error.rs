use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited by provider, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("bearer token rejected")]
    Unauthorized,

    #[error("no active playback device")]
    DeviceNotActive,

    #[error("network timeout")]
    NetworkTimeout,

    #[error("playback API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("no playable preview for \"{title}\" by {artist}")]
    NoPlayableUrl { title: String, artist: String },

    #[error("audio error: {0}")]
    Audio(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("EngineError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Http(_) => "http",
            EngineError::Json(_) => "json",
            EngineError::RateLimited { .. } => "rate_limited",
            EngineError::Unauthorized => "unauthorized",
            EngineError::DeviceNotActive => "device_not_active",
            EngineError::NetworkTimeout => "network_timeout",
            EngineError::Api { .. } => "api",
            EngineError::NoPlayableUrl { .. } => "no_playable_url",
            EngineError::Audio(_) => "audio",
            EngineError::Decode(_) => "decode",
            EngineError::Config(_) => "config",
            EngineError::NotFound(_) => "not_found",
            EngineError::Io(_) => "io",
        }
    }

    /// Whether a single retry after a short delay is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::NetworkTimeout => true,
            EngineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            EngineError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
