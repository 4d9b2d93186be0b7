use crate::error::EngineResult;
use async_trait::async_trait;

/// Supplies a valid bearer credential on demand.
///
/// The engine never persists or refreshes tokens itself: a 401 from any call
/// surfaces as `EngineError::Unauthorized` and the next call asks again.
/// Returned tokens must stay valid for at least the duration of one call.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> EngineResult<String>;
}

/// Fixed-token provider for tests and one-off tooling.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> EngineResult<String> {
        Ok(self.token.clone())
    }
}
