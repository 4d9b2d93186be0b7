use crate::api::models::RemotePlayerState;
use crate::api::rate_limit::{Endpoint, RateLimiter};
use crate::api::token::TokenProvider;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.spotify.com/v1";

/// Result of a control command.
///
/// `confirmed == false` means the provider rate-limited a command that was
/// already on the wire; the engine proceeds optimistically instead of failing
/// the session, and `retry_after_secs` carries the provider's hint.
#[derive(Debug, Clone)]
pub struct ControlAck {
    pub confirmed: bool,
    pub command_id: Uuid,
    pub retry_after_secs: Option<u64>,
}

impl ControlAck {
    fn confirmed() -> Self {
        Self {
            confirmed: true,
            command_id: Uuid::new_v4(),
            retry_after_secs: None,
        }
    }

    fn assumed(retry_after_secs: u64) -> Self {
        Self {
            confirmed: false,
            command_id: Uuid::new_v4(),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Thin client over the remote playback-control API.
///
/// Every call goes rate-limiter gate -> token fetch -> bounded-timeout request
/// -> classification. Transient failures get one retry after a short fixed
/// delay; 401 surfaces unretried (token refresh is the TokenProvider's
/// concern, not ours).
pub struct RemoteClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
    device_id: String,
    control_timeout: Duration,
    state_timeout: Duration,
    retry_delay: Duration,
    transfer_settle: Duration,
    activation_poll_delay: Duration,
    activation_retry_delay: Duration,
}

impl RemoteClient {
    pub fn new(
        config: &EngineConfig,
        limiter: Arc<RateLimiter>,
        tokens: Arc<dyn TokenProvider>,
        device_id: impl Into<String>,
    ) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("jamsync/0.1.0")
            .build()?;

        Ok(Self {
            http,
            limiter,
            tokens,
            base_url: config
                .remote_api_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            device_id: device_id.into(),
            control_timeout: config.control_timeout(),
            state_timeout: config.state_timeout(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            transfer_settle: Duration::from_millis(config.transfer_settle_ms),
            activation_poll_delay: Duration::from_millis(config.activation_poll_delay_ms),
            activation_retry_delay: Duration::from_millis(config.activation_retry_delay_ms),
        })
    }

    /// Point the client at a different API root (tests, regional mirrors).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Start playback of a track at a position.
    ///
    /// The provider rejects playback commands for an inactive device, and
    /// activation is asynchronous with no synchronous confirmation, so an
    /// inactive target gets a transfer plus a fixed settle wait first.
    /// Callers confirm actual activation separately via `await_activation`.
    pub async fn play(
        &self,
        track_uri: &str,
        position_ms: u64,
        device_active: bool,
    ) -> EngineResult<ControlAck> {
        if !device_active {
            self.transfer().await?;
            log::info!(
                "[play] device inactive, transferred; settling {}ms",
                self.transfer_settle.as_millis()
            );
            tokio::time::sleep(self.transfer_settle).await;
        }

        let body = serde_json::json!({
            "uris": [track_uri],
            "position_ms": position_ms,
        });
        self.send_control(
            Method::PUT,
            "/me/player/play",
            &[("device_id", self.device_id.as_str())],
            Some(body),
        )
        .await
    }

    /// Request activation of our device. Succeeding here only means the
    /// *request* was accepted; poll `await_activation` for confirmation.
    pub async fn transfer(&self) -> EngineResult<ControlAck> {
        let body = serde_json::json!({
            "device_ids": [self.device_id],
            "play": false,
        });
        self.send_control(Method::PUT, "/me/player", &[], Some(body))
            .await
    }

    /// Poll the player state until the device reports active: once after the
    /// initial delay, once more after the retry delay.
    pub async fn await_activation(&self) -> EngineResult<bool> {
        tokio::time::sleep(self.activation_poll_delay).await;
        if self.device_reported_active().await? {
            return Ok(true);
        }
        tokio::time::sleep(self.activation_retry_delay).await;
        self.device_reported_active().await
    }

    async fn device_reported_active(&self) -> EngineResult<bool> {
        Ok(self
            .get_state()
            .await?
            .and_then(|s| s.device)
            .map(|d| d.is_active)
            .unwrap_or(false))
    }

    pub async fn toggle_play(&self, play: bool) -> EngineResult<ControlAck> {
        let path = if play {
            "/me/player/play"
        } else {
            "/me/player/pause"
        };
        self.send_control(Method::PUT, path, &[], None).await
    }

    pub async fn next(&self) -> EngineResult<ControlAck> {
        self.send_control(Method::POST, "/me/player/next", &[], None)
            .await
    }

    pub async fn previous(&self) -> EngineResult<ControlAck> {
        self.send_control(Method::POST, "/me/player/previous", &[], None)
            .await
    }

    pub async fn seek(&self, position_ms: u64) -> EngineResult<ControlAck> {
        let position = position_ms.to_string();
        self.send_control(
            Method::PUT,
            "/me/player/seek",
            &[("position_ms", position.as_str())],
            None,
        )
        .await
    }

    pub async fn set_volume(&self, volume: f32) -> EngineResult<ControlAck> {
        let percent = ((volume.clamp(0.0, 1.0) * 100.0).round() as u8).to_string();
        self.send_control(
            Method::PUT,
            "/me/player/volume",
            &[("volume_percent", percent.as_str())],
            None,
        )
        .await
    }

    /// Read the authoritative player state. `None` means no active playback
    /// session exists on the provider side.
    pub async fn get_state(&self) -> EngineResult<Option<RemotePlayerState>> {
        self.limiter.acquire(Endpoint::PlayerState).await;
        let token = self.tokens.bearer_token().await?;

        let mut result = self
            .issue(
                Method::GET,
                "/me/player",
                &[("additional_types", "track")],
                None,
                &token,
                self.state_timeout,
            )
            .await;
        if let Err(e) = &result {
            if e.is_transient() {
                log::warn!("[state] transient failure, retrying once: {}", e);
                tokio::time::sleep(self.retry_delay).await;
                result = self
                    .issue(
                        Method::GET,
                        "/me/player",
                        &[("additional_types", "track")],
                        None,
                        &token,
                        self.state_timeout,
                    )
                    .await;
            }
        }
        let response = result?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            // No active playback session exists
            Ok(None)
        } else if status == StatusCode::UNAUTHORIZED {
            Err(EngineError::Unauthorized)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_secs(&response);
            self.limiter.report_rate_limited().await;
            Err(EngineError::RateLimited {
                retry_after_secs: retry_after,
            })
        } else if status.is_success() {
            let state: RemotePlayerState = response.json().await?;
            Ok(Some(state))
        } else {
            Err(EngineError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_else(|_| "Unknown error".into()),
            })
        }
    }

    async fn send_control(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> EngineResult<ControlAck> {
        let first = self
            .control_attempt(method.clone(), path, query, body.as_ref())
            .await;
        match first {
            Err(e) if e.is_transient() => {
                log::warn!("[control] {} {} transient failure, retrying once: {}", method, path, e);
                tokio::time::sleep(self.retry_delay).await;
                self.control_attempt(method, path, query, body.as_ref())
                    .await
            }
            other => other,
        }
    }

    async fn control_attempt(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> EngineResult<ControlAck> {
        self.limiter.acquire(Endpoint::Control).await;
        let token = self.tokens.bearer_token().await?;
        let response = self
            .issue(method, path, query, body, &token, self.control_timeout)
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(ControlAck::confirmed())
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            // The command already reached the wire. Arm the cooldown and
            // continue unconfirmed rather than failing the whole session.
            let retry_after = retry_after_secs(&response);
            self.limiter.report_rate_limited().await;
            let ack = ControlAck::assumed(retry_after);
            log::warn!(
                "[control] {} rate limited (retry in {}s), proceeding unconfirmed as {}",
                path,
                retry_after,
                ack.command_id
            );
            Ok(ack)
        } else if status == StatusCode::UNAUTHORIZED {
            Err(EngineError::Unauthorized)
        } else if status == StatusCode::NOT_FOUND {
            Err(EngineError::DeviceNotActive)
        } else {
            Err(EngineError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_else(|_| "Unknown error".into()),
            })
        }
    }

    async fn issue(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        token: &str,
        timeout: Duration,
    ) -> EngineResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| EngineError::Config(e.to_string()))?,
        );

        let mut request = self.http.request(method, &url).headers(headers).timeout(timeout);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::NetworkTimeout
            } else {
                EngineError::Http(e)
            }
        })
    }
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(5)
}
