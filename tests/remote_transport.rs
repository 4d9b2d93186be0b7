//! RemoteClient behavior against a local stub of the playback-control API:
//! transfer-before-play sequencing, rate-limit degradation, and error
//! classification.

mod support;

use jamsync::{EngineConfig, EngineError, RateLimiter, RemoteClient, StaticTokenProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{fast_config, ok_no_content, start_stub};

fn client_with_limiter(config: &EngineConfig) -> (RemoteClient, Arc<RateLimiter>) {
    let limiter = Arc::new(RateLimiter::new(config));
    let client = RemoteClient::new(
        config,
        Arc::clone(&limiter),
        Arc::new(StaticTokenProvider::new("test-token")),
        "dev-1",
    )
    .expect("client builds");
    (client, limiter)
}

#[tokio::test]
async fn play_on_inactive_device_transfers_then_settles() {
    let (base, log) = start_stub(ok_no_content).await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    client
        .play("spotify:track:abc", 0, false)
        .await
        .expect("play succeeds");

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2, "expected transfer then play");
    assert!(
        log[0].line.starts_with("PUT /me/player HTTP"),
        "first call must be the transfer, got: {}",
        log[0].line
    );
    assert!(
        log[1].line.starts_with("PUT /me/player/play"),
        "second call must be play, got: {}",
        log[1].line
    );
    let gap = log[1].at.duration_since(log[0].at);
    assert!(
        gap >= Duration::from_millis(150),
        "play issued before the settle delay elapsed: {:?}",
        gap
    );
}

#[tokio::test]
async fn play_on_active_device_skips_transfer() {
    let (base, log) = start_stub(ok_no_content).await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    client
        .play("spotify:track:abc", 1_000, true)
        .await
        .expect("play succeeds");

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].line.starts_with("PUT /me/player/play"));
}

#[tokio::test]
async fn rate_limited_control_degrades_to_unconfirmed_ack() {
    let (base, _log) = start_stub(|line| {
        if line.starts_with("PUT /me/player/pause") {
            (429, "retry-after: 7\r\n".to_string(), String::new())
        } else {
            (204, String::new(), String::new())
        }
    })
    .await;
    let (client, limiter) = client_with_limiter(&fast_config(&base));

    let ack = client.toggle_play(false).await.expect("degrades, not fails");
    assert!(!ack.confirmed);
    assert_eq!(ack.retry_after_secs, Some(7));
    // The 429 arms the shared cooldown for every endpoint
    assert!(limiter.in_cooldown().await);
}

#[tokio::test]
async fn rate_limited_state_read_fails_with_hint() {
    let (base, _log) = start_stub(|_| (429, "retry-after: 11\r\n".to_string(), String::new())).await;
    let (client, limiter) = client_with_limiter(&fast_config(&base));

    let err = client.get_state().await.unwrap_err();
    match err {
        EngineError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 11),
        other => panic!("expected RateLimited, got {:?}", other),
    }
    assert!(limiter.in_cooldown().await);
}

#[tokio::test]
async fn unauthorized_surfaces_without_retry() {
    let (base, log) = start_stub(|_| (401, String::new(), String::new())).await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    let err = client.seek(30_000).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized));
    // 401 is the TokenProvider's concern; exactly one request went out
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_device_maps_to_device_not_active() {
    let (base, _log) = start_stub(|_| (404, String::new(), String::new())).await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    let err = client.next().await.unwrap_err();
    assert!(matches!(err, EngineError::DeviceNotActive));
}

#[tokio::test]
async fn transient_server_error_is_retried_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (base, _log) = start_stub(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            (500, String::new(), String::new())
        } else {
            (204, String::new(), String::new())
        }
    })
    .await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    let ack = client.toggle_play(true).await.expect("retry succeeds");
    assert!(ack.confirmed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn state_no_content_means_no_active_session() {
    let (base, _log) = start_stub(ok_no_content).await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    let state = client.get_state().await.expect("reads cleanly");
    assert!(state.is_none());
}

#[tokio::test]
async fn state_document_parses() {
    let body = r#"{"progress_ms":12000,"is_playing":true,"item":{"uri":"spotify:track:x","duration_ms":200000},"device":{"id":"dev-1","is_active":true,"volume_percent":80}}"#;
    let (base, _log) = start_stub(move |_| {
        (
            200,
            "content-type: application/json\r\n".to_string(),
            body.to_string(),
        )
    })
    .await;
    let (client, _) = client_with_limiter(&fast_config(&base));

    let state = client.get_state().await.unwrap().expect("active session");
    assert_eq!(state.progress_ms, Some(12_000));
    assert!(state.is_playing);
    let item = state.item.expect("item present");
    assert_eq!(item.uri, "spotify:track:x");
    assert_eq!(item.duration_ms, Some(200_000));
    let device = state.device.expect("device present");
    assert!(device.is_active);
}
