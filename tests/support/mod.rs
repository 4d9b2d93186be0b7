//! Minimal HTTP stub standing in for the playback-control API, plus
//! fast-timing engine configs so tests finish quickly.

use jamsync::EngineConfig;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

pub struct Recorded {
    pub line: String,
    pub at: Instant,
}

type Responder = dyn Fn(&str) -> (u16, String, String) + Send + Sync;

/// Start a one-connection-per-request HTTP responder. `respond` maps a
/// request line ("PUT /me/player/play?... HTTP/1.1") to
/// (status, extra headers, body). Returns the base URL and the request log.
pub async fn start_stub<F>(respond: F) -> (String, Arc<Mutex<Vec<Recorded>>>)
where
    F: Fn(&str) -> (u16, String, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().unwrap();
    let log: Arc<Mutex<Vec<Recorded>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_log = Arc::clone(&log);
    let respond: Arc<Responder> = Arc::new(respond);
    tokio::spawn(async move {
        loop {
            let Ok((sock, _)) = listener.accept().await else { break };
            let log = Arc::clone(&accept_log);
            let respond = Arc::clone(&respond);
            tokio::spawn(handle(sock, log, respond));
        }
    });

    (format!("http://{}", addr), log)
}

async fn handle(mut sock: TcpStream, log: Arc<Mutex<Vec<Recorded>>>, respond: Arc<Responder>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 2048];
    let header_end = loop {
        match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let mut content_length = 0usize;
    for line in head.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    // Drain the body before answering so the client never sees a reset
    while buf.len() < header_end + content_length {
        match sock.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }

    log.lock().unwrap().push(Recorded {
        line: request_line.clone(),
        at: Instant::now(),
    });

    let (status, extra_headers, body) = respond(&request_line);
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let mut response = format!("HTTP/1.1 {} {}\r\nconnection: close\r\n", status, reason);
    if status != 204 {
        response.push_str(&format!("content-length: {}\r\n", body.len()));
    }
    response.push_str(&extra_headers);
    response.push_str("\r\n");
    response.push_str(&body);

    let _ = sock.write_all(response.as_bytes()).await;
    let _ = sock.shutdown().await;
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn ok_no_content(_line: &str) -> (u16, String, String) {
    (204, String::new(), String::new())
}

/// Engine config pointed at the stub with short windows so tests stay fast.
pub fn fast_config(base_url: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.remote_api_base_url = Some(base_url.to_string());
    config.control_min_interval_ms = 10;
    config.state_min_interval_ms = 10;
    config.rate_limit_penalty_ms = 300;
    config.transfer_settle_ms = 150;
    config.activation_poll_delay_ms = 20;
    config.activation_retry_delay_ms = 20;
    config.retry_delay_ms = 20;
    config.remote_poll_interval_ms = 100;
    config
}
