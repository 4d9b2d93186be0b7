use crate::api::models::{AuthoritativeState, Track};
use crate::audio::decoder::extension_hint;
use crate::audio::element::AudioElement;
use crate::audio::stream_source::PreviewStreamSource;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::playback::backend::{PlaybackBackend, PlaybackMode};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// External search collaborator used to locate fallback preview audio.
///
/// Implementations proxy a search service; the engine tolerates an empty
/// result and ranks the candidates itself.
#[async_trait]
pub trait PreviewSearch: Send + Sync {
    async fn search(&self, title: &str, artist: &str) -> EngineResult<Vec<PreviewCandidate>>;
}

#[derive(Debug, Clone)]
pub struct PreviewCandidate {
    pub title: String,
    pub artist: String,
    pub url: String,
    pub duration_ms: Option<u64>,
}

/// Default `PreviewSearch` over the iTunes Search API, whose results carry
/// 30-second preview clips.
pub struct ItunesPreviewSearch {
    http: reqwest::Client,
    base_url: String,
}

const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";

impl ItunesPreviewSearch {
    pub fn new() -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("jamsync/0.1.0")
            .build()?;
        Ok(Self {
            http,
            base_url: ITUNES_SEARCH_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PreviewSearch for ItunesPreviewSearch {
    async fn search(&self, title: &str, artist: &str) -> EngineResult<Vec<PreviewCandidate>> {
        let term = format!("{} {}", title, artist);
        let url = format!(
            "{}?term={}&media=music&entity=song&limit=10",
            self.base_url,
            urlencoding::encode(&term)
        );

        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Api {
                status: response.status().as_u16(),
                message: "preview search failed".into(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let results = body
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(results
            .iter()
            .filter_map(|entry| {
                let url = entry.get("previewUrl")?.as_str()?.to_string();
                Some(PreviewCandidate {
                    title: entry
                        .get("trackName")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    artist: entry
                        .get("artistName")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url,
                    duration_ms: entry.get("trackTimeMillis").and_then(|v| v.as_u64()),
                })
            })
            .collect())
    }
}

struct CurrentClip {
    track_id: String,
    cache_key: String,
    download: Option<tokio::task::JoinHandle<()>>,
}

/// Preview-mode backend: plays fixed-length clips through the local audio
/// element, resolving playable URLs from the track's stored preview, a
/// process-lifetime cache, or the search collaborator.
pub struct LocalPreviewBackend {
    http: reqwest::Client,
    search: Arc<dyn PreviewSearch>,
    element: Arc<RwLock<AudioElement>>,
    /// Resolved URLs keyed by normalized `title|artist`.
    url_cache: Mutex<HashMap<String, String>>,
    /// Tracks that recently failed to resolve or play, with the mark time.
    recently_failed: Mutex<HashMap<String, Instant>>,
    current: Mutex<Option<CurrentClip>>,
    preview_duration_ms: u64,
    probe_timeout: Duration,
    ready_timeout: Duration,
    failed_cooldown: Duration,
}

impl LocalPreviewBackend {
    pub fn new(config: &EngineConfig, search: Arc<dyn PreviewSearch>) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("jamsync/0.1.0")
            .build()?;

        Ok(Self {
            http,
            search,
            element: Arc::new(RwLock::new(AudioElement::new())),
            url_cache: Mutex::new(HashMap::new()),
            recently_failed: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            preview_duration_ms: config.preview_duration_ms,
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            ready_timeout: Duration::from_millis(config.ready_timeout_ms),
            failed_cooldown: Duration::from_millis(config.failed_track_cooldown_ms),
        })
    }

    /// Resolve a playable URL for the track. Priority: stored preview URL
    /// (if reachable), cached search result, fresh search.
    async fn resolve_url(&self, track: &Track) -> EngineResult<(String, String)> {
        let key = preview_key(track);

        if let Some(url) = &track.preview_url {
            if self.probe(url).await {
                return Ok((url.clone(), key));
            }
            log::debug!(
                "[preview] stored URL unreachable for {} - {}, falling back to search",
                track.artist,
                track.title
            );
        }

        if let Some(url) = self.url_cache.lock().await.get(&key).cloned() {
            return Ok((url, key));
        }

        let candidates = match self.search.search(&track.title, &track.artist).await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("[preview] search failed for {}: {}", key, e);
                Vec::new()
            }
        };

        if let Some(url) = best_candidate(&candidates, &track.title, &track.artist) {
            self.url_cache.lock().await.insert(key.clone(), url.clone());
            return Ok((url, key));
        }

        Err(EngineError::NoPlayableUrl {
            title: track.title.clone(),
            artist: track.artist.clone(),
        })
    }

    /// Quick reachability check on a stored preview URL.
    async fn probe(&self, url: &str) -> bool {
        match self
            .http
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn evict(&self, cache_key: &str) {
        self.url_cache.lock().await.remove(cache_key);
    }

    async fn mark_failed(&self, track_id: &str) {
        let mut failed = self.recently_failed.lock().await;
        let now = Instant::now();
        // Prune expired marks while we're here
        failed.retain(|_, at| now.saturating_duration_since(*at) < self.failed_cooldown);
        failed.insert(track_id.to_string(), now);
    }

    async fn is_recently_failed(&self, track_id: &str) -> bool {
        let failed = self.recently_failed.lock().await;
        match failed.get(track_id) {
            Some(at) => Instant::now().saturating_duration_since(*at) < self.failed_cooldown,
            None => false,
        }
    }

    /// Resolve, download, probe and start the clip. Fails fast for tracks in
    /// their failed-cooldown window to avoid repeated fruitless searches.
    pub async fn load_and_play(&self, track: &Track) -> EngineResult<()> {
        if self.is_recently_failed(&track.id).await {
            return Err(EngineError::NoPlayableUrl {
                title: track.title.clone(),
                artist: track.artist.clone(),
            });
        }

        let (url, key) = match self.resolve_url(track).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.mark_failed(&track.id).await;
                return Err(e);
            }
        };

        let (source, writer) = PreviewStreamSource::new();
        let download = AudioElement::start_download(writer, url.clone(), self.http.clone());

        {
            let mut current = self.current.lock().await;
            if let Some(previous) = current.take() {
                if let Some(handle) = previous.download {
                    handle.abort();
                }
            }
            *current = Some(CurrentClip {
                track_id: track.id.clone(),
                cache_key: key.clone(),
                download: Some(download),
            });
        }

        let hint = extension_hint(&url);
        let element = Arc::clone(&self.element);
        let duration = self.preview_duration_ms;

        // The format probe blocks until enough bytes arrive, so it runs under
        // spawn_blocking and the whole load is bounded by the ready timeout.
        let played = tokio::time::timeout(
            self.ready_timeout,
            tokio::task::spawn_blocking(move || {
                let rt = tokio::runtime::Handle::current();
                let mut el = rt.block_on(element.write());
                el.play_stream(source, hint, duration)
            }),
        )
        .await;

        match played {
            Err(_) => {
                // Unblock the stuck probe by killing its byte source
                let mut current = self.current.lock().await;
                if let Some(clip) = current.as_mut() {
                    if let Some(handle) = clip.download.take() {
                        handle.abort();
                    }
                }
                drop(current);
                self.evict(&key).await;
                self.mark_failed(&track.id).await;
                Err(EngineError::Audio(format!(
                    "preview for \"{}\" not ready within {}s",
                    track.title,
                    self.ready_timeout.as_secs()
                )))
            }
            Ok(Err(join_err)) => Err(EngineError::Audio(format!(
                "preview load task failed: {}",
                join_err
            ))),
            Ok(Ok(Err(e))) => {
                self.evict(&key).await;
                self.mark_failed(&track.id).await;
                Err(e)
            }
            Ok(Ok(Ok(()))) => {
                log::info!(
                    "[preview] playing {} - {} ({}s clip)",
                    track.artist,
                    track.title,
                    duration / 1000
                );
                Ok(())
            }
        }
    }

    /// Current element state as an authoritative snapshot, observing any
    /// sticky element error (which evicts the cache entry and marks the
    /// track failed).
    async fn element_state(&self) -> EngineResult<Option<AuthoritativeState>> {
        let (error, position_ms, playing, finished) = {
            let element = self.element.read().await;
            (
                element.take_error(),
                element.position_ms(),
                element.is_playing(),
                element.is_finished(),
            )
        };

        let current = self.current.lock().await;
        let Some(clip) = current.as_ref() else {
            return Ok(None);
        };
        let track_id = clip.track_id.clone();
        let cache_key = clip.cache_key.clone();
        drop(current);

        if let Some(message) = error {
            self.evict(&cache_key).await;
            self.mark_failed(&track_id).await;
            return Err(EngineError::Audio(message));
        }

        let duration = self.preview_duration_ms;
        // Previews are a fixed-length product of the search provider; the
        // media's own reported duration is ignored.
        let position = if finished {
            duration
        } else {
            position_ms.min(duration)
        };
        let is_paused = !playing || finished;

        Ok(Some(AuthoritativeState::new(
            Some(track_id),
            position,
            duration,
            is_paused,
            Instant::now(),
        )))
    }
}

#[async_trait]
impl PlaybackBackend for LocalPreviewBackend {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::LocalPreview
    }

    async fn play(&self, track: &Track, position_ms: u64) -> EngineResult<()> {
        self.load_and_play(track).await?;
        if position_ms > 0 {
            let element = self.element.read().await;
            element.seek_ms(position_ms.min(self.preview_duration_ms));
        }
        Ok(())
    }

    async fn pause(&self) -> EngineResult<()> {
        self.element.read().await.pause();
        Ok(())
    }

    async fn resume(&self) -> EngineResult<()> {
        self.element.read().await.resume();
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let element = self.element.read().await;
        element.seek_ms(position_ms.min(self.preview_duration_ms));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> EngineResult<()> {
        self.element.read().await.set_volume(volume);
        Ok(())
    }

    async fn state(&self) -> EngineResult<Option<AuthoritativeState>> {
        self.element_state().await
    }

    /// The local element has no activation handshake.
    async fn is_active(&self) -> bool {
        true
    }
}

fn preview_key(track: &Track) -> String {
    format!("{}|{}", normalize(&track.title), normalize(&track.artist))
}

fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Rank search candidates by substring containment on normalized title and
/// artist. A title match is required; artist agreement breaks ties.
fn best_candidate(candidates: &[PreviewCandidate], title: &str, artist: &str) -> Option<String> {
    let want_title = normalize(title);
    let want_artist = normalize(artist);

    let mut best: Option<(u32, &PreviewCandidate)> = None;
    for candidate in candidates {
        let got_title = normalize(&candidate.title);
        let got_artist = normalize(&candidate.artist);

        let title_hit = !want_title.is_empty()
            && (got_title.contains(&want_title) || want_title.contains(&got_title));
        if !title_hit {
            continue;
        }
        let artist_hit = !want_artist.is_empty()
            && (got_artist.contains(&want_artist) || want_artist.contains(&got_artist));

        let score = 2 + u32::from(artist_hit);
        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, c)| c.url.clone())
}
