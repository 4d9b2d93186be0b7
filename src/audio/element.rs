use crate::audio::decoder::PreviewDecoder;
use crate::audio::stream_source::{PreviewStreamSource, PreviewStreamWriter};
use crate::error::{EngineError, EngineResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Shared ring buffer between the decode thread and the cpal callback.
struct SampleRingBuffer {
    buffer: VecDeque<f32>,
    finished: bool,
}

/// Wrapper to make cpal::Stream Send+Sync.
/// This is safe because the stream is only touched by its single logical
/// owner (AudioElement) and is created and dropped on the same thread.
struct SendStream(Option<cpal::Stream>);
unsafe impl Send for SendStream {}
unsafe impl Sync for SendStream {}

/// Sentinel value meaning "no seek requested".
const NO_SEEK: u64 = u64::MAX;

/// The engine's local "audio element": a cpal output stream fed from a ring
/// buffer by a decode thread. Exposes the finite event set the preview
/// backend consumes: position, finished, and a sticky error.
pub struct AudioElement {
    /// cpal stream handle (kept alive)
    stream: SendStream,
    /// Sample buffer shared with the output callback
    ring: Arc<(Mutex<SampleRingBuffer>, Condvar)>,
    /// Volume [0.0, 1.0]
    volume: Arc<Mutex<f32>>,
    /// Samples played counter (for position tracking)
    samples_played: Arc<AtomicU64>,
    sample_rate: Arc<Mutex<u32>>,
    channels: Arc<Mutex<usize>>,
    playing: Arc<AtomicBool>,
    decode_handle: Option<std::thread::JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    /// Clip duration in milliseconds (callers pass the fixed preview length)
    duration_ms: Arc<AtomicU64>,
    /// Seek target in milliseconds (NO_SEEK = no pending seek).
    /// The decode thread reads and clears this.
    seek_target_ms: Arc<AtomicU64>,
    /// Sticky error from the decode thread or download, observed once.
    error: Arc<Mutex<Option<String>>>,
}

impl AudioElement {
    pub fn new() -> Self {
        Self {
            stream: SendStream(None),
            ring: Arc::new((
                Mutex::new(SampleRingBuffer {
                    buffer: VecDeque::with_capacity(88200),
                    finished: false,
                }),
                Condvar::new(),
            )),
            volume: Arc::new(Mutex::new(1.0f32)),
            samples_played: Arc::new(AtomicU64::new(0)),
            sample_rate: Arc::new(Mutex::new(44100)),
            channels: Arc::new(Mutex::new(2)),
            playing: Arc::new(AtomicBool::new(false)),
            decode_handle: None,
            stop_signal: Arc::new(AtomicBool::new(false)),
            duration_ms: Arc::new(AtomicU64::new(0)),
            seek_target_ms: Arc::new(AtomicU64::new(NO_SEEK)),
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Probe the clip and start playback. Blocks while symphonia probes the
    /// format, so callers run this under `spawn_blocking`.
    pub fn play_stream(
        &mut self,
        source: PreviewStreamSource,
        ext_hint: Option<&str>,
        duration_ms: u64,
    ) -> EngineResult<()> {
        self.stop_internal();
        *self.error.lock().unwrap() = None;

        let mut decoder = PreviewDecoder::new(source, ext_hint)?;
        let sr = decoder.sample_rate();
        let ch = decoder.channels();

        *self.sample_rate.lock().unwrap() = sr;
        *self.channels.lock().unwrap() = ch;
        self.duration_ms.store(duration_ms, Ordering::SeqCst);
        self.samples_played.store(0, Ordering::SeqCst);
        // Clear any stale seek from a previous clip
        self.seek_target_ms.store(NO_SEEK, Ordering::SeqCst);

        {
            let (lock, cvar) = &*self.ring;
            let mut ring = lock.lock().unwrap();
            ring.buffer.clear();
            ring.finished = false;
            cvar.notify_all();
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::Audio("No output device available".into()))?;

        let stream_config = cpal::StreamConfig {
            channels: ch as u16,
            sample_rate: cpal::SampleRate(sr),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_clone = Arc::clone(&self.ring);
        let volume_clone = Arc::clone(&self.volume);
        let samples_played_clone = Arc::clone(&self.samples_played);
        let playing_clone = Arc::clone(&self.playing);

        let cpal_stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !playing_clone.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }

                    let vol = *volume_clone.lock().unwrap();
                    let (lock, cvar) = &*ring_clone;
                    let mut ring = lock.lock().unwrap();

                    let available = ring.buffer.len().min(data.len());
                    for (i, sample) in data.iter_mut().enumerate() {
                        if i < available {
                            *sample = ring.buffer.pop_front().unwrap_or(0.0) * vol;
                        } else {
                            *sample = 0.0;
                        }
                    }

                    samples_played_clone.fetch_add(available as u64, Ordering::Relaxed);
                    cvar.notify_all();
                },
                |err| {
                    log::error!("[element] cpal output error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::Audio(format!("Failed to build output stream: {}", e)))?;

        cpal_stream
            .play()
            .map_err(|e| EngineError::Audio(format!("Failed to start playback: {}", e)))?;

        self.stream = SendStream(Some(cpal_stream));
        self.playing.store(true, Ordering::SeqCst);

        let ring_clone = Arc::clone(&self.ring);
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Arc::clone(&stop_signal);
        let seek_target = Arc::clone(&self.seek_target_ms);
        let samples_played_decode = Arc::clone(&self.samples_played);
        let error_slot = Arc::clone(&self.error);
        let sr_decode = sr;
        let ch_decode = ch;

        let handle = std::thread::spawn(move || {
            const MAX_RING_SAMPLES: usize = 176400;

            loop {
                if stop_signal.load(Ordering::Relaxed) {
                    break;
                }

                // Check for pending seek request
                let pending_seek = seek_target.swap(NO_SEEK, Ordering::SeqCst);
                if pending_seek != NO_SEEK {
                    let seek_seconds = pending_seek as f64 / 1000.0;

                    {
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.buffer.clear();
                        cvar.notify_all();
                    }

                    if let Err(e) = decoder.seek(seek_seconds) {
                        log::warn!("[element] seek failed: {}", e);
                    }

                    // Keep the position counter in step with the new target
                    let new_samples = (seek_seconds * sr_decode as f64 * ch_decode as f64) as u64;
                    samples_played_decode.store(new_samples, Ordering::SeqCst);
                    continue;
                }

                {
                    let (lock, cvar) = &*ring_clone;
                    let mut ring = lock.lock().unwrap();
                    while ring.buffer.len() >= MAX_RING_SAMPLES
                        && !stop_signal.load(Ordering::Relaxed)
                        && seek_target.load(Ordering::Relaxed) == NO_SEEK
                    {
                        ring = cvar.wait(ring).unwrap();
                    }
                }

                if stop_signal.load(Ordering::Relaxed) {
                    break;
                }

                // Re-check seek after waking from wait
                if seek_target.load(Ordering::Relaxed) != NO_SEEK {
                    continue;
                }

                match decoder.decode_next() {
                    Ok(Some(decoded)) => {
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.buffer.extend(decoded.samples.iter());
                        cvar.notify_all();
                    }
                    Ok(None) => {
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.finished = true;
                        cvar.notify_all();
                        break;
                    }
                    Err(e) => {
                        log::error!("[element] decode failed: {}", e);
                        *error_slot.lock().unwrap() = Some(e.to_string());
                        let (lock, cvar) = &*ring_clone;
                        let mut ring = lock.lock().unwrap();
                        ring.finished = true;
                        cvar.notify_all();
                        break;
                    }
                }
            }
        });

        self.decode_handle = Some(handle);
        Ok(())
    }

    fn stop_internal(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);

        {
            let (_lock, cvar) = &*self.ring;
            cvar.notify_all();
        }

        if let Some(handle) = self.decode_handle.take() {
            let _ = handle.join();
        }

        self.stream = SendStream(None);
        self.stop_signal = Arc::new(AtomicBool::new(false));
    }

    pub fn stop(&mut self) {
        self.stop_internal();
        self.samples_played.store(0, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, vol: f32) {
        *self.volume.lock().unwrap() = vol.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    pub fn position_ms(&self) -> u64 {
        let samples = self.samples_played.load(Ordering::Relaxed) as f64;
        let sr = *self.sample_rate.lock().unwrap() as f64;
        let ch = *self.channels.lock().unwrap() as f64;
        if sr > 0.0 && ch > 0.0 {
            (samples / (sr * ch) * 1000.0) as u64
        } else {
            0
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms.load(Ordering::Relaxed)
    }

    pub fn seek_ms(&self, position_ms: u64) {
        // Hand the target to the decode thread
        self.seek_target_ms.store(position_ms, Ordering::SeqCst);

        // Wake it if it's waiting on a full ring
        let (_lock, cvar) = &*self.ring;
        cvar.notify_all();

        // Update the position counter immediately for responsive reads
        let sr = *self.sample_rate.lock().unwrap() as f64;
        let ch = *self.channels.lock().unwrap() as f64;
        let sample_position = (position_ms as f64 / 1000.0 * sr * ch) as u64;
        self.samples_played.store(sample_position, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        let (lock, _) = &*self.ring;
        let ring = lock.lock().unwrap();
        ring.finished && ring.buffer.is_empty()
    }

    /// Observe and clear the sticky error, if any.
    pub fn take_error(&self) -> Option<String> {
        self.error.lock().unwrap().take()
    }

    /// Record a failure from outside the decode thread (e.g. the download).
    pub fn report_error(&self, message: String) {
        *self.error.lock().unwrap() = Some(message);
    }

    /// Stream a clip's bytes into the shared buffer on a background task.
    pub fn start_download(
        writer: PreviewStreamWriter,
        url: String,
        client: reqwest::Client,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            log::debug!("[element] downloading preview: {}...", &url[..url.len().min(100)]);
            match client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        log::error!("[element] preview download failed: HTTP {}", status);
                        writer.set_error(format!("Download failed: HTTP {}", status));
                        return;
                    }

                    use futures_util::StreamExt;
                    let mut stream = response.bytes_stream();
                    let mut total_bytes = 0u64;
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(bytes) => {
                                total_bytes += bytes.len() as u64;
                                if writer.write_bytes(&bytes).is_err() {
                                    log::warn!(
                                        "[element] writer closed after {} bytes",
                                        total_bytes
                                    );
                                    break;
                                }
                            }
                            Err(e) => {
                                log::error!(
                                    "[element] download stream error after {} bytes: {}",
                                    total_bytes,
                                    e
                                );
                                writer.set_error(format!("Download error: {}", e));
                                return;
                            }
                        }
                    }
                    log::debug!("[element] preview download complete: {} bytes", total_bytes);
                    writer.finish();
                }
                Err(e) => {
                    log::error!("[element] failed to start preview download: {}", e);
                    writer.set_error(format!("Failed to start download: {}", e));
                }
            }
        })
    }
}

impl Default for AudioElement {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioElement {
    fn drop(&mut self) {
        self.stop_internal();
    }
}
