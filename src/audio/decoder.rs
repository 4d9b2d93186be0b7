use crate::audio::stream_source::PreviewStreamSource;
use crate::error::{EngineError, EngineResult};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub struct PreviewDecoder {
    format_reader: Box<dyn symphonia::core::formats::FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

pub struct DecodedSamples {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Map a preview URL's file extension onto a probe hint. Preview CDNs serve
/// mp3 or m4a clips almost exclusively.
pub fn extension_hint(url: &str) -> Option<&'static str> {
    let path = url::Url::parse(url).ok()?.path().to_lowercase();
    if path.ends_with(".mp3") {
        Some("mp3")
    } else if path.ends_with(".m4a") || path.ends_with(".mp4") {
        Some("m4a")
    } else if path.ends_with(".aac") {
        Some("aac")
    } else {
        None
    }
}

impl PreviewDecoder {
    pub fn new(source: PreviewStreamSource, ext_hint: Option<&str>) -> EngineResult<Self> {
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = ext_hint {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::Decode(format!("Failed to probe format: {}", e)))?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::Decode("No supported audio track found".into()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(format!("Failed to create decoder: {}", e)))?;

        log::debug!(
            "[decoder] ready: track_id={}, sample_rate={}, channels={}",
            track_id,
            sample_rate,
            channels
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Seek to a position within the clip (in seconds).
    pub fn seek(&mut self, position_seconds: f64) -> EngineResult<()> {
        use symphonia::core::formats::SeekTo;
        use symphonia::core::units::Time;

        let time = Time {
            seconds: position_seconds as u64,
            frac: position_seconds.fract(),
        };

        self.format_reader
            .seek(
                symphonia::core::formats::SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::Decode(format!("Seek failed: {}", e)))?;

        // Decoder state is stale after a format-level seek.
        self.decoder.reset();

        Ok(())
    }

    /// Decode the next batch of samples. Returns None at EOF.
    pub fn decode_next(&mut self) -> EngineResult<Option<DecodedSamples>> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(EngineError::Decode(format!("Failed to read packet: {}", e)))
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                    log::warn!("[decoder] decode error (skipping packet): {}", msg);
                    continue;
                }
                Err(e) => return Err(EngineError::Decode(format!("Failed to decode: {}", e))),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();
            let channels = spec.channels.count();

            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            return Ok(Some(DecodedSamples {
                samples: sample_buf.samples().to_vec(),
                sample_rate: spec.rate,
                channels,
            }));
        }
    }
}
