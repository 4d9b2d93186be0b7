use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex};

// Previews are ~30s clips; cap how far the download may run ahead of the reader.
const MAX_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Shared state between the HTTP download task and the symphonia reader.
struct ClipBuffer {
    /// All downloaded bytes (append-only from writer side).
    data: Vec<u8>,
    /// Read cursor position.
    position: usize,
    /// Whether the download has completed.
    finished: bool,
    /// Download error, if any.
    error: Option<String>,
}

/// Adapter that makes a downloading preview clip look like a seekable `Read`
/// plus `symphonia::core::io::MediaSource`. All bytes are retained in memory
/// so the probe can seek backwards.
pub struct PreviewStreamSource {
    shared: Arc<(Mutex<ClipBuffer>, Condvar)>,
}

impl PreviewStreamSource {
    pub fn new() -> (Self, PreviewStreamWriter) {
        let shared = Arc::new((
            Mutex::new(ClipBuffer {
                data: Vec::with_capacity(256 * 1024),
                position: 0,
                finished: false,
                error: None,
            }),
            Condvar::new(),
        ));

        let source = Self {
            shared: Arc::clone(&shared),
        };
        let writer = PreviewStreamWriter { shared };

        (source, writer)
    }
}

impl Read for PreviewStreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();

        // Wait until data is available past our position, the download ends,
        // or the writer reports an error.
        while state.position >= state.data.len() && !state.finished && state.error.is_none() {
            state = cvar.wait(state).unwrap();
        }

        if let Some(ref err) = state.error {
            return Err(io::Error::new(io::ErrorKind::Other, err.clone()));
        }

        let available = state.data.len() - state.position;
        if available == 0 && state.finished {
            return Ok(0); // EOF
        }

        let to_read = buf.len().min(available);
        buf[..to_read].copy_from_slice(&state.data[state.position..state.position + to_read]);
        state.position += to_read;

        cvar.notify_all();

        Ok(to_read)
    }
}

impl Seek for PreviewStreamSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (lock, _cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();

        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => state.position as i64 + offset,
            SeekFrom::End(offset) => state.data.len() as i64 + offset,
        };

        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek to negative position",
            ));
        }

        state.position = new_pos as usize;
        Ok(state.position as u64)
    }
}

impl symphonia::core::io::MediaSource for PreviewStreamSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        let (lock, _) = &*self.shared;
        let state = lock.lock().unwrap();
        if state.finished {
            Some(state.data.len() as u64)
        } else {
            None
        }
    }
}

/// Writer end that receives bytes from the HTTP download task.
pub struct PreviewStreamWriter {
    shared: Arc<(Mutex<ClipBuffer>, Condvar)>,
}

impl PreviewStreamWriter {
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), String> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();

        // Back-pressure: wait if we're too far ahead of the reader.
        while (state.data.len() - state.position) >= MAX_BUFFER_SIZE && !state.finished {
            state = cvar.wait(state).unwrap();
        }

        if state.finished {
            return Ok(());
        }

        state.data.extend_from_slice(data);
        cvar.notify_all();
        Ok(())
    }

    pub fn finish(&self) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.finished = true;
        cvar.notify_all();
    }

    pub fn set_error(&self, error: String) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.error = Some(error);
        state.finished = true;
        cvar.notify_all();
    }
}

impl Drop for PreviewStreamWriter {
    /// A writer dropped mid-download (e.g. the task was aborted) must not
    /// leave the reader blocked on the condvar forever.
    fn drop(&mut self) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        if !state.finished {
            state.error = Some("download cancelled".into());
            state.finished = true;
        }
        cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn reads_what_the_writer_wrote() {
        let (mut source, writer) = PreviewStreamSource::new();
        writer.write_bytes(b"abcdef").unwrap();
        writer.finish();

        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn writer_error_surfaces_to_reader() {
        let (mut source, writer) = PreviewStreamSource::new();
        writer.set_error("connection reset".into());

        let mut buf = [0u8; 16];
        let err = source.read(&mut buf).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
