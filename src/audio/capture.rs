//! Audio capture collaborator.
//!
//! The pipeline core does not talk to microphone hardware. It consumes
//! any [`CaptureSource`]: something that, once started, delivers raw
//! 16kHz mono s16le PCM chunks of a configured length through a
//! callback. Chunk delivery runs on the source's own thread; the
//! callback must stay non-blocking.

use crate::audio::pcm;
use crate::defaults;
use crate::error::{DictflowError, Result};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Callback invoked for every captured PCM chunk.
pub type ChunkCallback = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

/// Source of live PCM audio.
///
/// Contract:
/// - `start_streaming` accepts `chunk_ms` in `[20, 2000]` and invokes
///   `on_chunk` with chunks of exactly that nominal length;
/// - `stop` is idempotent and emits a final short chunk iff that tail
///   is at least half the nominal chunk size.
pub trait CaptureSource: Send {
    /// Begins delivering chunks. Fails if the source cannot start.
    fn start_streaming(&mut self, chunk_ms: u32, on_chunk: ChunkCallback) -> Result<()>;

    /// Stops delivery. Safe to call repeatedly.
    fn stop(&mut self) -> Result<()>;
}

fn validate_chunk_ms(chunk_ms: u32) -> Result<()> {
    if !(defaults::MIN_CHUNK_MS..=defaults::MAX_CHUNK_MS).contains(&chunk_ms) {
        return Err(DictflowError::Capture {
            message: format!(
                "chunk_ms {} outside supported range [{}, {}]",
                chunk_ms,
                defaults::MIN_CHUNK_MS,
                defaults::MAX_CHUNK_MS
            ),
        });
    }
    Ok(())
}

/// Capture source that reads PCM from any byte reader on a background
/// thread. Used for pipe mode (stdin) and file-driven tests.
pub struct ReaderCapture<R: Read + Send + 'static> {
    reader: Option<R>,
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<R: Read + Send + 'static> ReaderCapture<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl<R: Read + Send + 'static> CaptureSource for ReaderCapture<R> {
    fn start_streaming(&mut self, chunk_ms: u32, mut on_chunk: ChunkCallback) -> Result<()> {
        validate_chunk_ms(chunk_ms)?;

        let mut reader = self.reader.take().ok_or_else(|| DictflowError::Capture {
            message: "capture source already started".to_string(),
        })?;

        let chunk_bytes = pcm::ms_to_bytes(chunk_ms as u64);
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; chunk_bytes];
            let mut filled = 0usize;

            while running.load(Ordering::SeqCst) {
                match reader.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => {
                        filled += n;
                        if filled == chunk_bytes {
                            on_chunk(buf.clone());
                            filled = 0;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("capture read error: {}", e);
                        break;
                    }
                }
            }

            // Tail rule: a short final chunk is delivered only when it
            // carries at least half the nominal chunk length.
            if filled > 0 && filled >= chunk_bytes / 2 {
                buf.truncate(filled);
                on_chunk(buf);
            }

            running.store(false, Ordering::SeqCst);
        });

        self.worker = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Scripted capture source for tests.
///
/// Delivers its configured chunks synchronously when started, then an
/// optional tail on `stop()` following the half-chunk rule.
pub struct MockCapture {
    chunks: Vec<Vec<u8>>,
    tail: Option<Vec<u8>>,
    fail_start: bool,
    chunk_ms: Option<u32>,
    on_chunk: Option<ChunkCallback>,
    stop_count: usize,
}

impl MockCapture {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            tail: None,
            fail_start: false,
            chunk_ms: None,
            on_chunk: None,
            stop_count: 0,
        }
    }

    /// Adds a chunk delivered on start.
    pub fn with_chunk(mut self, chunk: Vec<u8>) -> Self {
        self.chunks.push(chunk);
        self
    }

    /// Sets a tail chunk held back until `stop()`.
    pub fn with_tail(mut self, tail: Vec<u8>) -> Self {
        self.tail = Some(tail);
        self
    }

    /// Makes `start_streaming` fail.
    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Number of times `stop()` has been called.
    pub fn stop_count(&self) -> usize {
        self.stop_count
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for MockCapture {
    fn start_streaming(&mut self, chunk_ms: u32, mut on_chunk: ChunkCallback) -> Result<()> {
        validate_chunk_ms(chunk_ms)?;

        if self.fail_start {
            return Err(DictflowError::Capture {
                message: "mock capture start failure".to_string(),
            });
        }

        self.chunk_ms = Some(chunk_ms);
        for chunk in self.chunks.drain(..) {
            on_chunk(chunk);
        }
        self.on_chunk = Some(on_chunk);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_count += 1;

        if let (Some(tail), Some(on_chunk), Some(chunk_ms)) =
            (self.tail.take(), self.on_chunk.as_mut(), self.chunk_ms)
        {
            let nominal = pcm::ms_to_bytes(chunk_ms as u64);
            if tail.len() >= nominal / 2 {
                on_chunk(tail);
            }
        }

        self.on_chunk = None;
        Ok(())
    }
}
