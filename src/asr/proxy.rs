//! Worker proxy: one streaming ASR interface over every backend.
//!
//! Stateful backends (parakeet) keep decoder context across pushes
//! inside one `stream_reset` scope. Stateless backends (whisper) have
//! no stream at all; the proxy hides the difference by turning each
//! push into an independent one-shot `transcribe` and answering flush
//! with nothing.

use crate::asr::backend::{AsrBackend, StreamContext};
use crate::error::Result;
use crate::ipc::transport::{WireMode, WorkerTransport};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Per-action request timeouts. Model loading dominates warmup, and a
/// full-session final pass can be minutes of audio, so both get the
/// long limit; streaming calls must fail fast enough for the session
/// to stay responsive.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(120);
const STREAM_PUSH_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming ASR interface consumed by the session orchestrator.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    /// One-time model warm-up at session start.
    async fn warmup(&self) -> Result<()>;

    /// Resets streaming state and configures the context window.
    /// No-op for backends without stateful streaming.
    async fn start_stream(&self, sample_rate: u32, context: StreamContext) -> Result<()>;

    /// Feeds a window of PCM and returns the newly decoded text.
    /// Whitespace-only text means "no new text", never an error.
    async fn push_stream(&self, audio: &[u8], sample_rate: u32) -> Result<String>;

    /// Returns any text still buffered in the decoder. Backends without
    /// stateful streaming return an empty string.
    async fn flush_stream(&self) -> Result<String>;

    /// Tears down streaming state. No-op for stateless backends.
    async fn stop_stream(&self) -> Result<()>;

    /// One-shot transcription of a complete buffer (final pass).
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> Result<String>;

    /// Stops the worker process.
    async fn shutdown(&self);

    /// Whether pushes share decoder context within a stream scope.
    fn is_streaming(&self) -> bool;
}

/// [`AsrEngine`] backed by a worker process over the IPC transport.
pub struct WorkerProxy {
    backend: AsrBackend,
    wire_mode: WireMode,
    transport: WorkerTransport,
}

impl WorkerProxy {
    pub fn new(backend: AsrBackend, wire_mode: WireMode, transport: WorkerTransport) -> Self {
        Self {
            backend,
            wire_mode,
            transport,
        }
    }

    /// Spawns the worker. Idempotent.
    pub fn start(&self) -> Result<()> {
        self.transport.start()
    }

    /// Last stderr output from the worker, for error reporting.
    pub fn diagnostics(&self) -> String {
        self.transport.stderr_tail()
    }

    /// Sends an audio-carrying request in whichever layout the wire
    /// mode requires: binary tail for framed, base64 body otherwise.
    async fn request_with_audio(
        &self,
        mut payload: Value,
        audio: &[u8],
        timeout: Duration,
    ) -> Result<Value> {
        match self.wire_mode {
            WireMode::Framed => self.transport.request(payload, timeout, Some(audio)).await,
            WireMode::JsonLines => {
                payload["audioBase64"] = Value::String(BASE64.encode(audio));
                self.transport.request(payload, timeout, None).await
            }
        }
    }
}

fn text_of(result: &Value) -> String {
    result
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

#[async_trait]
impl AsrEngine for WorkerProxy {
    async fn warmup(&self) -> Result<()> {
        self.transport
            .request(json!({"action": "warmup"}), WARMUP_TIMEOUT, None)
            .await?;
        Ok(())
    }

    async fn start_stream(&self, sample_rate: u32, context: StreamContext) -> Result<()> {
        if !self.backend.supports_streaming() {
            return Ok(());
        }

        self.transport
            .request(
                json!({
                    "action": "stream_reset",
                    "sampleRate": sample_rate,
                    "contextLeft": context.context_left,
                    "contextRight": context.context_right,
                    "depth": context.depth,
                }),
                STREAM_CONTROL_TIMEOUT,
                None,
            )
            .await?;
        Ok(())
    }

    async fn push_stream(&self, audio: &[u8], sample_rate: u32) -> Result<String> {
        let (action, timeout) = if self.backend.supports_streaming() {
            ("stream_push", STREAM_PUSH_TIMEOUT)
        } else {
            // Stateless: every window is its own transcription.
            ("transcribe", TRANSCRIBE_TIMEOUT)
        };

        let result = self
            .request_with_audio(
                json!({"action": action, "sampleRate": sample_rate}),
                audio,
                timeout,
            )
            .await?;
        Ok(text_of(&result))
    }

    async fn flush_stream(&self) -> Result<String> {
        if !self.backend.supports_streaming() {
            return Ok(String::new());
        }

        let result = self
            .transport
            .request(json!({"action": "stream_flush"}), STREAM_FLUSH_TIMEOUT, None)
            .await?;
        Ok(text_of(&result))
    }

    async fn stop_stream(&self) -> Result<()> {
        if !self.backend.supports_streaming() {
            return Ok(());
        }

        self.transport
            .request(json!({"action": "stream_close"}), STREAM_CONTROL_TIMEOUT, None)
            .await?;
        Ok(())
    }

    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> Result<String> {
        let result = self
            .request_with_audio(
                json!({"action": "transcribe", "sampleRate": sample_rate}),
                audio,
                TRANSCRIBE_TIMEOUT,
            )
            .await?;
        Ok(text_of(&result))
    }

    async fn shutdown(&self) {
        self.transport.stop().await;
    }

    fn is_streaming(&self) -> bool {
        self.backend.supports_streaming()
    }
}

/// Scripted engine for tests.
///
/// Returns configured texts for successive pushes (empty once the
/// script runs out), a fixed flush tail, and a fixed final-pass result.
pub struct MockAsrEngine {
    push_texts: Mutex<VecDeque<String>>,
    flush_text: Mutex<Option<String>>,
    transcribe_text: Mutex<Option<String>>,
    fail_pushes: Mutex<bool>,
    calls: Mutex<Vec<String>>,
    pushed_bytes: Mutex<Vec<usize>>,
    streaming: bool,
}

impl MockAsrEngine {
    pub fn new() -> Self {
        Self {
            push_texts: Mutex::new(VecDeque::new()),
            flush_text: Mutex::new(None),
            transcribe_text: Mutex::new(None),
            fail_pushes: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            pushed_bytes: Mutex::new(Vec::new()),
            streaming: true,
        }
    }

    /// Queues the text returned by the next unanswered push.
    pub fn with_push_text(self, text: &str) -> Self {
        self.push_texts.lock().unwrap().push_back(text.to_string());
        self
    }

    /// Sets the tail text returned by `flush_stream`.
    pub fn with_flush_text(self, text: &str) -> Self {
        *self.flush_text.lock().unwrap() = Some(text.to_string());
        self
    }

    /// Sets the one-shot `transcribe` result (final pass).
    pub fn with_transcribe_text(self, text: &str) -> Self {
        *self.transcribe_text.lock().unwrap() = Some(text.to_string());
        self
    }

    /// Makes every push fail.
    pub fn with_push_failure(self) -> Self {
        *self.fail_pushes.lock().unwrap() = true;
        self
    }

    /// Pretends to be a backend without stateful streaming.
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Actions invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Byte length of every pushed window, in order.
    pub fn pushed_bytes(&self) -> Vec<usize> {
        self.pushed_bytes.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl Default for MockAsrEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsrEngine for MockAsrEngine {
    async fn warmup(&self) -> Result<()> {
        self.record("warmup");
        Ok(())
    }

    async fn start_stream(&self, _sample_rate: u32, _context: StreamContext) -> Result<()> {
        self.record("stream_reset");
        Ok(())
    }

    async fn push_stream(&self, audio: &[u8], _sample_rate: u32) -> Result<String> {
        self.record("stream_push");
        self.pushed_bytes.lock().unwrap().push(audio.len());

        if *self.fail_pushes.lock().unwrap() {
            return Err(crate::error::DictflowError::Asr {
                message: "mock push failure".to_string(),
            });
        }

        Ok(self
            .push_texts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn flush_stream(&self) -> Result<String> {
        self.record("stream_flush");
        Ok(self.flush_text.lock().unwrap().clone().unwrap_or_default())
    }

    async fn stop_stream(&self) -> Result<()> {
        self.record("stream_close");
        Ok(())
    }

    async fn transcribe(&self, audio: &[u8], _sample_rate: u32) -> Result<String> {
        self.record("transcribe");
        self.pushed_bytes.lock().unwrap().push(audio.len());
        Ok(self
            .transcribe_text
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default())
    }

    async fn shutdown(&self) {
        self.record("shutdown");
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}
