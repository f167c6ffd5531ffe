//! Push-to-talk session orchestration.
//!
//! Owns the state machine `idle → recording → transcribing → formatting
//! → injecting → idle` and wires the capture callback, ingestion queue,
//! window scheduler, ASR engine, text pipeline, and injector together.
//!
//! The hot path is logically single-threaded: all session mutation
//! happens from the single-flight ASR loop task or from the press/
//! release handlers, with short std-mutex critical sections that are
//! never held across an await.

use crate::asr::AsrEngine;
use crate::asr::backend::StreamContext;
use crate::audio::capture::CaptureSource;
use crate::audio::pcm;
use crate::audio::queue::{IngestQueue, PendingSlice};
use crate::clock::Clock;
use crate::defaults;
use crate::error::{DictflowError, Result};
use crate::format::TranscriptFormatter;
use crate::inject::TextInjector;
use crate::session::latency::{LatencyAccumulator, LatencyReport, LatencySample};
use crate::session::scheduler::{SchedulerConfig, WindowScheduler};
use crate::session::state::{FormatMode, SessionEvent, SessionStage, SessionState};
use crate::text::{dedup_overlap, rewrite_spoken_punctuation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

/// Session-level tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture chunk length handed to the recorder.
    pub chunk_ms: u32,
    /// Rewrite verbalised punctuation in live text.
    pub spoken_formatting_commands: bool,
    /// Re-transcribe the whole session at drain and correct the screen.
    pub final_pass: bool,
    /// Scheduler bounds, adaptivity, and speech gate.
    pub scheduler: SchedulerConfig,
    /// Streaming decoder context (stateful backends).
    pub stream_context: StreamContext,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_ms: defaults::LIVE_STREAM_CHUNK_MS,
            spoken_formatting_commands: true,
            final_pass: false,
            scheduler: SchedulerConfig::default(),
            stream_context: StreamContext::default(),
        }
    }
}

/// Append-only transcript buffers for one session.
#[derive(Debug, Default)]
struct Transcript {
    /// Stitched ASR output, pre-formatting.
    raw_parts: String,
    /// Text actually handed to the injector.
    live_injected: String,
    /// Spoken-punctuation rules applied (telemetry).
    commands_applied: u32,
}

/// One dictation session: press to record, release to finish.
pub struct Session {
    config: SessionConfig,
    engine: Arc<dyn AsrEngine>,
    injector: Arc<dyn TextInjector>,
    formatter: Arc<dyn TranscriptFormatter>,
    capture: Mutex<Box<dyn CaptureSource>>,
    clock: Arc<dyn Clock>,

    queue: Mutex<IngestQueue>,
    scheduler: Mutex<WindowScheduler>,
    transcript: Mutex<Transcript>,
    latency: Mutex<LatencyAccumulator>,
    state: Mutex<SessionState>,
    mode: Mutex<FormatMode>,

    recording: AtomicBool,
    intake_open: AtomicBool,
    asr_loop_active: AtomicBool,
    release_in_progress: AtomicBool,

    events: broadcast::Sender<SessionEvent>,
    /// Back-reference for handing the ASR loop task an owning handle.
    weak: Weak<Session>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn AsrEngine>,
        injector: Arc<dyn TextInjector>,
        formatter: Arc<dyn TranscriptFormatter>,
        capture: Box<dyn CaptureSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.scheduler.validate()?;

        let (events, _) = broadcast::channel(64);
        Ok(Arc::new_cyclic(|weak| Self {
            queue: Mutex::new(IngestQueue::new(config.final_pass, clock.clone())),
            scheduler: Mutex::new(WindowScheduler::new(config.scheduler.clone(), clock.clone())),
            config,
            engine,
            injector,
            formatter,
            capture: Mutex::new(capture),
            clock,
            transcript: Mutex::new(Transcript::default()),
            latency: Mutex::new(LatencyAccumulator::new()),
            state: Mutex::new(SessionState::idle()),
            mode: Mutex::new(FormatMode::default()),
            recording: AtomicBool::new(false),
            intake_open: AtomicBool::new(false),
            asr_loop_active: AtomicBool::new(false),
            release_in_progress: AtomicBool::new(false),
            events,
            weak: weak.clone(),
        }))
    }

    /// Subscribes to state, mode, and completion events. Lagging
    /// subscribers miss events rather than blocking the session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Copy of the current session state.
    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    pub fn format_mode(&self) -> FormatMode {
        *self.mode.lock().unwrap()
    }

    pub fn set_format_mode(&self, mode: FormatMode) {
        *self.mode.lock().unwrap() = mode;
        let _ = self.events.send(SessionEvent::ModeChanged(mode));
    }

    /// Latency summary of the most recent session.
    pub fn latency_report(&self) -> LatencyReport {
        self.latency.lock().unwrap().summarize()
    }

    /// Returns from `Error` to `Idle`.
    pub fn clear_error(&self) {
        let mut state = self.state.lock().unwrap();
        if state.stage == SessionStage::Error {
            *state = SessionState::idle();
            drop(state);
            let _ = self
                .events
                .send(SessionEvent::StateChanged(SessionState::idle()));
        }
    }

    fn set_stage(&self, stage: SessionStage) {
        let new_state = SessionState::stage(stage);
        *self.state.lock().unwrap() = new_state.clone();
        let _ = self.events.send(SessionEvent::StateChanged(new_state));
    }

    fn enter_error(&self, detail: impl Into<String>) {
        let new_state = SessionState::error(detail);
        tracing::warn!(detail = ?new_state.detail, "session entering error state");
        *self.state.lock().unwrap() = new_state.clone();
        let _ = self.events.send(SessionEvent::StateChanged(new_state));
    }

    fn stage(&self) -> SessionStage {
        self.state.lock().unwrap().stage
    }

    /// Push-to-talk pressed: start a session. Ignored unless the
    /// session is idle or showing a cleared-away error.
    pub async fn handle_press(&self) -> Result<()> {
        if !matches!(self.stage(), SessionStage::Idle | SessionStage::Error) {
            return Ok(());
        }
        let Some(session) = self.weak.upgrade() else {
            return Ok(());
        };

        // Fresh buffers and scheduler state for the new session.
        {
            let mut queue = self.queue.lock().unwrap();
            *queue = IngestQueue::new(self.config.final_pass, self.clock.clone());
        }
        self.scheduler.lock().unwrap().reset();
        *self.transcript.lock().unwrap() = Transcript::default();
        self.latency.lock().unwrap().reset();

        self.set_stage(SessionStage::Recording);
        self.recording.store(true, Ordering::SeqCst);
        self.intake_open.store(true, Ordering::SeqCst);

        // Capture feeds the queue from its own thread; the callback
        // stays O(1): copy in, make sure the consumer loop is running.
        let handle = tokio::runtime::Handle::current();
        let on_chunk = Box::new(move |chunk: Vec<u8>| {
            if !session.intake_open.load(Ordering::SeqCst) {
                return;
            }
            session.queue.lock().unwrap().enqueue(chunk);
            session.ensure_asr_loop(&handle);
        });

        if let Err(e) = self
            .capture
            .lock()
            .unwrap()
            .start_streaming(self.config.chunk_ms, on_chunk)
        {
            self.recording.store(false, Ordering::SeqCst);
            self.intake_open.store(false, Ordering::SeqCst);
            self.enter_error(e.to_string());
            return Err(e);
        }

        if self.engine.is_streaming()
            && let Err(e) = self
                .engine
                .start_stream(defaults::SAMPLE_RATE, self.config.stream_context)
                .await
        {
            // Roll the recorder back before surfacing the error.
            self.recording.store(false, Ordering::SeqCst);
            self.intake_open.store(false, Ordering::SeqCst);
            let _ = self.capture.lock().unwrap().stop();
            self.enter_error(e.to_string());
            return Err(e);
        }

        Ok(())
    }

    /// Push-to-talk released: drain, flush, final-pass, format, finish.
    /// Ignored while a previous release is still completing or when the
    /// session never started recording.
    pub async fn handle_release(&self) -> Result<()> {
        if self
            .release_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let result = self.drain().await;
        self.release_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn drain(&self) -> Result<()> {
        match self.stage() {
            SessionStage::Recording => {}
            SessionStage::Error => {
                // A fatal mid-session error already surfaced; just make
                // sure the recorder is no longer running.
                self.recording.store(false, Ordering::SeqCst);
                let _ = self.capture.lock().unwrap().stop();
                self.intake_open.store(false, Ordering::SeqCst);
                return Ok(());
            }
            _ => return Ok(()),
        }

        self.set_stage(SessionStage::Transcribing);

        // Stop intake. The recorder may still hand over a final short
        // chunk during stop(); intake closes after that.
        self.recording.store(false, Ordering::SeqCst);
        if let Err(e) = self.capture.lock().unwrap().stop() {
            tracing::warn!("recorder stop failed: {}", e);
        }
        self.intake_open.store(false, Ordering::SeqCst);

        // Force-flush everything left in the queue through ASR.
        self.wait_for_drain().await;
        if self.stage() == SessionStage::Error {
            return Ok(());
        }

        // Tail text still buffered in a stateful decoder goes through
        // the same rewrite/dedup path as live windows.
        if self.engine.is_streaming() {
            match self.engine.flush_stream().await {
                Ok(tail) => {
                    if !tail.trim().is_empty() && !self.emit_transcript_chunk(&tail, None).await {
                        return Ok(());
                    }
                }
                Err(e) => tracing::warn!("stream flush failed, skipping tail: {}", e),
            }

            if let Err(e) = self.engine.stop_stream().await {
                tracing::debug!("stream close failed: {}", e);
            }
        }

        let mut raw = normalize_final(&self.transcript.lock().unwrap().raw_parts);

        // Final pass: one-shot re-transcription of the whole session,
        // correcting the live text when it disagrees.
        if self.config.final_pass {
            let full_audio = self.queue.lock().unwrap().full_audio().to_vec();
            if !full_audio.is_empty() {
                match self.engine.transcribe(&full_audio, defaults::SAMPLE_RATE).await {
                    Ok(final_text) => {
                        let final_raw = if self.config.spoken_formatting_commands {
                            rewrite_spoken_punctuation(&final_text).0
                        } else {
                            final_text
                        };
                        let final_raw = normalize_final(&final_raw);

                        if !final_raw.is_empty() && final_raw != raw {
                            if self.injector.supports_replacement() {
                                self.set_stage(SessionStage::Injecting);
                                let live = self.transcript.lock().unwrap().live_injected.clone();
                                match self
                                    .injector
                                    .replace_recent_text(live.trim(), &final_raw)
                                    .await
                                {
                                    Ok(()) => {
                                        self.transcript.lock().unwrap().live_injected =
                                            final_raw.clone();
                                    }
                                    Err(e) => {
                                        self.enter_error(e.to_string());
                                        return Err(e);
                                    }
                                }
                            }
                            raw = final_raw;
                        }
                    }
                    Err(e) => tracing::warn!("final pass failed, keeping live transcript: {}", e),
                }
            }
        }

        // Formatting. A formatter failure falls back to the raw text.
        let formatted = if raw.is_empty() {
            raw.clone()
        } else {
            self.set_stage(SessionStage::Formatting);
            let mode = self.format_mode();
            match self.formatter.format(mode, &raw).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("formatter failed, falling back to raw transcript: {}", e);
                    raw.clone()
                }
            }
        };

        if !raw.is_empty() {
            self.set_stage(SessionStage::Injecting);
            if formatted != raw && self.injector.supports_replacement() {
                let live = self.transcript.lock().unwrap().live_injected.clone();
                match self.injector.replace_recent_text(live.trim(), &formatted).await {
                    Ok(()) => {
                        self.transcript.lock().unwrap().live_injected = formatted.clone();
                    }
                    Err(e) => {
                        self.enter_error(e.to_string());
                        return Err(e);
                    }
                }
            }
        }

        let report = self.latency.lock().unwrap().summarize();
        tracing::info!(
            slices = report.slices,
            e2e_p50 = report.end_to_end_ms.p50,
            e2e_p95 = report.end_to_end_ms.p95,
            e2e_max = report.end_to_end_ms.max,
            asr_avg = report.asr_ms.avg,
            "session complete"
        );

        let _ = self.events.send(SessionEvent::DictationCompleted {
            raw: raw.clone(),
            formatted,
        });
        self.set_stage(SessionStage::Idle);
        Ok(())
    }

    /// Formatter/injector dry run from idle, used by the outer process
    /// to verify the output path without recording.
    pub async fn run_test_pipeline(&self, sample: &str) -> Result<String> {
        if self.stage() != SessionStage::Idle {
            return Err(DictflowError::Session {
                message: "test pipeline requires an idle session".to_string(),
            });
        }

        self.set_stage(SessionStage::Formatting);
        let mode = self.format_mode();
        let formatted = match self.formatter.format(mode, sample).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("formatter failed during test pipeline: {}", e);
                sample.to_string()
            }
        };

        self.set_stage(SessionStage::Injecting);
        if let Err(e) = self.injector.inject(&format!("{} ", formatted.trim_end())).await {
            self.enter_error(e.to_string());
            return Err(e);
        }

        self.set_stage(SessionStage::Idle);
        Ok(formatted)
    }

    /// Spawns the single-flight ASR loop unless it is already running.
    fn ensure_asr_loop(&self, handle: &tokio::runtime::Handle) {
        if self
            .asr_loop_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            match self.weak.upgrade() {
                Some(session) => {
                    handle.spawn(async move { session.asr_loop().await });
                }
                None => self.asr_loop_active.store(false, Ordering::SeqCst),
            }
        }
    }

    /// The single consumer of the ingestion queue.
    async fn asr_loop(self: Arc<Self>) {
        loop {
            loop {
                let slice = {
                    let mut queue = self.queue.lock().unwrap();
                    let recording = self.recording.load(Ordering::SeqCst);
                    let take = self
                        .scheduler
                        .lock()
                        .unwrap()
                        .next_take_bytes(queue.pending_bytes(), recording);
                    match take {
                        Some(n) => queue.take(n),
                        None => None,
                    }
                };

                match slice {
                    Some(slice) => {
                        if !self.process_slice(slice).await {
                            self.asr_loop_active.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    None => break,
                }
            }

            self.asr_loop_active.store(false, Ordering::SeqCst);

            // Lost-wakeup guard: a chunk enqueued between the empty
            // check above and the flag reset would otherwise stall
            // until the next chunk arrives. Re-check and respawn.
            let more_work = {
                let queue = self.queue.lock().unwrap();
                let recording = self.recording.load(Ordering::SeqCst);
                self.scheduler
                    .lock()
                    .unwrap()
                    .next_take_bytes(queue.pending_bytes(), recording)
                    .is_some()
            };

            if more_work
                && self.stage() != SessionStage::Error
                && self
                    .asr_loop_active
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                continue;
            }
            break;
        }
    }

    /// Runs one slice through gate → ASR → rewrite → dedup → inject.
    /// Returns false when the session hit a fatal error.
    async fn process_slice(&self, slice: PendingSlice) -> bool {
        let queue_ms = self
            .clock
            .now()
            .saturating_duration_since(slice.oldest_enqueued_at)
            .as_millis() as u64;
        let audio_ms = pcm::bytes_to_ms(slice.bytes.len());

        // Silent slice past the hangover: scheduling already accounted
        // for the bytes, but there is nothing worth decoding.
        if !self.scheduler.lock().unwrap().gate_allows(&slice.bytes) {
            tracing::trace!(audio_ms, "slice gated as silence");
            return true;
        }

        let asr_started = self.clock.now();
        let result = self
            .engine
            .push_stream(&slice.bytes, defaults::SAMPLE_RATE)
            .await;
        let asr_ms = self
            .clock
            .now()
            .saturating_duration_since(asr_started)
            .as_millis() as u64;

        // The feedback loop learns from failures too.
        let pending_ms = pcm::bytes_to_ms(self.queue.lock().unwrap().pending_bytes());
        self.scheduler
            .lock()
            .unwrap()
            .record_asr_result(audio_ms, asr_ms, pending_ms);

        let text = match result {
            Ok(text) => text,
            Err(DictflowError::WorkerExited { code, signal }) => {
                self.enter_error(format!(
                    "ASR worker exited (code {:?}, signal {:?})",
                    code, signal
                ));
                return false;
            }
            Err(e) => {
                tracing::debug!("ASR request failed, dropping slice: {}", e);
                return true;
            }
        };

        if text.trim().is_empty() {
            return true;
        }

        self.emit_transcript_chunk(
            &text,
            Some(SliceTiming {
                queue_ms,
                audio_ms,
                asr_ms,
                oldest_enqueued_at: slice.oldest_enqueued_at,
            }),
        )
        .await
    }

    /// Rewrite, dedup, append, inject. Returns false on fatal error.
    async fn emit_transcript_chunk(&self, text: &str, timing: Option<SliceTiming>) -> bool {
        let (chunk, commands) = if self.config.spoken_formatting_commands {
            rewrite_spoken_punctuation(text)
        } else {
            (text.to_string(), 0)
        };
        if chunk.trim().is_empty() {
            return true;
        }

        let deduped = {
            let transcript = self.transcript.lock().unwrap();
            dedup_overlap(&transcript.live_injected, &chunk)
        };
        if deduped.trim().is_empty() {
            return true;
        }

        // One trailing space so consecutive dictations flow naturally.
        let normalized = format!("{} ", deduped.trim_end_matches([' ', '\t']));

        let inject_started = self.clock.now();
        if let Err(e) = self.injector.inject(&normalized).await {
            self.enter_error(e.to_string());
            return false;
        }
        let inject_ms = self
            .clock
            .now()
            .saturating_duration_since(inject_started)
            .as_millis() as u64;

        {
            let mut transcript = self.transcript.lock().unwrap();
            transcript.raw_parts.push_str(&normalized);
            transcript.live_injected.push_str(&normalized);
            transcript.commands_applied += commands;
        }

        if let Some(timing) = timing {
            let end_to_end_ms = self
                .clock
                .now()
                .saturating_duration_since(timing.oldest_enqueued_at)
                .as_millis() as u64;
            self.latency.lock().unwrap().push(LatencySample {
                queue_ms: timing.queue_ms,
                audio_ms: timing.audio_ms,
                asr_ms: timing.asr_ms,
                inject_ms,
                end_to_end_ms,
            });
        }

        true
    }

    /// Blocks until the queue is empty and the loop has wound down.
    async fn wait_for_drain(&self) {
        let handle = tokio::runtime::Handle::current();
        loop {
            if self.stage() == SessionStage::Error {
                return;
            }

            let pending = self.queue.lock().unwrap().pending_bytes();
            let active = self.asr_loop_active.load(Ordering::SeqCst);
            if pending == 0 && !active {
                return;
            }

            if pending > 0 {
                self.ensure_asr_loop(&handle);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

struct SliceTiming {
    queue_ms: u64,
    audio_ms: u64,
    asr_ms: u64,
    oldest_enqueued_at: std::time::Instant,
}

/// End-of-session transcript normalisation: strip horizontal whitespace
/// hanging before newlines, cap blank runs at one empty line, collapse
/// space runs, trim.
fn normalize_final(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end_matches([' ', '\t']));
    }

    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }

    out.trim().to_string()
}
