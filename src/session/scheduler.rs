//! Adaptive ASR window scheduling.
//!
//! Decides how much queued audio to hand to ASR on each call. Small
//! windows keep latency low; when the engine falls behind real time the
//! scheduler widens windows so each call amortises more audio, then
//! shrinks back once the queue drains. The feedback signal is an EWMA
//! of the real-time factor (ASR elapsed time over audio duration).

use crate::audio::pcm;
use crate::clock::Clock;
use crate::defaults;
use crate::error::{DictflowError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Window growth per adjustment when backlogged or slower than real time.
const WIDEN_STEP_MS: i64 = 24;

/// Window shrink when the queue is empty-ish and ASR is fast.
const SHRINK_FAST_STEP_MS: i64 = 10;

/// Window shrink when lightly loaded.
const SHRINK_LIGHT_STEP_MS: i64 = 4;

/// RTF below which the engine counts as fast.
const FAST_RTF: f64 = 0.68;

/// RTF below which the engine counts as comfortably ahead.
const COMFORTABLE_RTF: f64 = 0.80;

/// Scheduler bounds and gate settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Smallest window taken while recording (ms).
    pub min_window_ms: u32,
    /// Baseline window when not adapting (ms).
    pub normal_window_ms: u32,
    /// Queue depth that counts as backlog (ms).
    pub backlog_window_ms: u32,
    /// Largest window ever taken (ms).
    pub max_window_ms: u32,
    /// Enable the EWMA feedback loop.
    pub adaptive: bool,
    /// RMS threshold below which a slice is silence (dBFS).
    pub silence_gate_dbfs: f64,
    /// Grace period after speech during which silence still reaches ASR.
    pub speech_hangover_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_window_ms: defaults::MIN_ASR_WINDOW_MS,
            normal_window_ms: defaults::NORMAL_ASR_WINDOW_MS,
            backlog_window_ms: defaults::BACKLOG_ASR_WINDOW_MS,
            max_window_ms: defaults::MAX_ASR_WINDOW_MS,
            adaptive: true,
            silence_gate_dbfs: defaults::SILENCE_GATE_DBFS,
            speech_hangover_ms: defaults::SPEECH_HANGOVER_MS,
        }
    }
}

impl SchedulerConfig {
    /// Window bounds must be monotonically non-decreasing.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            self.min_window_ms,
            self.normal_window_ms,
            self.backlog_window_ms,
            self.max_window_ms,
        ];
        if windows.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(DictflowError::ConfigInvalidValue {
                key: "asr_window_ms".to_string(),
                message: format!(
                    "window bounds must be non-decreasing: min {} <= normal {} <= backlog {} <= max {}",
                    windows[0], windows[1], windows[2], windows[3]
                ),
            });
        }
        if self.min_window_ms == 0 {
            return Err(DictflowError::ConfigInvalidValue {
                key: "min_asr_window_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-session scheduling state.
pub struct WindowScheduler {
    config: SchedulerConfig,
    dynamic_normal_ms: u32,
    ewma_rtf: f64,
    ewma_asr_ms: f64,
    hangover_until: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl WindowScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let dynamic_normal_ms = config.normal_window_ms;
        Self {
            config,
            dynamic_normal_ms,
            ewma_rtf: 0.0,
            ewma_asr_ms: 0.0,
            hangover_until: None,
            clock,
        }
    }

    /// Resets the adaptive state for a fresh session.
    pub fn reset(&mut self) {
        self.dynamic_normal_ms = self.config.normal_window_ms;
        self.ewma_rtf = 0.0;
        self.ewma_asr_ms = 0.0;
        self.hangover_until = None;
    }

    /// How many bytes to take next, or `None` to defer.
    ///
    /// While recording, nothing is taken until at least a minimum
    /// window has accumulated. After recording stops, everything left
    /// is taken regardless of size (force-flush on drain).
    pub fn next_take_bytes(&self, pending_bytes: usize, recording: bool) -> Option<usize> {
        if pending_bytes == 0 {
            return None;
        }

        if !recording {
            return Some(pending_bytes);
        }

        if pending_bytes < pcm::ms_to_bytes(self.config.min_window_ms as u64) {
            return None;
        }

        let pending_ms = pcm::bytes_to_ms(pending_bytes);

        let mut target_ms = if self.config.adaptive {
            self.dynamic_normal_ms
        } else {
            self.config.normal_window_ms
        };

        if pending_ms >= 2 * self.config.backlog_window_ms as u64 {
            target_ms = self.config.max_window_ms;
        } else if pending_ms >= self.config.backlog_window_ms as u64 {
            target_ms = target_ms.max(self.config.backlog_window_ms);
        }
        target_ms = target_ms.clamp(self.config.min_window_ms, self.config.max_window_ms);

        Some(pending_bytes.min(pcm::ms_to_bytes(target_ms as u64)))
    }

    /// Feeds one completed ASR call into the EWMAs and, when adaptive,
    /// nudges the dynamic window. `pending_ms` is the queue depth after
    /// the call, which is what the next window decision will see.
    pub fn record_asr_result(&mut self, audio_ms: u64, asr_elapsed_ms: u64, pending_ms: u64) {
        let alpha = defaults::RTF_EWMA_ALPHA;
        let rtf = asr_elapsed_ms as f64 / audio_ms.max(1) as f64;
        self.ewma_rtf = (1.0 - alpha) * self.ewma_rtf + alpha * rtf;
        self.ewma_asr_ms = (1.0 - alpha) * self.ewma_asr_ms + alpha * asr_elapsed_ms as f64;

        if !self.config.adaptive {
            return;
        }

        let mut next = self.dynamic_normal_ms as i64;
        if pending_ms >= self.config.backlog_window_ms as u64 || self.ewma_rtf > 1.0 {
            next += WIDEN_STEP_MS;
        } else if pending_ms <= self.config.min_window_ms as u64 && self.ewma_rtf < FAST_RTF {
            next -= SHRINK_FAST_STEP_MS;
        } else if pending_ms <= (self.config.normal_window_ms / 2) as u64
            && self.ewma_rtf < COMFORTABLE_RTF
        {
            next -= SHRINK_LIGHT_STEP_MS;
        }

        self.dynamic_normal_ms =
            (next.clamp(self.config.min_window_ms as i64, self.config.max_window_ms as i64)) as u32;
    }

    /// Speech gate: decides whether a slice is worth sending to ASR.
    ///
    /// Audio at or above the gate threshold arms a hangover window;
    /// quieter audio passes only while the hangover is still running.
    pub fn gate_allows(&mut self, slice: &[u8]) -> bool {
        let level = pcm::rms_dbfs(slice);
        let now = self.clock.now();

        if level >= self.config.silence_gate_dbfs {
            self.hangover_until =
                Some(now + Duration::from_millis(self.config.speech_hangover_ms));
            return true;
        }

        match self.hangover_until {
            Some(until) => now <= until,
            None => false,
        }
    }

    /// Current adaptive window target in milliseconds.
    pub fn dynamic_normal_ms(&self) -> u32 {
        self.dynamic_normal_ms
    }

    /// Smoothed real-time factor.
    pub fn ewma_rtf(&self) -> f64 {
        self.ewma_rtf
    }

    /// Smoothed per-call ASR latency in milliseconds.
    pub fn ewma_asr_ms(&self) -> f64 {
        self.ewma_asr_ms
    }

    #[cfg(test)]
    pub(crate) fn set_ewma_rtf(&mut self, value: f64) {
        self.ewma_rtf = value;
    }
}
