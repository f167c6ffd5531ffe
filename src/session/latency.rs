//! Per-session latency accounting.
//!
//! Every processed slice contributes one sample; at session end the
//! vector is collapsed into percentile summaries and logged.

/// Timings for one slice's trip through the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySample {
    /// Time the oldest contributing byte waited in the queue.
    pub queue_ms: u64,
    /// Audio duration of the slice.
    pub audio_ms: u64,
    /// ASR call duration.
    pub asr_ms: u64,
    /// Injector call duration.
    pub inject_ms: u64,
    /// Oldest byte enqueued to text on screen.
    pub end_to_end_ms: u64,
}

/// Percentile summary of one metric, integer milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatSummary {
    pub p50: u64,
    pub p95: u64,
    pub max: u64,
    pub avg: u64,
}

/// Session-level latency report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyReport {
    pub slices: usize,
    pub queue_ms: StatSummary,
    pub asr_ms: StatSummary,
    pub inject_ms: StatSummary,
    pub end_to_end_ms: StatSummary,
}

/// Collects samples for one session.
#[derive(Debug, Default)]
pub struct LatencyAccumulator {
    samples: Vec<LatencySample>,
}

impl LatencyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all samples (session start).
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Records one slice.
    pub fn push(&mut self, sample: LatencySample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Collapses the samples into a report. No samples yields zeros.
    pub fn summarize(&self) -> LatencyReport {
        LatencyReport {
            slices: self.samples.len(),
            queue_ms: summarize_metric(&self.samples, |s| s.queue_ms),
            asr_ms: summarize_metric(&self.samples, |s| s.asr_ms),
            inject_ms: summarize_metric(&self.samples, |s| s.inject_ms),
            end_to_end_ms: summarize_metric(&self.samples, |s| s.end_to_end_ms),
        }
    }
}

/// Percentile p over ascending-sorted values: index `ceil(n*p) - 1`,
/// floored at zero.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() as f64 * p).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

fn summarize_metric(samples: &[LatencySample], metric: impl Fn(&LatencySample) -> u64) -> StatSummary {
    if samples.is_empty() {
        return StatSummary::default();
    }

    let mut values: Vec<u64> = samples.iter().map(metric).collect();
    values.sort_unstable();

    let sum: u64 = values.iter().sum();
    let avg = ((sum as f64 / values.len() as f64).round()) as u64;

    StatSummary {
        p50: percentile(&values, 0.50),
        p95: percentile(&values, 0.95),
        max: *values.last().expect("non-empty"),
        avg,
    }
}
