//! PCM byte arithmetic and signal measurement.
//!
//! The pipeline is fixed at 16kHz mono 16-bit signed little-endian PCM.
//! All duration/byte conversions in the scheduler and queue go through
//! this module so the two directions cannot drift apart.

use crate::defaults;

/// Converts a duration in milliseconds to a PCM byte count.
///
/// Never returns zero: callers use the result as a take/threshold size,
/// and a zero-byte window would stall the scheduler.
pub fn ms_to_bytes(ms: u64) -> usize {
    let bytes =
        (defaults::SAMPLE_RATE as u64 * defaults::BYTES_PER_SAMPLE as u64 * ms) / 1000;
    bytes.max(1) as usize
}

/// Converts a PCM byte count to a duration in milliseconds.
pub fn bytes_to_ms(bytes: usize) -> u64 {
    (bytes as u64 * 1000) / (defaults::SAMPLE_RATE as u64 * defaults::BYTES_PER_SAMPLE as u64)
}

/// Computes the RMS level of a PCM slice in dBFS.
///
/// Samples are scaled so ±full-scale corresponds to 0 dBFS. Digital
/// silence returns `f64::NEG_INFINITY`, which compares below any gate
/// threshold. A trailing odd byte (torn sample) is ignored.
pub fn rms_dbfs(pcm: &[u8]) -> f64 {
    let mut sum_squares = 0.0_f64;
    let mut count = 0_usize;

    for pair in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64 / i16::MAX as f64;
        sum_squares += sample * sample;
        count += 1;
    }

    if count == 0 {
        return f64::NEG_INFINITY;
    }

    let rms = (sum_squares / count as f64).sqrt();
    if rms <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}
