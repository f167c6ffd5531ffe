//! PCM ingestion queue.
//!
//! Buffers capture-side audio chunks between the producer callback and
//! the ASR scheduling loop. Enqueue is O(1); dequeue drains an arbitrary
//! byte count across chunk boundaries without copying on the enqueue
//! side. Bytes come back out in FIFO order, each byte exactly once.

use crate::clock::Clock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// A producer chunk awaiting consumption.
///
/// `read_offset` tracks partial consumption from the head: `take` may
/// drain only part of a chunk, leaving the rest for the next call.
#[derive(Debug)]
struct QueuedChunk {
    bytes: Vec<u8>,
    read_offset: usize,
    enqueued_at: Instant,
}

impl QueuedChunk {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.read_offset
    }
}

/// A contiguous slice of audio ready to hand to ASR.
#[derive(Debug, Clone)]
pub struct PendingSlice {
    /// The drained PCM bytes.
    pub bytes: Vec<u8>,
    /// Earliest `enqueued_at` of any chunk that contributed bytes.
    pub oldest_enqueued_at: Instant,
}

/// FIFO byte queue for PCM audio with scatter-gather dequeue.
pub struct IngestQueue {
    chunks: VecDeque<QueuedChunk>,
    pending_bytes: usize,
    /// Copy of every enqueued byte, for end-of-session re-transcription.
    full_audio: Vec<u8>,
    keep_full_audio: bool,
    clock: Arc<dyn Clock>,
}

impl IngestQueue {
    /// Creates a queue. `keep_full_audio` enables the session-wide copy
    /// used by the final pass; disable it to avoid the extra memory when
    /// no final pass will run.
    pub fn new(keep_full_audio: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            chunks: VecDeque::new(),
            pending_bytes: 0,
            full_audio: Vec::new(),
            keep_full_audio,
            clock,
        }
    }

    /// Appends a capture chunk. Empty chunks are ignored.
    pub fn enqueue(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }

        if self.keep_full_audio {
            self.full_audio.extend_from_slice(&bytes);
        }

        self.pending_bytes += bytes.len();
        self.chunks.push_back(QueuedChunk {
            bytes,
            read_offset: 0,
            enqueued_at: self.clock.now(),
        });
    }

    /// Drains up to `n_bytes` from the head of the queue.
    ///
    /// Returns `None` when the queue is empty or `n_bytes` is zero. The
    /// returned slice may span several chunks; fully consumed chunks are
    /// discarded, a partially consumed head keeps its offset.
    pub fn take(&mut self, n_bytes: usize) -> Option<PendingSlice> {
        if n_bytes == 0 || self.pending_bytes == 0 {
            return None;
        }

        let want = n_bytes.min(self.pending_bytes);
        let mut out = Vec::with_capacity(want);
        let mut oldest: Option<Instant> = None;

        while out.len() < want {
            let chunk = self
                .chunks
                .front_mut()
                .expect("pending_bytes > 0 implies a head chunk");

            oldest = Some(match oldest {
                Some(t) => t.min(chunk.enqueued_at),
                None => chunk.enqueued_at,
            });

            let need = want - out.len();
            let available = chunk.remaining();
            let grab = need.min(available);

            out.extend_from_slice(&chunk.bytes[chunk.read_offset..chunk.read_offset + grab]);
            chunk.read_offset += grab;

            if chunk.remaining() == 0 {
                self.chunks.pop_front();
            }
        }

        self.pending_bytes -= out.len();

        Some(PendingSlice {
            bytes: out,
            oldest_enqueued_at: oldest.expect("at least one chunk contributed"),
        })
    }

    /// Number of unconsumed bytes across all queued chunks.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// The session-wide copy of all enqueued audio.
    ///
    /// Empty when full-audio retention is disabled.
    pub fn full_audio(&self) -> &[u8] {
        &self.full_audio
    }

    /// Discards all queued chunks and the full-audio copy.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pending_bytes = 0;
        self.full_audio.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MockClock, SystemClock};
    use std::time::Duration;

    fn queue() -> IngestQueue {
        IngestQueue::new(true, Arc::new(SystemClock))
    }

    /// Recomputes the pending count the slow way to check the counter.
    fn true_pending(q: &IngestQueue) -> usize {
        q.chunks.iter().map(|c| c.remaining()).sum()
    }

    #[test]
    fn test_empty_queue_take_returns_none() {
        let mut q = queue();
        assert!(q.take(100).is_none());
        assert_eq!(q.pending_bytes(), 0);
    }

    #[test]
    fn test_enqueue_empty_chunk_is_noop() {
        let mut q = queue();
        q.enqueue(Vec::new());
        assert_eq!(q.pending_bytes(), 0);
        assert!(q.full_audio().is_empty());
    }

    #[test]
    fn test_take_zero_bytes_returns_none() {
        let mut q = queue();
        q.enqueue(vec![1, 2, 3]);
        assert!(q.take(0).is_none());
        assert_eq!(q.pending_bytes(), 3);
    }

    #[test]
    fn test_pending_bytes_tracks_enqueue_and_take() {
        let mut q = queue();
        q.enqueue(vec![0; 100]);
        q.enqueue(vec![0; 50]);
        assert_eq!(q.pending_bytes(), 150);
        assert_eq!(q.pending_bytes(), true_pending(&q));

        q.take(60).unwrap();
        assert_eq!(q.pending_bytes(), 90);
        assert_eq!(q.pending_bytes(), true_pending(&q));

        q.take(90).unwrap();
        assert_eq!(q.pending_bytes(), 0);
        assert_eq!(q.pending_bytes(), true_pending(&q));
    }

    #[test]
    fn test_take_spans_multiple_chunks() {
        let mut q = queue();
        q.enqueue(vec![1, 2, 3]);
        q.enqueue(vec![4, 5, 6]);
        q.enqueue(vec![7, 8, 9]);

        let slice = q.take(7).unwrap();
        assert_eq!(slice.bytes, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(q.pending_bytes(), 2);

        let rest = q.take(10).unwrap();
        assert_eq!(rest.bytes, vec![8, 9]);
        assert_eq!(q.pending_bytes(), 0);
    }

    #[test]
    fn test_partial_take_advances_head_offset() {
        let mut q = queue();
        q.enqueue(vec![10, 11, 12, 13]);

        let first = q.take(2).unwrap();
        assert_eq!(first.bytes, vec![10, 11]);

        let second = q.take(2).unwrap();
        assert_eq!(second.bytes, vec![12, 13]);
    }

    #[test]
    fn test_take_clamps_to_available() {
        let mut q = queue();
        q.enqueue(vec![1, 2, 3]);
        let slice = q.take(1_000).unwrap();
        assert_eq!(slice.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_taken_bytes_form_prefix_of_enqueued() {
        // Arbitrary enqueue/take interleaving: concatenated takes must be
        // a prefix of concatenated enqueues, with no byte twice.
        let mut q = queue();
        let mut enqueued = Vec::new();
        let mut taken = Vec::new();

        let mut next = 0u8;
        for (enq_len, take_len) in [(5, 3), (7, 6), (2, 0), (9, 11), (1, 4)] {
            let chunk: Vec<u8> = (0..enq_len).map(|_| {
                let b = next;
                next = next.wrapping_add(1);
                b
            }).collect();
            enqueued.extend_from_slice(&chunk);
            q.enqueue(chunk);

            if take_len > 0
                && let Some(slice) = q.take(take_len)
            {
                taken.extend_from_slice(&slice.bytes);
            }
        }

        assert_eq!(taken, enqueued[..taken.len()]);
        assert_eq!(q.pending_bytes(), enqueued.len() - taken.len());
    }

    #[test]
    fn test_oldest_enqueued_at_is_head_timestamp() {
        let clock = Arc::new(MockClock::new());
        let mut q = IngestQueue::new(false, clock.clone());

        q.enqueue(vec![0; 4]);
        let first_at = clock.now();
        clock.advance(Duration::from_millis(100));
        q.enqueue(vec![0; 4]);

        // Slice spans both chunks; oldest must be the first chunk's stamp.
        let slice = q.take(6).unwrap();
        assert_eq!(slice.oldest_enqueued_at, first_at);

        // Remaining bytes all come from the second chunk.
        let tail = q.take(2).unwrap();
        assert_eq!(
            tail.oldest_enqueued_at,
            first_at + Duration::from_millis(100)
        );
    }

    #[test]
    fn test_full_audio_accumulates_everything() {
        let mut q = queue();
        q.enqueue(vec![1, 2]);
        q.enqueue(vec![3, 4]);
        q.take(3);
        // Consumption must not affect the full-audio copy.
        assert_eq!(q.full_audio(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_full_audio_disabled() {
        let mut q = IngestQueue::new(false, Arc::new(SystemClock));
        q.enqueue(vec![1, 2, 3]);
        assert!(q.full_audio().is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut q = queue();
        q.enqueue(vec![1, 2, 3]);
        q.clear();
        assert_eq!(q.pending_bytes(), 0);
        assert!(q.full_audio().is_empty());
        assert!(q.take(1).is_none());
    }
}
