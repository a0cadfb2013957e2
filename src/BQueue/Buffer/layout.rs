use std::sync::atomic::{AtomicU64, AtomicUsize};

/// Cursors written only by the producer side of an [`super::AdaptiveQueue`].
///
/// `head` is the next sequence to write; every slot in `[head, batch_head)`
/// is known to be free without looking at it. Both are plain sequence
/// counters that wrap at `u64::MAX` and are masked on every slot access.
#[repr(C)]
#[derive(Default)]
pub struct ProducerCursors {
    /// Next sequence to write.
    pub head: AtomicU64,

    /// Exclusive end of the run known to be free.
    pub batch_head: AtomicU64,

    /// Reservations that found the probed slot still occupied.
    pub enqueue_fulls: AtomicU64,
}

/// Cursors written only by the consumer side of an [`super::AdaptiveQueue`].
///
/// Every slot in `[tail, batch_tail)` is known to be occupied. The producer
/// never reads these; they are atomics only so that `Debug`, `len()` and
/// stats can be observed from other threads without a data race.
#[repr(C)]
pub struct ConsumerCursors {
    /// Next sequence to read.
    pub tail: AtomicU64,

    /// Exclusive end of the run known to be occupied.
    pub batch_tail: AtomicU64,

    /// Probe distance carried between backtracking rounds.
    pub batch_history: AtomicUsize,

    /// Backtracking rounds run by the consumer.
    pub backtrackings: AtomicU64,
}

impl ConsumerCursors {
    pub fn new(consumer_batch: usize) -> Self {
        Self {
            tail: AtomicU64::new(0),
            batch_tail: AtomicU64::new(0),
            batch_history: AtomicUsize::new(consumer_batch),
            backtrackings: AtomicU64::new(0),
        }
    }
}
