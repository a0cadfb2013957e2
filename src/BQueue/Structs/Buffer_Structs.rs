// Plain value types shared by the queue, channel and mailbox layers

use crate::error::ConfigError;
use crossbeam_utils::Backoff;
use std::time::{Duration, Instant};

/// How long a blocking operation may wait.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Wait {
    /// Probe once and return immediately.
    #[default]
    NoWait,
    /// Wait until the condition holds.
    Block,
    /// Wait at most this long.
    Timeout(Duration),
}

impl Wait {
    /// Length of one tick accepted by [`Wait::from_ticks`].
    pub const TICK: Duration = Duration::from_nanos(100);

    /// Converts a tick count (100 ns units): `0` is no wait, negative blocks.
    pub fn from_ticks(ticks: i64) -> Self {
        match ticks {
            0 => Wait::NoWait,
            t if t < 0 => Wait::Block,
            t => Wait::Timeout(Duration::from_nanos(
                (t as u64).saturating_mul(Self::TICK.as_nanos() as u64),
            )),
        }
    }

    /// Spins, then yields, until `ready` holds or the wait runs out.
    ///
    /// `ready` is always evaluated at least once. Returns its last result.
    pub fn spin_until(self, mut ready: impl FnMut() -> bool) -> bool {
        if ready() {
            return true;
        }
        let deadline = match self {
            Wait::NoWait => return false,
            Wait::Block => None,
            // a timeout past the end of the clock never expires
            Wait::Timeout(d) => Instant::now().checked_add(d),
        };
        let backoff = Backoff::new();
        loop {
            backoff.snooze();
            if ready() {
                return true;
            }
            if backoff.is_completed() {
                std::thread::yield_now();
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return ready();
                }
            }
        }
    }
}

/// Batch parameters of an adaptive queue.
///
/// - `producer_batch`: minimum run the producer tries to reserve at once.
/// - `consumer_batch`: maximum probe distance of a backtracking round.
/// - `increment`: how far the probe distance grows after a round.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub producer_batch: usize,
    pub consumer_batch: usize,
    pub increment: usize,
}

impl BatchConfig {
    /// Defaults for a ring of `capacity` slots: `cap/16`, `cap/16`, `cap/32`,
    /// each at least 1 and below `capacity`.
    pub fn for_capacity(capacity: usize) -> Self {
        let clamp = |v: usize| v.max(1).min(capacity.saturating_sub(1).max(1));
        Self {
            producer_batch: clamp(capacity / 16),
            consumer_batch: clamp(capacity / 16),
            increment: clamp(capacity / 32),
        }
    }

    pub fn validate(&self, capacity: usize) -> Result<(), ConfigError> {
        for (name, value) in [
            ("producer_batch", self.producer_batch),
            ("consumer_batch", self.consumer_batch),
            ("increment", self.increment),
        ] {
            if value == 0 || value >= capacity {
                return Err(ConfigError::BatchOutOfRange {
                    name,
                    value,
                    capacity,
                });
            }
        }
        Ok(())
    }
}

/// Counters sampled from a queue. Reads are relaxed, so a snapshot taken
/// while both sides run is approximate.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    /// Elements written and not yet freed, as seen by the cursors.
    pub len: usize,
    pub enqueue_fulls: u64,
    pub backtrackings: u64,
    pub batch_history: usize,
}
