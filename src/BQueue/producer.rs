// In src/BQueue/producer.rs
use super::Buffer::{AdaptiveQueue, SlotElement};
use super::Structs::{QueueStats, Wait};
use std::fmt;
use std::sync::Arc;

/// The writing end of an adaptive queue.
///
/// There is exactly one per queue: the handle is not `Clone` and every
/// operation takes `&mut self`.
pub struct Producer<T: SlotElement> {
    queue: Arc<AdaptiveQueue<T>>,
}

impl<T: SlotElement> Producer<T> {
    pub(crate) fn new(queue: Arc<AdaptiveQueue<T>>) -> Self {
        Self { queue }
    }

    /// Reserve room for at least `batch` writes; returns the free run or 0.
    pub fn try_reserve_for_write(&mut self, batch: usize, wait: Wait) -> usize {
        // SAFETY: `&mut self` on the unique producer handle.
        unsafe { self.queue.try_reserve_for_write(batch, wait) }
    }

    /// Slots still reserved by earlier calls.
    pub fn reserved(&self) -> usize {
        unsafe { self.queue.reserved() }
    }

    /// Write into a slot obtained from [`Producer::try_reserve_for_write`].
    ///
    /// # Panics
    /// If no reserved slot is left.
    pub fn write(&mut self, value: T) {
        unsafe { self.queue.write(value) }
    }

    /// Blocks until there is room, then publishes `value`.
    pub fn push(&mut self, value: T) {
        if unsafe { self.queue.reserved() } == 0 {
            self.try_reserve_for_write(1, Wait::Block);
        }
        self.write(value);
    }

    /// Publishes `value`, or hands it back if the ring stayed full for `wait`.
    pub fn try_push(&mut self, value: T, wait: Wait) -> Result<(), T> {
        if unsafe { self.queue.reserved() } == 0 && self.try_reserve_for_write(1, wait) == 0 {
            return Err(value);
        }
        self.write(value);
        Ok(())
    }

    /// Blocks until there is room, then publishes the value built from the
    /// sequence number it lands on.
    pub fn push_with(&mut self, make: impl FnOnce(u64) -> T) {
        if unsafe { self.queue.reserved() } == 0 {
            self.try_reserve_for_write(1, Wait::Block);
        }
        let seq = unsafe { self.queue.head() };
        self.write(make(seq));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl<T: SlotElement> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_adaptive_queue("Producer", &self.queue, f)
    }
}
