// src/BQueue/consumer.rs

use super::Buffer::{AdaptiveQueue, SlotElement};
use super::Structs::{QueueStats, Wait};
use std::fmt;
use std::sync::Arc;

/// The reading end of an adaptive queue. Unique per queue, like [`super::Producer`].
pub struct Consumer<T: SlotElement> {
    queue: Arc<AdaptiveQueue<T>>,
}

impl<T: SlotElement> Consumer<T> {
    pub(crate) fn new(queue: Arc<AdaptiveQueue<T>>) -> Self {
        Self { queue }
    }

    /// Elements already known to be ready; no slot is probed.
    pub fn available(&self) -> usize {
        // SAFETY: the unique consumer handle; this only reads consumer cursors.
        unsafe { self.queue.available() }
    }

    /// Number of ready elements, backtracking and waiting up to `wait`.
    /// Returns 0 if none arrived.
    pub fn wait_for_data(&mut self, wait: Wait) -> usize {
        unsafe { self.queue.wait_for_data(wait) }
    }

    /// Blocks until an element is ready and takes it.
    pub fn pop(&mut self) -> T {
        if self.available() == 0 {
            self.wait_for_data(Wait::Block);
        }
        unsafe { self.queue.read() }
    }

    /// Takes the next element if one becomes ready within `wait`.
    pub fn try_pop(&mut self, wait: Wait) -> Option<T> {
        if self.available() == 0 && self.wait_for_data(wait) == 0 {
            return None;
        }
        Some(unsafe { self.queue.read() })
    }

    /// True if the next slot holds an element, without claiming it.
    pub fn has_data(&self) -> bool {
        self.queue.has_data()
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

impl<T: SlotElement + Copy> Consumer<T> {
    /// Reads the next ready element without releasing its slot.
    pub fn peek(&mut self) -> Option<T> {
        if self.available() == 0 && self.wait_for_data(Wait::NoWait) == 0 {
            return None;
        }
        Some(unsafe { self.queue.peek() })
    }

    /// Releases the slot returned by the last [`Consumer::peek`].
    ///
    /// # Panics
    /// If nothing is ready.
    pub fn free_tail(&mut self) {
        assert!(self.available() > 0, "free_tail with no ready element");
        unsafe { self.queue.free_tail() }
    }
}

impl<T: SlotElement> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_adaptive_queue("Consumer", &self.queue, f)
    }
}
