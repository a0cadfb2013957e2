use std::fmt;

use super::Buffer::{AdaptiveQueue, RingBuffer, SlotElement};

impl<T: SlotElement> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_ring_buffer(self, f)
    }
}

impl<T: SlotElement> fmt::Debug for AdaptiveQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_adaptive_queue("AdaptiveQueue", self, f)
    }
}
