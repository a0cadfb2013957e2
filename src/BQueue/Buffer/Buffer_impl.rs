use std::sync::atomic::Ordering::Relaxed;

use super::Buffer::{AdaptiveQueue, SlotElement};
use crate::BQueue::Structs::Buffer_Structs::{QueueStats, Wait};

impl<T: SlotElement> AdaptiveQueue<T> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity
    }

    /// Elements written and not yet freed. A snapshot when both sides run.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.producer.head.load(Relaxed);
        let tail = self.consumer.tail.load(Relaxed);
        head.wrapping_sub(tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only probe of the slot at the consumer's tail.
    ///
    /// Safe from any thread: it never moves a cursor, so a worker that gave
    /// up ownership of the consumer side can still look for pending work.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.buffer.is_occupied(self.consumer.tail.load(Relaxed))
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.buffer.capacity,
            len: self.len(),
            enqueue_fulls: self.producer.enqueue_fulls.load(Relaxed),
            backtrackings: self.consumer.backtrackings.load(Relaxed),
            batch_history: self.consumer.batch_history.load(Relaxed),
        }
    }

    // ---------------------------------------------------------------------
    // Producer side
    // ---------------------------------------------------------------------

    /// True when the `len` slots starting at `head` are all empty.
    ///
    /// The consumer empties slots in sequence order, so an empty last slot
    /// means every earlier slot of the window is empty too.
    #[inline]
    fn window_free(&self, head: u64, len: usize) -> bool {
        !self.buffer.is_occupied(head.wrapping_add(len as u64 - 1))
    }

    #[inline]
    fn commit_window(&self, head: u64, len: usize) -> usize {
        self.producer
            .batch_head
            .store(head.wrapping_add(len as u64), Relaxed);
        len
    }

    /// Reserve room for at least `batch` writes. Returns the number of slots
    /// now known to be free (possibly more than `batch`), or 0 if the ring
    /// stayed full for the whole wait.
    ///
    /// The check is amortised: while `batch_head - head` covers the request
    /// no slot is touched. Otherwise a single probe at the far end of a
    /// window of `max(batch, producer_batch)` slots decides; if that window
    /// is busy the requested window alone is probed, then waited on.
    ///
    /// # Safety
    /// Only the single producer may call this.
    pub(crate) unsafe fn try_reserve_for_write(&self, batch: usize, wait: Wait) -> usize {
        let capacity = self.buffer.capacity;
        let want = batch.clamp(1, capacity);
        let head = self.producer.head.load(Relaxed);
        let available = self.producer.batch_head.load(Relaxed).wrapping_sub(head) as usize;
        if available >= want {
            return available;
        }

        let span = want.max(self.batch.producer_batch).min(capacity);
        if self.window_free(head, span) {
            return self.commit_window(head, span);
        }
        self.producer.enqueue_fulls.fetch_add(1, Relaxed);

        if span > want && self.window_free(head, want) {
            return self.commit_window(head, want);
        }
        if wait.spin_until(|| self.window_free(head, want)) {
            return self.commit_window(head, want);
        }
        0
    }

    /// Sequence number the next write lands on.
    ///
    /// # Safety
    /// Only the single producer may call this.
    #[inline]
    pub(crate) unsafe fn head(&self) -> u64 {
        self.producer.head.load(Relaxed)
    }

    /// Slots reserved and not yet written.
    ///
    /// # Safety
    /// Only the single producer may call this.
    #[inline]
    pub(crate) unsafe fn reserved(&self) -> usize {
        let head = self.producer.head.load(Relaxed);
        self.producer.batch_head.load(Relaxed).wrapping_sub(head) as usize
    }

    /// Publish `value` in the next reserved slot.
    ///
    /// # Safety
    /// Only the single producer may call this, after a reservation that still
    /// covers at least one slot.
    #[inline]
    pub(crate) unsafe fn write(&self, value: T) {
        let head = self.producer.head.load(Relaxed);
        assert!(
            head != self.producer.batch_head.load(Relaxed),
            "write without a reserved slot (head = {head})"
        );
        debug_assert!(!self.buffer.is_occupied(head), "slot {head} still occupied");
        T::store(self.buffer.slot(head), value);
        self.producer.head.store(head.wrapping_add(1), Relaxed);
    }

    // ---------------------------------------------------------------------
    // Consumer side
    // ---------------------------------------------------------------------

    /// Elements known to be ready without probing.
    ///
    /// # Safety
    /// Only the single consumer may call this.
    #[inline]
    pub(crate) unsafe fn available(&self) -> usize {
        let tail = self.consumer.tail.load(Relaxed);
        self.consumer.batch_tail.load(Relaxed).wrapping_sub(tail) as usize
    }

    /// Number of ready elements, backtracking when the known run is used up.
    /// Returns 0 if nothing became ready within `wait`.
    ///
    /// # Safety
    /// Only the single consumer may call this.
    pub(crate) unsafe fn wait_for_data(&self, wait: Wait) -> usize {
        let available = self.available();
        if available > 0 {
            return available;
        }
        let found = self.backtrack();
        if found > 0 || wait == Wait::NoWait {
            return found;
        }
        if wait.spin_until(|| self.has_data()) {
            return self.backtrack();
        }
        0
    }

    /// One backtracking round.
    ///
    /// The probe distance starts from the carried history grown by
    /// `increment` (capped at `consumer_batch`). The slot at the end of the
    /// probed run is checked; if empty the run is halved, down to a single
    /// slot. An occupied last slot proves the whole run was written, since the
    /// producer publishes in order, so the result never overstates readiness.
    ///
    /// # Safety
    /// Only the single consumer may call this.
    pub(crate) unsafe fn backtrack(&self) -> usize {
        self.consumer.backtrackings.fetch_add(1, Relaxed);
        let tail = self.consumer.tail.load(Relaxed);
        let history = self.consumer.batch_history.load(Relaxed);

        let mut size = history;
        if size < self.batch.consumer_batch {
            size = (size + self.batch.increment).min(self.batch.consumer_batch);
        }
        let mut size = size.clamp(1, self.buffer.capacity);

        loop {
            if self.buffer.is_occupied(tail.wrapping_add(size as u64 - 1)) {
                break;
            }
            if size == 1 {
                return 0;
            }
            size /= 2;
        }

        self.consumer.batch_history.store(size, Relaxed);
        self.consumer
            .batch_tail
            .store(tail.wrapping_add(size as u64), Relaxed);
        size
    }

    /// Take the element at `tail` and empty its slot.
    ///
    /// # Safety
    /// Only the single consumer may call this, with `available() > 0`.
    #[inline]
    pub(crate) unsafe fn read(&self) -> T {
        let tail = self.consumer.tail.load(Relaxed);
        debug_assert!(
            tail != self.consumer.batch_tail.load(Relaxed),
            "read past the ready run (tail = {tail})"
        );
        let slot = self.buffer.slot(tail);
        debug_assert!(T::is_occupied(slot), "read of empty slot {tail}");
        let value = T::read(slot);
        T::clear(slot);
        self.consumer.tail.store(tail.wrapping_add(1), Relaxed);
        value
    }

    /// Copy of the element at `tail`, leaving it in place.
    ///
    /// # Safety
    /// Only the single consumer may call this, with `available() > 0`.
    #[inline]
    pub(crate) unsafe fn peek(&self) -> T
    where
        T: Copy,
    {
        let tail = self.consumer.tail.load(Relaxed);
        T::read(self.buffer.slot(tail))
    }

    /// Copy of the element `offset` slots past `tail`, if it is published.
    ///
    /// # Safety
    /// Only the single consumer may call this.
    #[inline]
    pub(crate) unsafe fn peek_at(&self, offset: usize) -> Option<T>
    where
        T: Copy,
    {
        if offset >= self.buffer.capacity {
            return None;
        }
        let tail = self.consumer.tail.load(Relaxed);
        let slot = self.buffer.slot(tail.wrapping_add(offset as u64));
        if T::is_occupied(slot) {
            Some(T::read(slot))
        } else {
            None
        }
    }

    /// Empty the slot at `tail` without reading it.
    ///
    /// # Safety
    /// Only the single consumer may call this, with `available() > 0`, and
    /// the element must not own resources.
    #[inline]
    pub(crate) unsafe fn free_tail(&self)
    where
        T: Copy,
    {
        let tail = self.consumer.tail.load(Relaxed);
        T::clear(self.buffer.slot(tail));
        self.consumer.tail.store(tail.wrapping_add(1), Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn set_batch_history(&self, history: usize) {
        self.consumer.batch_history.store(history, Relaxed);
    }
}

impl<T: SlotElement> Drop for AdaptiveQueue<T> {
    fn drop(&mut self) {
        let head = *self.producer.head.get_mut();
        let mut tail = *self.consumer.tail.get_mut();
        while tail != head {
            let slot = self.buffer.slot(tail);
            if T::is_occupied(slot) {
                // SAFETY: `&mut self` makes this the only reader; each
                // occupied slot is read once and cleared.
                unsafe {
                    drop(T::read(slot));
                    T::clear(slot);
                }
            }
            tail = tail.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BQueue::Structs::Buffer_Structs::BatchConfig;
    use std::num::NonZeroU64;

    fn value(v: u64) -> NonZeroU64 {
        NonZeroU64::new(v).unwrap()
    }

    fn queue(capacity: usize) -> AdaptiveQueue<NonZeroU64> {
        AdaptiveQueue::new(capacity, BatchConfig::for_capacity(capacity)).unwrap()
    }

    #[test]
    fn backtracking_never_overstates() {
        let q = AdaptiveQueue::<NonZeroU64>::new(
            64,
            BatchConfig {
                producer_batch: 4,
                consumer_batch: 32,
                increment: 3,
            },
        )
        .unwrap();

        for ready in 0..40u64 {
            for history in [1usize, 2, 5, 16, 31, 32] {
                unsafe {
                    for i in 0..ready {
                        assert!(q.try_reserve_for_write(1, Wait::NoWait) >= 1);
                        q.write(value(i + 1));
                    }
                    q.set_batch_history(history);
                    let found = q.backtrack();
                    assert!(
                        found as u64 <= ready,
                        "history {history}: reported {found} of {ready}"
                    );
                    if ready > 0 {
                        assert!(found >= 1);
                    }
                    // drain everything before the next case
                    let mut drained = 0;
                    while drained < ready {
                        let n = q.wait_for_data(Wait::NoWait);
                        assert!(n > 0);
                        for _ in 0..n {
                            q.read();
                        }
                        drained += n as u64;
                    }
                    assert_eq!(q.len(), 0);
                }
            }
        }
    }

    #[test]
    fn history_grows_toward_consumer_batch() {
        let q = queue(64); // consumer_batch 4, increment 2
        unsafe {
            q.set_batch_history(1);
            for i in 0..32 {
                assert!(q.try_reserve_for_write(1, Wait::NoWait) >= 1);
                q.write(value(i + 1));
            }
            assert_eq!(q.wait_for_data(Wait::NoWait), 3);
            for _ in 0..3 {
                q.read();
            }
            assert_eq!(q.wait_for_data(Wait::NoWait), 4);
        }
    }

    #[test]
    fn reserve_reports_zero_when_full() {
        let q = queue(4);
        unsafe {
            for i in 0..4 {
                assert!(q.try_reserve_for_write(1, Wait::NoWait) >= 1);
                q.write(value(i + 1));
            }
            assert_eq!(q.try_reserve_for_write(1, Wait::NoWait), 0);
            assert_eq!(q.stats().enqueue_fulls, 1);

            assert!(q.wait_for_data(Wait::NoWait) >= 1);
            assert_eq!(q.read().get(), 1);
            assert_eq!(q.try_reserve_for_write(1, Wait::NoWait), 1);
        }
    }

    #[test]
    fn empty_queue_has_no_data() {
        let q = queue(8);
        unsafe {
            assert_eq!(q.wait_for_data(Wait::NoWait), 0);
        }
        assert!(!q.has_data());
        assert!(q.is_empty());
    }

    #[test]
    fn cursors_wrap_around_u64() {
        let q = queue(8);
        let start = u64::MAX - 3;
        q.producer.head.store(start, Relaxed);
        q.producer.batch_head.store(start, Relaxed);
        q.consumer.tail.store(start, Relaxed);
        q.consumer.batch_tail.store(start, Relaxed);
        unsafe {
            for i in 0..20u64 {
                assert!(q.try_reserve_for_write(1, Wait::NoWait) >= 1);
                q.write(value(i + 1));
                assert!(q.wait_for_data(Wait::NoWait) >= 1);
                assert_eq!(q.read().get(), i + 1);
            }
        }
        assert!(q.is_empty());
    }
}
