use super::Buffer::{AdaptiveQueue, SlotElement};
use super::Structs::BatchConfig;
use super::{Consumer, Producer};
use crate::error::ConfigError;
use std::sync::Arc;

pub struct QueueBuilder {
    capacity: usize,
    producer_batch: Option<usize>,
    consumer_batch: Option<usize>,
    increment: Option<usize>,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            capacity: 1024, // 1024 slots
            producer_batch: None,
            consumer_batch: None,
            increment: None,
        }
    }
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_producer_batch(mut self, batch: usize) -> Self {
        self.producer_batch = Some(batch);
        self
    }

    pub fn with_consumer_batch(mut self, batch: usize) -> Self {
        self.consumer_batch = Some(batch);
        self
    }

    pub fn with_batch_increment(mut self, increment: usize) -> Self {
        self.increment = Some(increment);
        self
    }

    /// Batch parameters after applying defaults for the configured capacity.
    pub fn batch_config(&self) -> BatchConfig {
        let defaults = BatchConfig::for_capacity(self.capacity);
        BatchConfig {
            producer_batch: self.producer_batch.unwrap_or(defaults.producer_batch),
            consumer_batch: self.consumer_batch.unwrap_or(defaults.consumer_batch),
            increment: self.increment.unwrap_or(defaults.increment),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn build_queue<T: SlotElement>(&self) -> Result<AdaptiveQueue<T>, ConfigError> {
        AdaptiveQueue::new(self.capacity, self.batch_config())
    }

    pub fn build<T: SlotElement + Send>(self) -> Result<(Producer<T>, Consumer<T>), ConfigError> {
        let queue = Arc::new(self.build_queue::<T>()?);
        Ok((Producer::new(Arc::clone(&queue)), Consumer::new(queue)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BQueue::Structs::Wait;
    use std::num::NonZeroU32;

    #[test]
    fn rejects_bad_capacity() {
        let err = QueueBuilder::new().with_capacity(100).build::<NonZeroU32>().unwrap_err();
        assert_eq!(err, ConfigError::CapacityNotPowerOfTwo { capacity: 100 });

        let err = QueueBuilder::new().with_capacity(1).build::<NonZeroU32>().unwrap_err();
        assert_eq!(err, ConfigError::CapacityTooSmall { capacity: 1, min: 2 });
    }

    #[test]
    fn rejects_oversized_batch() {
        let err = QueueBuilder::new()
            .with_capacity(16)
            .with_consumer_batch(16)
            .build::<NonZeroU32>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BatchOutOfRange { name: "consumer_batch", .. }));
    }

    #[test]
    fn peek_then_free() {
        let (mut tx, mut rx) = QueueBuilder::new().with_capacity(8).build::<NonZeroU32>().unwrap();
        assert_eq!(rx.peek(), None);
        tx.push(NonZeroU32::new(7).unwrap());
        assert_eq!(rx.peek().map(|v| v.get()), Some(7));
        assert_eq!(rx.len(), 1);
        rx.free_tail();
        assert!(rx.is_empty());
        assert_eq!(rx.try_pop(Wait::NoWait), None);
    }

    #[test]
    fn push_with_sees_sequence() {
        let (mut tx, mut rx) = QueueBuilder::new().with_capacity(4).build::<NonZeroU32>().unwrap();
        for _ in 0..3 {
            tx.push_with(|seq| NonZeroU32::new(seq as u32 + 10).unwrap());
        }
        let got: Vec<u32> = (0..3).map(|_| rx.pop().get()).collect();
        assert_eq!(got, vec![10, 11, 12]);
    }
}
