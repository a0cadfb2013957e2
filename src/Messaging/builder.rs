use super::message::MessageQueue;
use super::{MessageConsumer, MessageProducer};
use crate::BQueue::QueueBuilder;
use crate::error::ConfigError;
use std::sync::Arc;

/// Configures call channels: the message ring plus its argument regions.
#[derive(Clone)]
pub struct ChannelBuilder {
    capacity: usize,
    max_call_bytes: usize,
    max_call_refs: usize,
    producer_batch: Option<usize>,
    consumer_batch: Option<usize>,
    increment: Option<usize>,
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self {
            capacity: 1024,     // calls in flight
            max_call_bytes: 64, // one cache line of arguments per call
            max_call_refs: 4,
            producer_batch: None,
            consumer_batch: None,
            increment: None,
        }
    }
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_call_bytes(mut self, bytes: usize) -> Self {
        self.max_call_bytes = bytes;
        self
    }

    pub fn with_max_call_refs(mut self, refs: usize) -> Self {
        self.max_call_refs = refs;
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

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn build_queue(&self) -> Result<MessageQueue, ConfigError> {
        let mut queue = QueueBuilder::new().with_capacity(self.capacity);
        if let Some(batch) = self.producer_batch {
            queue = queue.with_producer_batch(batch);
        }
        if let Some(batch) = self.consumer_batch {
            queue = queue.with_consumer_batch(batch);
        }
        if let Some(increment) = self.increment {
            queue = queue.with_batch_increment(increment);
        }
        MessageQueue::new(
            self.capacity,
            queue.batch_config(),
            self.max_call_bytes,
            self.max_call_refs,
        )
    }

    /// A standalone channel; the consumer is driven by its owner directly.
    pub fn build<A: Send + 'static>(
        self,
    ) -> Result<(MessageProducer<A>, MessageConsumer<A>), ConfigError> {
        let queue = Arc::new(self.build_queue()?);
        Ok((
            MessageProducer::new(Arc::clone(&queue), None),
            MessageConsumer::new(queue),
        ))
    }
}
