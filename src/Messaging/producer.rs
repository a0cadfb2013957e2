// In src/Messaging/producer.rs
use super::args::ArgRef;
use super::message::{Address, Message, MessageQueue};
use crate::Actor::Mailbox;
use crate::BQueue::Structs::{QueueStats, Wait};
use bytemuck::Pod;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// The sending end of one call channel.
///
/// A channel created by [`crate::Actor::Mailbox::connect`] wakes its mailbox
/// after every call; a standalone channel from [`super::ChannelBuilder`]
/// leaves scheduling to the consumer's owner. Dropping the producer closes
/// the channel.
pub struct MessageProducer<A: Send + 'static> {
    queue: Arc<MessageQueue>,
    target: Option<Arc<Mailbox<A>>>,
}

impl<A: Send + 'static> MessageProducer<A> {
    pub(crate) fn new(queue: Arc<MessageQueue>, target: Option<Arc<Mailbox<A>>>) -> Self {
        Self { queue, target }
    }

    /// Start a call to `address`, waiting up to `wait` for a free message
    /// slot. Returns `None` if the ring stayed full.
    ///
    /// The call is published when the returned [`PushCall`] is ended or
    /// dropped.
    pub fn begin_push_call(&mut self, address: Address<A>, wait: Wait) -> Option<PushCall<'_, A>> {
        // SAFETY: `&mut self` on the unique producer of this channel.
        unsafe {
            if self.queue.messages.reserved() == 0
                && self.queue.messages.try_reserve_for_write(1, wait) == 0
            {
                if let Wait::Timeout(budget) = wait {
                    warn!(?budget, executor = ?address, "call ring stayed full; call not sent");
                }
                return None;
            }
            self.queue.args.begin_push();
        }
        Some(PushCall {
            producer: self,
            address,
            open: true,
        })
    }

    /// Reserve room for up to `calls` calls at once; returns how many slots
    /// are free (0 if the ring stayed full for `wait`).
    pub fn begin_calls_batch(&mut self, calls: usize, wait: Wait) -> usize {
        // SAFETY: as in `begin_push_call`.
        unsafe { self.queue.messages.try_reserve_for_write(calls, wait) }
    }

    /// The mailbox this channel feeds, if any.
    pub fn target(&self) -> Option<&Arc<Mailbox<A>>> {
        self.target.as_ref()
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
        self.queue.messages.stats()
    }
}

impl<A: Send + 'static> fmt::Debug for MessageProducer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProducer")
            .field("queue", &self.queue)
            .field("target", &self.target.as_ref().map(|m| m.id()))
            .finish()
    }
}

impl<A: Send + 'static> Drop for MessageProducer<A> {
    fn drop(&mut self) {
        self.queue.close();
        // the owner releases the channel once its last calls have run
        if let Some(target) = &self.target {
            target.have_tasks();
        }
    }
}

/// A call being pushed. Arguments go in order; dropping the value ends the
/// call just like [`PushCall::end`].
pub struct PushCall<'a, A: Send + 'static> {
    producer: &'a mut MessageProducer<A>,
    address: Address<A>,
    open: bool,
}

impl<'a, A: Send + 'static> PushCall<'a, A> {
    /// Append a plain value.
    ///
    /// # Panics
    /// If the call grows past the channel's `max_call_bytes`.
    pub fn push_arg<T: Pod>(&mut self, value: T) -> &mut Self {
        // SAFETY: the call holds the unique producer and is open.
        unsafe { self.producer.queue.args.push_arg(value) };
        self
    }

    /// Append a shared reference; the consumer pops it back as `Arc<T>`.
    ///
    /// # Panics
    /// If the call grows past the channel's `max_call_refs`.
    pub fn push_ref<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> &mut Self {
        let value: ArgRef = value;
        unsafe { self.producer.queue.args.push_ref(value) };
        self
    }

    pub fn address(&self) -> Address<A> {
        self.address
    }

    /// Publish the call and wake the target mailbox.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let queue = &self.producer.queue;
        // SAFETY: a slot was reserved in `begin_push_call` and the producer
        // is borrowed for the whole call.
        unsafe {
            let span = queue.args.end_push();
            queue.messages.write(Message {
                executor: self.address.raw(),
                span,
            });
        }
        if let Some(target) = &self.producer.target {
            target.have_tasks();
        }
    }
}

impl<'a, A: Send + 'static> Drop for PushCall<'a, A> {
    fn drop(&mut self) {
        self.finish();
    }
}
