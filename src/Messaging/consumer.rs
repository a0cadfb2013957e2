// src/Messaging/consumer.rs

use super::message::{Address, Message, MessageQueue};
use crate::BQueue::Structs::{QueueStats, Wait};
use crate::error::CallError;
use bytemuck::Pod;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// The receiving end of one call channel.
///
/// A call is decoded between [`MessageConsumer::begin_pop_call`] and
/// [`MessageConsumer::end_pop_call`]; its message slot stays occupied until
/// the end, which keeps the producer off the call's argument room.
pub struct MessageConsumer<A> {
    queue: Arc<MessageQueue>,
    current: Option<Message>,
    popped: u64,
    _marker: PhantomData<fn(&mut A)>,
}

impl<A> MessageConsumer<A> {
    pub(crate) fn new(queue: Arc<MessageQueue>) -> Self {
        Self {
            queue,
            current: None,
            popped: 0,
            _marker: PhantomData,
        }
    }

    /// Ready calls, backtracking and waiting up to `wait`; 0 if none.
    pub fn wait_calls(&mut self, wait: Wait) -> usize {
        // SAFETY: `&mut self` on the unique consumer of this channel.
        unsafe { self.queue.messages.wait_for_data(wait) }
    }

    /// Calls already known to be ready.
    pub fn available(&self) -> usize {
        unsafe { self.queue.messages.available() }
    }

    pub fn has_data(&self) -> bool {
        self.queue.has_data()
    }

    pub fn in_call(&self) -> bool {
        self.current.is_some()
    }

    /// The producer is gone and nothing is left to run.
    pub fn is_finished(&self) -> bool {
        self.current.is_none() && self.queue.is_finished()
    }

    pub(crate) fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Calls closed so far.
    pub fn popped(&self) -> u64 {
        self.popped
    }

    /// Open the next ready call and return its executor's address.
    /// Returns `None` when no call is ready.
    ///
    /// # Panics
    /// If a call is already open.
    pub fn begin_pop_call(&mut self) -> Option<Address<A>> {
        assert!(self.current.is_none(), "begin_pop_call inside an open call");
        if self.available() == 0 && self.wait_calls(Wait::NoWait) == 0 {
            return None;
        }
        // SAFETY: a call is ready; the slot stays occupied until `close_call`.
        let message = unsafe { self.queue.messages.peek() };
        unsafe { self.queue.args.begin_pop(&message.span) };
        self.current = Some(message);
        // SAFETY: the producer of this channel only writes `Address<A>`s.
        Some(unsafe { Address::from_raw(message.executor) })
    }

    pub fn pop_arg<T: Pod>(&mut self) -> Result<T, CallError> {
        let span = self.current.as_ref().ok_or(CallError::NoCall)?.span;
        unsafe { self.queue.args.pop_arg(&span) }
    }

    pub fn pop_ref<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>, CallError> {
        let span = self.current.as_ref().ok_or(CallError::NoCall)?.span;
        unsafe { self.queue.args.pop_ref(&span) }
    }

    /// Close the open call. Returns whether its arguments were decoded to
    /// exactly the recorded length; `false` if no call was open.
    ///
    /// Debug builds treat an inexact decode as a bug and panic after the
    /// call has been closed.
    pub fn end_pop_call(&mut self) -> bool {
        match self.close_call() {
            Some(exact) => {
                debug_assert!(exact, "call decoded to a different length than was pushed");
                exact
            }
            None => false,
        }
    }

    /// Close the open call without checking how much of it was decoded.
    pub fn abandon_call(&mut self) {
        self.close_call();
    }

    fn close_call(&mut self) -> Option<bool> {
        let message = self.current.take()?;
        // SAFETY: the call is open, so its slot is the occupied one at tail.
        let exact = unsafe {
            let exact = self.queue.args.end_pop(&message.span);
            self.queue.messages.free_tail();
            exact
        };
        self.popped += 1;
        Some(exact)
    }

    /// Address of the next ready call without opening it; `None` inside a
    /// call or when nothing is ready.
    pub fn next_address(&mut self) -> Option<Address<A>> {
        if self.current.is_some() {
            return None;
        }
        if self.available() == 0 && self.wait_calls(Wait::NoWait) == 0 {
            return None;
        }
        let message = unsafe { self.queue.messages.peek() };
        Some(unsafe { Address::from_raw(message.executor) })
    }

    /// Address of the call after the open one, if already published.
    fn following_address(&self) -> Option<Address<A>> {
        let message = unsafe { self.queue.messages.peek_at(1) }?;
        Some(unsafe { Address::from_raw(message.executor) })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.messages.stats()
    }
}

impl<A> fmt::Debug for MessageConsumer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageConsumer")
            .field("queue", &self.queue)
            .field("in_call", &self.current.is_some())
            .field("popped", &self.popped)
            .finish()
    }
}

/// What an executor sees: the open call plus a grant of further calls it
/// may take over with [`Calls::next`].
pub struct Calls<'a, A> {
    consumer: &'a mut MessageConsumer<A>,
    address: Address<A>,
    remaining: usize,
}

impl<'a, A> Calls<'a, A> {
    pub(crate) fn new(consumer: &'a mut MessageConsumer<A>, address: Address<A>, remaining: usize) -> Self {
        Self {
            consumer,
            address,
            remaining,
        }
    }

    /// The executor this batch belongs to.
    pub fn address(&self) -> Address<A> {
        self.address
    }

    pub fn pop_arg<T: Pod>(&mut self) -> Result<T, CallError> {
        self.consumer.pop_arg()
    }

    pub fn pop_ref<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>, CallError> {
        self.consumer.pop_ref()
    }

    /// Further calls this executor may still take over.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Close the current call and open the next one if it is already
    /// published, addressed to the same executor and within the grant.
    /// Returns `false`, leaving the current call open, otherwise.
    pub fn next(&mut self) -> bool {
        if self.remaining == 0 || !self.consumer.in_call() {
            return false;
        }
        if self.consumer.following_address() != Some(self.address) {
            return false;
        }
        self.consumer.end_pop_call();
        if self.consumer.begin_pop_call().is_none() {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub(crate) fn in_call(&self) -> bool {
        self.consumer.in_call()
    }

    pub(crate) fn finish(&mut self) {
        self.consumer.end_pop_call();
    }
}

/// Runs ready calls of a standalone channel against `actor` on the calling
/// thread, at most `max` of them. Returns how many were consumed.
///
/// Executor errors are returned at the first failure, after closing the
/// failed call.
pub fn run_calls<A>(
    consumer: &mut MessageConsumer<A>,
    actor: &mut A,
    max: usize,
) -> Result<usize, CallError> {
    let start = consumer.popped();
    while (consumer.popped() - start) < max as u64 {
        let Some(address) = consumer.begin_pop_call() else {
            break;
        };
        let budget = max - (consumer.popped() - start) as usize - 1;
        let mut calls = Calls::new(consumer, address, budget);
        let result = (address.executor())(actor, &mut calls);
        match result {
            Ok(()) => {
                if calls.in_call() {
                    calls.finish();
                }
            }
            Err(err) => {
                consumer.abandon_call();
                return Err(err);
            }
        }
    }
    Ok((consumer.popped() - start) as usize)
}
