//! Message slots: an executor handle plus the argument span of its call.

use super::args::{ArgSpan, ArgsChannel};
use super::consumer::Calls;
use crate::BQueue::Buffer::{AdaptiveQueue, SlotElement};
use crate::BQueue::Structs::BatchConfig;
use crate::error::{CallError, ConfigError};
use std::cell::UnsafeCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::atomic::Ordering::{Acquire, Release};

/// Decodes one call's arguments and runs it against the actor state.
///
/// The executor pops exactly what the producer pushed for the call, in the
/// same order. It may call [`Calls::next`] to keep consuming consecutive
/// calls addressed to itself.
pub type Executor<A> = fn(&mut A, &mut Calls<'_, A>) -> Result<(), CallError>;

/// Opaque handle to an [`Executor`], stored as a plain word in the slot.
pub struct Address<A> {
    raw: NonZeroUsize,
    _marker: PhantomData<fn(&mut A)>,
}

impl<A> Address<A> {
    pub fn new(executor: Executor<A>) -> Self {
        // SAFETY: function pointers are never null.
        let raw = unsafe { NonZeroUsize::new_unchecked(executor as usize) };
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `raw` must come from [`Address::raw`] of an address for the same `A`.
    pub unsafe fn from_raw(raw: NonZeroUsize) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn raw(self) -> NonZeroUsize {
        self.raw
    }

    #[inline]
    pub fn executor(self) -> Executor<A> {
        // SAFETY: `raw` was produced from an `Executor<A>` (see `new` and
        // `from_raw`), and a function pointer has the size of a `usize`.
        unsafe { std::mem::transmute::<usize, Executor<A>>(self.raw.get()) }
    }
}

impl<A> Clone for Address<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Address<A> {}

impl<A> PartialEq for Address<A> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<A> Eq for Address<A> {}

impl<A> Hash for Address<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<A> fmt::Debug for Address<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:x})", self.raw.get())
    }
}

/// One queued call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub executor: NonZeroUsize,
    pub span: ArgSpan,
}

/// Slot cell for [`Message`]: a zero executor word marks it empty.
#[repr(C)]
pub struct MessageCell {
    pub executor: AtomicUsize,
    pub span: UnsafeCell<ArgSpan>,
}

unsafe impl SlotElement for Message {
    type Cell = MessageCell;

    fn empty_cell() -> MessageCell {
        MessageCell {
            executor: AtomicUsize::new(0),
            span: UnsafeCell::new(ArgSpan::default()),
        }
    }

    #[inline]
    fn is_occupied(cell: &MessageCell) -> bool {
        cell.executor.load(Acquire) != 0
    }

    #[inline]
    unsafe fn store(cell: &MessageCell, value: Self) {
        // The span is written while the slot is still empty; the release
        // store of the executor publishes it.
        *cell.span.get() = value.span;
        cell.executor.store(value.executor.get(), Release);
    }

    #[inline]
    unsafe fn read(cell: &MessageCell) -> Self {
        let executor = NonZeroUsize::new_unchecked(cell.executor.load(Acquire));
        Message {
            executor,
            span: *cell.span.get(),
        }
    }

    #[inline]
    unsafe fn clear(cell: &MessageCell) {
        cell.executor.store(0, Release);
    }
}

/// A message ring and the argument channel that advances with it.
///
/// Shared between one [`super::MessageProducer`] and one
/// [`super::MessageConsumer`]. Argument room is released only when the
/// consumer frees the call's message slot, so the ring's capacity also
/// bounds the calls holding argument space.
pub struct MessageQueue {
    pub(crate) messages: AdaptiveQueue<Message>,
    pub(crate) args: ArgsChannel,
    /// Set once the producer is gone.
    closed: AtomicBool,
}

impl MessageQueue {
    pub fn new(
        capacity: usize,
        batch: BatchConfig,
        max_call_bytes: usize,
        max_call_refs: usize,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            messages: AdaptiveQueue::new(capacity, batch)?,
            args: ArgsChannel::new(capacity, max_call_bytes, max_call_refs)?,
            closed: AtomicBool::new(false),
        })
    }

    /// Whether a published call is waiting at the consumer's tail.
    /// Read-only, callable from any thread.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.messages.has_data()
    }

    /// Mark the producer side gone. Calls it already published stay
    /// readable.
    pub fn close(&self) {
        self.closed.store(true, Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    /// Closed, and every published call has been consumed.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && !self.has_data()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.messages.capacity()
    }

    pub fn args(&self) -> &ArgsChannel {
        &self.args
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_message_queue(self, f)
    }
}
