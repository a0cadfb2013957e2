use crate::Actor::MailboxStats;
use crate::BQueue::Buffer::{AdaptiveQueue, RingBuffer, SlotElement};
use crate::Core::Scheduler;
use crate::Messaging::MessageQueue;
use std::fmt;
use std::sync::atomic::Ordering::Relaxed;

/// Debug function for RingBuffer
///
/// Shows the geometry only; slot contents are never read.
pub fn debug_ring_buffer<T: SlotElement>(buffer: &RingBuffer<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuffer")
        .field("capacity", &buffer.capacity())
        .field("mask", &format_args!("0x{:x}", buffer.mask()))
        .finish_non_exhaustive()
}

/// Debug function for AdaptiveQueue and its handles
///
/// Shows:
/// - Producer cursors (head, batch_head)
/// - Consumer cursors (tail, batch_tail, batch_history)
/// - Counters
pub fn debug_adaptive_queue<T: SlotElement>(
    name: &str,
    queue: &AdaptiveQueue<T>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.debug_struct(name)
        .field("capacity", &queue.capacity())
        .field("head", &queue.producer.head.load(Relaxed))
        .field("batch_head", &queue.producer.batch_head.load(Relaxed))
        .field("tail", &queue.consumer.tail.load(Relaxed))
        .field("batch_tail", &queue.consumer.batch_tail.load(Relaxed))
        .field("batch_history", &queue.consumer.batch_history.load(Relaxed))
        .field("enqueue_fulls", &queue.producer.enqueue_fulls.load(Relaxed))
        .field("backtrackings", &queue.consumer.backtrackings.load(Relaxed))
        .finish()
}

/// Debug function for MessageQueue
///
/// Message cursors plus both argument cursors of each side.
pub fn debug_message_queue(queue: &MessageQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let args = queue.args();
    f.debug_struct("MessageQueue")
        .field("messages", &queue.messages)
        .field("closed", &queue.is_closed())
        .field("bytes", &format_args!(
            "{}/{} (head {}, tail {})",
            args.max_call_bytes(),
            args.bytes_len(),
            args.head().bytes.load(Relaxed),
            args.tail().bytes.load(Relaxed)
        ))
        .field("refs", &format_args!(
            "{}/{} (head {}, tail {})",
            args.max_call_refs(),
            args.refs_len(),
            args.head().refs.load(Relaxed),
            args.tail().refs.load(Relaxed)
        ))
        .finish()
}

/// Debug function for Mailbox
///
/// The actor state is opaque; only the owner token and counters are shown.
pub fn debug_mailbox(
    id: u64,
    owner: u64,
    channels: usize,
    stats: &MailboxStats,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let owner = match owner {
        crate::Actor::mailbox::IDLE => "idle".to_string(),
        crate::Actor::mailbox::SCHEDULED => "scheduled".to_string(),
        worker => format!("worker {worker}"),
    };
    f.debug_struct("Mailbox")
        .field("id", &id)
        .field("owner", &owner)
        .field("channels", &channels)
        .field("stats", stats)
        .finish_non_exhaustive()
}

/// Debug function for Scheduler
pub fn debug_scheduler(scheduler: &Scheduler, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
        .field("running", &scheduler.running())
        .field("started", &scheduler.started())
        .field("outstanding", &scheduler.outstanding())
        .field("waiters", &scheduler.waiters())
        .finish()
}
