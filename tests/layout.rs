// Layout checks for the cursor groups and slot cells.
// Producer and consumer cursors must never share a cache line; the
// observed values are printed to aid debugging on a given platform.
use bq_actors::BQueue::Buffer::layout::{ConsumerCursors, ProducerCursors};
use bq_actors::Messaging::args::{ArgCursors, ArgSpan};
use bq_actors::Messaging::message::MessageCell;
use crossbeam_utils::CachePadded;
use memoffset::offset_of;
use std::mem::{align_of, size_of};

#[test]
fn test_producer_cursors_layout() {
    let off_head = offset_of!(ProducerCursors, head);
    let off_batch_head = offset_of!(ProducerCursors, batch_head);
    let off_fulls = offset_of!(ProducerCursors, enqueue_fulls);
    println!(
        "ProducerCursors => size: {}, offsets: [head:{off_head}, batch_head:{off_batch_head}, enqueue_fulls:{off_fulls}]",
        size_of::<ProducerCursors>()
    );

    assert_eq!(off_head, 0);
    assert_eq!(off_batch_head, 8);
    assert_eq!(off_fulls, 16);
    assert_eq!(size_of::<ProducerCursors>(), 24);
}

#[test]
fn test_consumer_cursors_layout() {
    let off_tail = offset_of!(ConsumerCursors, tail);
    let off_batch_tail = offset_of!(ConsumerCursors, batch_tail);
    let off_history = offset_of!(ConsumerCursors, batch_history);
    let off_backtrackings = offset_of!(ConsumerCursors, backtrackings);
    println!(
        "ConsumerCursors => size: {}, offsets: [tail:{off_tail}, batch_tail:{off_batch_tail}, batch_history:{off_history}, backtrackings:{off_backtrackings}]",
        size_of::<ConsumerCursors>()
    );

    assert_eq!(off_tail, 0);
    assert_eq!(off_batch_tail, 8);
    assert_eq!(off_history, 16);
    assert!(off_backtrackings >= 16 + size_of::<usize>());
    // one cursor group fits in a single cache line
    assert!(size_of::<ConsumerCursors>() <= 64);
}

#[test]
fn test_cursor_groups_are_padded() {
    let pad = align_of::<CachePadded<ProducerCursors>>();
    println!(
        "CachePadded => align: {pad}, producer: {}, consumer: {}, args: {}",
        size_of::<CachePadded<ProducerCursors>>(),
        size_of::<CachePadded<ConsumerCursors>>(),
        size_of::<CachePadded<ArgCursors>>()
    );

    assert!(pad >= 64);
    assert_eq!(size_of::<CachePadded<ProducerCursors>>() % pad, 0);
    assert_eq!(size_of::<CachePadded<ConsumerCursors>>() % pad, 0);
    assert_eq!(align_of::<CachePadded<ArgCursors>>(), pad);
}

#[test]
fn test_message_cell_layout() {
    let off_executor = offset_of!(MessageCell, executor);
    let off_span = offset_of!(MessageCell, span);
    println!(
        "MessageCell => size: {}, align: {}, offsets: [executor:{off_executor}, span:{off_span}]",
        size_of::<MessageCell>(),
        align_of::<MessageCell>()
    );

    assert_eq!(off_executor, 0);
    assert_eq!(off_span, size_of::<usize>());
    assert_eq!(size_of::<MessageCell>(), size_of::<usize>() + size_of::<ArgSpan>());
}

#[test]
fn test_arg_span_layout() {
    assert_eq!(size_of::<ArgSpan>(), 16);
    assert_eq!(offset_of!(ArgSpan, bytes_at), 0);
    assert_eq!(offset_of!(ArgSpan, bytes_len), 4);
    assert_eq!(offset_of!(ArgSpan, refs_at), 8);
    assert_eq!(offset_of!(ArgSpan, refs_len), 12);
}
