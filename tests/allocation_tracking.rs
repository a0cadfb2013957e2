// Allocation tracking for the steady-state push/pop paths
//
// Note: every test here is #[serial_test::serial] because dhat only allows
// one profiler at a time and the global allocator counts all threads.
//
// # Run all allocation tracking tests
// cargo test --test allocation_tracking -- --nocapture

use bq_actors::BQueue::QueueBuilder;
use bq_actors::BQueue::Structs::Wait;
use bq_actors::Messaging::{run_calls, Address, Calls, ChannelBuilder};
use bq_actors::CallError;
use std::num::NonZeroU64;

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

#[derive(Default)]
struct Book {
    volume: u64,
    notional: i64,
}

fn place(book: &mut Book, calls: &mut Calls<'_, Book>) -> Result<(), CallError> {
    loop {
        let price = calls.pop_arg::<i32>()?;
        let volume = calls.pop_arg::<u32>()?;
        book.volume += volume as u64;
        book.notional += price as i64 * volume as i64;
        if !calls.next() {
            return Ok(());
        }
    }
}

#[test]
#[serial_test::serial]
fn queue_push_pop_allocates_nothing() {
    let _profiler = dhat::Profiler::builder().testing().build();

    let (mut tx, mut rx) = QueueBuilder::new().with_capacity(1024).build::<NonZeroU64>().unwrap();
    let before = dhat::HeapStats::get();

    for i in 1..=100_000u64 {
        tx.push(NonZeroU64::new(i).unwrap());
        assert_eq!(rx.pop().get(), i);
    }

    let after = dhat::HeapStats::get();
    println!("queue: blocks before {} after {}", before.total_blocks, after.total_blocks);
    dhat::assert_eq!(after.total_blocks, before.total_blocks);
}

#[test]
#[serial_test::serial]
fn pod_call_path_allocates_nothing() {
    let _profiler = dhat::Profiler::builder().testing().build();

    let (mut tx, mut rx) = ChannelBuilder::new()
        .with_capacity(256)
        .with_max_call_bytes(16)
        .with_max_call_refs(0)
        .build::<Book>()
        .unwrap();
    let place_at = Address::new(place);
    let mut book = Book::default();
    let before = dhat::HeapStats::get();

    for round in 0..1_000i32 {
        for k in 0..100i32 {
            tx.begin_push_call(place_at, Wait::Block)
                .unwrap()
                .push_arg(round + k)
                .push_arg(1u32);
        }
        assert_eq!(run_calls(&mut rx, &mut book, usize::MAX), Ok(100));
    }

    let after = dhat::HeapStats::get();
    println!("calls: blocks before {} after {}", before.total_blocks, after.total_blocks);
    dhat::assert_eq!(after.total_blocks, before.total_blocks);
    assert_eq!(book.volume, 100_000);
}

#[test]
#[serial_test::serial]
fn memory_stats_report() {
    use memory_stats::memory_stats;

    let before = memory_stats();
    println!("Memory before: {:?}", before);

    let (mut tx, mut rx) = ChannelBuilder::new().with_capacity(4096).build::<Book>().unwrap();
    let place_at = Address::new(place);
    let mut book = Book::default();
    for i in 0..50_000i32 {
        tx.begin_push_call(place_at, Wait::Block)
            .unwrap()
            .push_arg(i)
            .push_arg(2u32);
        if i % 1000 == 999 {
            run_calls(&mut rx, &mut book, usize::MAX).unwrap();
        }
    }
    run_calls(&mut rx, &mut book, usize::MAX).unwrap();

    let after = memory_stats();
    println!("Memory after: {:?}", after);
    if let (Some(b), Some(a)) = (before, after) {
        let delta = a.physical_mem as i64 - b.physical_mem as i64;
        println!("Memory delta: {} bytes ({:.2} KB)", delta, delta as f64 / 1024.0);
    }
    assert_eq!(book.volume, 100_000);
}
