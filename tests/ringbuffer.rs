use bq_actors::BQueue::Structs::Wait;
use bq_actors::BQueue::QueueBuilder;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn nz(v: u64) -> NonZeroU64 {
    NonZeroU64::new(v).unwrap()
}

#[test]
fn simple_push_pop() {
    let (mut tx, mut rx) = QueueBuilder::new().with_capacity(16).build::<NonZeroU64>().unwrap();
    tx.push(nz(1));
    tx.push(nz(2));
    assert_eq!(rx.len(), 2);
    assert_eq!(rx.pop().get(), 1);
    assert_eq!(rx.pop().get(), 2);
    assert_eq!(rx.try_pop(Wait::NoWait), None);
}

#[test]
fn try_push_hands_value_back_when_full() {
    let (mut tx, mut rx) = QueueBuilder::new().with_capacity(8).build::<Box<u32>>().unwrap();
    for i in 0..8 {
        assert!(tx.try_push(Box::new(i), Wait::NoWait).is_ok());
    }
    let rejected = tx.try_push(Box::new(99), Wait::NoWait).unwrap_err();
    assert_eq!(*rejected, 99);
    assert_eq!(tx.stats().enqueue_fulls, 1);

    // a bounded wait also gives up while nobody consumes
    let rejected = tx
        .try_push(rejected, Wait::Timeout(Duration::from_millis(2)))
        .unwrap_err();

    assert_eq!(*rx.pop(), 0);
    assert!(tx.try_push(rejected, Wait::NoWait).is_ok());
    let rest: Vec<u32> = (0..8).map(|_| *rx.pop()).collect();
    assert_eq!(rest, vec![1, 2, 3, 4, 5, 6, 7, 99]);
}

#[test]
fn unbounded_timeout_waits_for_room() {
    let (mut tx, mut rx) = QueueBuilder::new().with_capacity(2).build::<NonZeroU64>().unwrap();
    tx.push(nz(1));
    tx.push(nz(2));
    let consumer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        let first = rx.pop().get();
        (first, rx)
    });
    assert!(tx.try_push(nz(3), Wait::Timeout(Duration::MAX)).is_ok());
    let (first, mut rx) = consumer.join().unwrap();
    assert_eq!(first, 1);
    assert_eq!(rx.try_pop(Wait::Timeout(Duration::MAX)).map(NonZeroU64::get), Some(2));
    assert_eq!(rx.try_pop(Wait::Timeout(Duration::MAX)).map(NonZeroU64::get), Some(3));
}

#[test]
fn reservation_never_overstates_room() {
    let (mut tx, mut rx) = QueueBuilder::new()
        .with_capacity(32)
        .with_producer_batch(8)
        .build::<NonZeroU64>()
        .unwrap();
    let mut written = 0u64;
    loop {
        let room = tx.try_reserve_for_write(1, Wait::NoWait);
        if room == 0 {
            break;
        }
        assert!(room as u64 + written <= 32, "reserved {room} with {written} queued");
        for _ in 0..room {
            written += 1;
            tx.write(nz(written));
        }
    }
    assert_eq!(written, 32);
    for expect in 1..=32 {
        assert_eq!(rx.pop().get(), expect);
    }
}

#[test]
fn spsc_fifo_across_threads() {
    const N: u64 = 200_000;
    let (mut tx, mut rx) = QueueBuilder::new().with_capacity(256).build::<NonZeroU64>().unwrap();

    let producer = thread::spawn(move || {
        let mut rng = fastrand::Rng::with_seed(7);
        for i in 1..=N {
            tx.push(nz(i));
            if rng.u32(..1000) == 0 {
                thread::yield_now();
            }
        }
        tx
    });

    let consumer = thread::spawn(move || {
        let mut rng = fastrand::Rng::with_seed(11);
        let mut expect = 1u64;
        while expect <= N {
            let ready = rx.wait_for_data(Wait::Block);
            assert!(ready > 0);
            // sometimes take only part of the ready run
            let take = if rng.bool() { ready } else { rng.usize(1..=ready) };
            for _ in 0..take {
                let got = rx.try_pop(Wait::NoWait).expect("ready element missing");
                assert_eq!(got.get(), expect, "out of order");
                expect += 1;
            }
        }
        rx
    });

    let tx = producer.join().unwrap();
    let rx = consumer.join().unwrap();
    assert!(rx.is_empty());
    let stats = tx.stats();
    println!(
        "spsc: enqueue_fulls {} backtrackings {} history {}",
        stats.enqueue_fulls, stats.backtrackings, stats.batch_history
    );
    assert!(stats.backtrackings > 0);
}

#[test]
fn boxed_elements_cross_threads_once() {
    struct Tracked(Arc<AtomicUsize>, u32);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    const N: u32 = 20_000;
    let drops = Arc::new(AtomicUsize::new(0));
    let (mut tx, mut rx) = QueueBuilder::new().with_capacity(64).build::<Box<Tracked>>().unwrap();

    let d = Arc::clone(&drops);
    let producer = thread::spawn(move || {
        for i in 0..N {
            tx.push(Box::new(Tracked(Arc::clone(&d), i)));
        }
    });
    let mut sum = 0u64;
    for _ in 0..N {
        sum += rx.pop().1 as u64;
    }
    producer.join().unwrap();
    assert_eq!(sum, (N as u64) * (N as u64 - 1) / 2);
    assert_eq!(drops.load(Ordering::SeqCst), N as usize);
}

#[test]
fn dropping_queue_drops_unconsumed_elements() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    {
        let (mut tx, mut rx) = QueueBuilder::new().with_capacity(16).build::<Box<Tracked>>().unwrap();
        for _ in 0..10 {
            tx.push(Box::new(Tracked(Arc::clone(&drops))));
        }
        drop(rx.pop());
        drop(rx.pop());
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 10);
}
