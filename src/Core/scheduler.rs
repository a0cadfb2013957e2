// Turns "this mailbox has work" into a drain running on the task pool,
// and provides the process-wide quiescence barrier.

use super::pool::{TaskPool, ThreadPool};
use crossbeam_utils::{Backoff, CachePadded};
use lazy_static::lazy_static;
use std::cell::Cell;
use std::fmt;
use std::io;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, SeqCst};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Work the scheduler can run: one drain of one mailbox by one worker.
pub trait Drainable: Send + Sync {
    fn drain(self: Arc<Self>, worker: u64);

    /// Identity used in logs.
    fn id(&self) -> u64;
}

lazy_static! {
    static ref CURRENT: Arc<Scheduler> = {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        match ThreadPool::new(threads) {
            Ok(pool) => Scheduler::new(Arc::new(pool)),
            Err(err) => panic!("cannot start the default thread pool: {err}"),
        }
    };
}

thread_local! {
    // (scheduler address, worker id) of the drain running on this thread
    static CURRENT_WORKER: Cell<Option<(usize, u64)>> = const { Cell::new(None) };
}

pub struct Scheduler {
    pool: Arc<dyn TaskPool>,
    /// Drains submitted and not yet finished.
    running: CachePadded<AtomicUsize>,
    started: AtomicU64,
    sequence: AtomicU64,
    /// Threads inside `wait_all`.
    waiters: AtomicUsize,
}

impl Scheduler {
    pub fn new(pool: Arc<dyn TaskPool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            running: CachePadded::new(AtomicUsize::new(0)),
            started: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
        })
    }

    /// A scheduler over its own [`ThreadPool`].
    pub fn with_threads(threads: usize) -> io::Result<Arc<Self>> {
        Ok(Self::new(Arc::new(ThreadPool::new(threads)?)))
    }

    /// The process-wide scheduler, created on first use.
    pub fn current() -> Arc<Scheduler> {
        Arc::clone(&CURRENT)
    }

    /// A fresh worker identity: never 0 and never `u64::MAX`, which the
    /// mailbox owner token reserves.
    pub fn next_worker_id(&self) -> u64 {
        loop {
            let id = self.sequence.fetch_add(1, Relaxed).wrapping_add(1);
            if id != 0 && id != u64::MAX {
                return id;
            }
        }
    }

    /// Submit one drain of `task` to the pool.
    pub fn start(self: &Arc<Self>, task: Arc<dyn Drainable>) {
        self.running.fetch_add(1, AcqRel);
        self.started.fetch_add(1, Relaxed);
        let worker = self.next_worker_id();
        trace!(mailbox = task.id(), worker, "drain scheduled");

        let scheduler = Arc::clone(self);
        self.pool.submit(Box::new(move || {
            let _guard = WorkerGuard::enter(&scheduler, worker);
            task.drain(worker);
        }));
    }

    /// Record that a started drain has finished.
    pub fn exited(&self) {
        let prev = self.running.fetch_sub(1, AcqRel);
        debug_assert!(prev > 0, "exited without a running drain");
    }

    /// Whether idle drains may keep lingering for more work: false while
    /// any thread is inside [`Scheduler::wait_all`].
    pub fn should_continue(&self) -> bool {
        self.waiters.load(Acquire) == 0
    }

    /// Threads currently waiting in [`Scheduler::wait_all`].
    pub fn waiters(&self) -> usize {
        self.waiters.load(Acquire)
    }

    /// Drains submitted and not yet finished.
    pub fn running(&self) -> usize {
        self.running.load(Acquire)
    }

    /// Drains started since creation.
    pub fn started(&self) -> u64 {
        self.started.load(Relaxed)
    }

    /// Jobs outstanding in the underlying pool.
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    /// The worker id of the drain running on this thread, if it belongs to
    /// this scheduler.
    pub fn current_worker(&self) -> Option<u64> {
        let me = self as *const Scheduler as usize;
        CURRENT_WORKER.with(|w| match w.get() {
            Some((owner, worker)) if owner == me => Some(worker),
            _ => None,
        })
    }

    /// Stop idle drains from lingering and wait until every drain has
    /// finished. Called from inside a drain, that drain counts as settled.
    pub fn wait_all(&self) {
        self.waiters.fetch_add(1, SeqCst);
        let settled = usize::from(self.current_worker().is_some());

        let backoff = Backoff::new();
        while self.running.load(Acquire) > settled {
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }

        self.waiters.fetch_sub(1, SeqCst);
        debug!(started = self.started(), "all drains settled");
    }
}

/// Marks the current thread as running a drain; on drop (also when the
/// drain panics) restores the previous marker and calls `exited`.
struct WorkerGuard<'a> {
    scheduler: &'a Scheduler,
    previous: Option<(usize, u64)>,
}

impl<'a> WorkerGuard<'a> {
    fn enter(scheduler: &'a Scheduler, worker: u64) -> Self {
        let me = scheduler as *const Scheduler as usize;
        let previous = CURRENT_WORKER.with(|w| w.replace(Some((me, worker))));
        Self {
            scheduler,
            previous,
        }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|w| w.set(self.previous));
        self.scheduler.exited();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_scheduler(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering::Release;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;
    use std::time::Duration;

    struct Counter {
        hits: AtomicUsize,
        seen_worker: AtomicU64,
        scheduler: Arc<Scheduler>,
    }

    impl Drainable for Counter {
        fn drain(self: Arc<Self>, worker: u64) {
            self.hits.fetch_add(1, Relaxed);
            self.seen_worker.store(worker, Relaxed);
            assert_eq!(self.scheduler.current_worker(), Some(worker));
        }

        fn id(&self) -> u64 {
            1
        }
    }

    #[test]
    fn worker_ids_skip_reserved_values() {
        let scheduler = Scheduler::with_threads(1).unwrap();
        scheduler.sequence.store(u64::MAX - 2, Relaxed);
        assert_eq!(scheduler.next_worker_id(), u64::MAX - 1);
        assert_eq!(scheduler.next_worker_id(), 1);
    }

    #[test]
    fn start_runs_and_settles() {
        let scheduler = Scheduler::with_threads(2).unwrap();
        let task = Arc::new(Counter {
            hits: AtomicUsize::new(0),
            seen_worker: AtomicU64::new(0),
            scheduler: Arc::clone(&scheduler),
        });
        for _ in 0..10 {
            scheduler.start(task.clone());
        }
        scheduler.wait_all();
        assert_eq!(scheduler.running(), 0);
        assert_eq!(scheduler.started(), 10);
        assert_eq!(task.hits.load(Relaxed), 10);
        assert_ne!(task.seen_worker.load(Relaxed), 0);
        assert!(scheduler.should_continue());
        assert_eq!(scheduler.current_worker(), None);
    }

    struct Waiter {
        scheduler: Arc<Scheduler>,
        done: mpsc::Sender<()>,
    }

    impl Drainable for Waiter {
        fn drain(self: Arc<Self>, _worker: u64) {
            // the caller is the last live drain; this must not deadlock
            self.scheduler.wait_all();
            let _ = self.done.send(());
        }

        fn id(&self) -> u64 {
            2
        }
    }

    #[test]
    fn wait_all_from_inside_a_drain() {
        let scheduler = Scheduler::with_threads(1).unwrap();
        let (tx, rx) = mpsc::channel();
        scheduler.start(Arc::new(Waiter {
            scheduler: Arc::clone(&scheduler),
            done: tx,
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(()));
        scheduler.wait_all();
    }

    struct Panicky;

    impl Drainable for Panicky {
        fn drain(self: Arc<Self>, _worker: u64) {
            panic!("drain aborted");
        }

        fn id(&self) -> u64 {
            3
        }
    }

    #[test]
    fn panicking_drain_is_accounted() {
        let scheduler = Scheduler::with_threads(1).unwrap();
        scheduler.start(Arc::new(Panicky));
        scheduler.wait_all();
        assert_eq!(scheduler.running(), 0);
    }

    struct Hold {
        release: AtomicBool,
    }

    impl Drainable for Hold {
        fn drain(self: Arc<Self>, _worker: u64) {
            while !self.release.load(Acquire) {
                std::thread::yield_now();
            }
        }

        fn id(&self) -> u64 {
            4
        }
    }

    struct Nested {
        scheduler: Arc<Scheduler>,
        lingering_allowed: mpsc::Sender<bool>,
    }

    impl Drainable for Nested {
        fn drain(self: Arc<Self>, _worker: u64) {
            self.scheduler.wait_all();
            let _ = self.lingering_allowed.send(self.scheduler.should_continue());
        }

        fn id(&self) -> u64 {
            5
        }
    }

    fn spin_until(mut cond: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::yield_now();
        }
    }

    #[test]
    fn lingering_stays_off_until_the_last_waiter_leaves() {
        let scheduler = Scheduler::with_threads(2).unwrap();
        let hold = Arc::new(Hold {
            release: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::channel();
        scheduler.start(hold.clone());
        scheduler.start(Arc::new(Nested {
            scheduler: Arc::clone(&scheduler),
            lingering_allowed: tx,
        }));
        spin_until(|| scheduler.waiters() == 1);

        let outer = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.wait_all())
        };
        spin_until(|| scheduler.waiters() == 2);
        assert!(!scheduler.should_continue());

        // the nested waiter finishes first; the outer one is still waiting
        hold.release.store(true, Release);
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok(false));

        outer.join().unwrap();
        assert_eq!(scheduler.waiters(), 0);
        assert!(scheduler.should_continue());
        assert_eq!(scheduler.running(), 0);
    }
}
