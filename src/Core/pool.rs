// Task pool the scheduler submits drains to

use super::futex::{futex_wait, futex_wake, futex_wake_all};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// One unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run jobs in the background.
pub trait TaskPool: Send + Sync {
    fn submit(&self, job: Job);

    /// Jobs submitted and not yet finished.
    fn outstanding(&self) -> usize;
}

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    /// Bumped on every submit and on shutdown; idle threads park on it.
    signal: AtomicU32,
    outstanding: AtomicUsize,
    shutdown: AtomicBool,
    panics: AtomicU64,
}

/// Fixed set of named OS threads pulling jobs from one queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Longest a parked thread sleeps before re-checking the queue.
    const PARK: Duration = Duration::from_millis(100);

    pub fn new(threads: usize) -> io::Result<Self> {
        if threads == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread pool needs at least one thread",
            ));
        }

        let mut pool = Self {
            shared: Arc::new(Shared {
                jobs: Mutex::new(VecDeque::new()),
                signal: AtomicU32::new(0),
                outstanding: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                panics: AtomicU64::new(0),
            }),
            threads: Vec::with_capacity(threads),
        };

        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            // on error the partly built pool is dropped, which joins what was spawned
            let handle = thread::Builder::new()
                .name(format!("bq-worker-{index}"))
                .spawn(move || worker_loop(&shared))?;
            pool.threads.push(handle);
        }

        info!(threads, "thread pool started");
        Ok(pool)
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }

    /// Jobs that ended in a panic.
    pub fn panics(&self) -> u64 {
        self.shared.panics.load(Relaxed)
    }
}

impl TaskPool for ThreadPool {
    fn submit(&self, job: Job) {
        self.shared.outstanding.fetch_add(1, AcqRel);
        self.shared.jobs.lock().push_back(job);
        self.shared.signal.fetch_add(1, Release);
        futex_wake(&self.shared.signal);
    }

    fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Acquire)
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let seen = shared.signal.load(Acquire);
        let job = shared.jobs.lock().pop_front();
        match job {
            Some(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    shared.panics.fetch_add(1, Relaxed);
                    error!(
                        thread = thread::current().name().unwrap_or("?"),
                        panic = %panic_message(payload.as_ref()),
                        "pool job panicked"
                    );
                }
                shared.outstanding.fetch_sub(1, AcqRel);
            }
            None if shared.shutdown.load(Acquire) => break,
            None => futex_wait(&shared.signal, seen, Some(ThreadPool::PARK)),
        }
    }
    debug!(thread = thread::current().name().unwrap_or("?"), "pool thread exiting");
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Release);
        self.shared.signal.fetch_add(1, Release);
        futex_wake_all(&self.shared.signal);

        let me = thread::current().id();
        for handle in self.threads.drain(..) {
            // a job may hold the last reference to its own pool
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }
        info!("thread pool stopped");
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads.len())
            .field("outstanding", &self.outstanding())
            .field("panics", &self.panics())
            .finish()
    }
}
