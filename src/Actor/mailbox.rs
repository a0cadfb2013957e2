//! Single-owner mailboxes.
//!
//! A mailbox holds an actor's state and one call channel per producer
//! source. The `owner` word decides who may touch either:
//!
//! - `IDLE`: nobody. A producer that posts a call moves it to `SCHEDULED`
//!   and asks the scheduler for a drain; exactly one producer wins that CAS.
//! - `SCHEDULED`: a drain is queued on the pool. The drain claims the
//!   mailbox by swapping in its worker id.
//! - a worker id: that worker alone runs executors. When every channel stays
//!   empty it stores `IDLE`, issues a full fence and probes the channels
//!   once more; if a call slipped in it tries to take the mailbox back.
//!
//! Producers fence before reading the owner, the worker fences after
//! clearing it, so at least one side sees the other's write and no call
//! is left without a drain.

use super::builder::MailboxConfig;
use crate::error::{CallError, ConfigError};
use crate::BQueue::Structs::Wait;
use crate::Core::pool::panic_message;
use crate::Core::{Drainable, Scheduler};
use crate::Messaging::{Calls, MessageConsumer, MessageProducer, MessageQueue};
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Mutex, RwLock};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst};
use std::sync::atomic::{fence, AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace};

/// Owner value of a mailbox nobody holds.
pub const IDLE: u64 = 0;

/// Owner value of a mailbox whose drain is queued but not yet running.
pub const SCHEDULED: u64 = u64::MAX;

static MAILBOX_IDS: AtomicU64 = AtomicU64::new(1);

struct DrainState<A> {
    actor: A,
    channels: Vec<MessageConsumer<A>>,
    next: usize,
}

/// Counters of one mailbox. Relaxed reads; a snapshot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxStats {
    /// Wake-ups that found the mailbox idle.
    pub have_works: u64,
    /// Calls consumed, failed ones included.
    pub calls: u64,
    pub failed_calls: u64,
    /// Drains that claimed the mailbox.
    pub drains: u64,
}

pub struct Mailbox<A: Send + 'static> {
    owner: CachePadded<AtomicU64>,
    state: UnsafeCell<DrainState<A>>,
    /// Every connected queue, for the read-only probe after relinquishing.
    probes: RwLock<Vec<Arc<MessageQueue>>>,
    /// Consumers connected since the owner last looked.
    pending: Mutex<Vec<MessageConsumer<A>>>,
    /// Set under the `pending` lock whenever it holds consumers.
    pending_dirty: AtomicBool,
    scheduler: Arc<Scheduler>,
    config: MailboxConfig,
    id: u64,
    have_works: AtomicU64,
    calls: AtomicU64,
    failed_calls: AtomicU64,
    drains: AtomicU64,
}

// SAFETY: `state` is only touched by the current holder of the owner token,
// and the token changes hands through acquire/release CAS.
unsafe impl<A: Send + 'static> Sync for Mailbox<A> {}

impl<A: Send + 'static> Mailbox<A> {
    pub(crate) fn new(actor: A, config: MailboxConfig, scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            owner: CachePadded::new(AtomicU64::new(IDLE)),
            state: UnsafeCell::new(DrainState {
                actor,
                channels: Vec::new(),
                next: 0,
            }),
            probes: RwLock::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            pending_dirty: AtomicBool::new(false),
            scheduler,
            config,
            id: MAILBOX_IDS.fetch_add(1, Relaxed),
            have_works: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            drains: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Current owner token: [`IDLE`], [`SCHEDULED`] or a worker id.
    pub fn owner(&self) -> u64 {
        self.owner.load(Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.owner() == IDLE
    }

    /// Channels connected and not yet released. A channel is released by
    /// the drain after its producer is dropped and its calls have run.
    pub fn channels(&self) -> usize {
        self.probes.read().len()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            have_works: self.have_works.load(Relaxed),
            calls: self.calls.load(Relaxed),
            failed_calls: self.failed_calls.load(Relaxed),
            drains: self.drains.load(Relaxed),
        }
    }

    /// Open a new channel into this mailbox for one producer source.
    ///
    /// A drain already running picks the channel up on its next round.
    pub fn connect(self: &Arc<Self>) -> Result<MessageProducer<A>, ConfigError> {
        let queue = Arc::new(self.config.channel.build_queue()?);
        self.probes.write().push(Arc::clone(&queue));
        {
            let mut pending = self.pending.lock();
            pending.push(MessageConsumer::new(Arc::clone(&queue)));
            self.pending_dirty.store(true, Release);
        }
        debug!(mailbox = self.id, channels = self.channels(), "channel connected");
        Ok(MessageProducer::new(queue, Some(Arc::clone(self))))
    }

    /// Producer-side wake-up: schedule a drain unless one is queued or
    /// running. Safe to call from any number of threads at once.
    pub fn have_tasks(self: &Arc<Self>) {
        fence(SeqCst);
        if self.owner.load(Relaxed) != IDLE {
            return;
        }
        self.have_works.fetch_add(1, Relaxed);
        if self
            .owner
            .compare_exchange(IDLE, SCHEDULED, AcqRel, Relaxed)
            .is_ok()
        {
            trace!(mailbox = self.id, "mailbox scheduled");
            let task: Arc<dyn Drainable> = Arc::clone(self) as Arc<dyn Drainable>;
            self.scheduler.start(task);
        }
    }

    /// Take the mailbox inline if nobody holds it, to work on the actor
    /// from the calling thread. Calls posted meanwhile wait; releasing the
    /// guard schedules them.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ActorGuard<A>> {
        let token = self.scheduler.next_worker_id();
        self.owner
            .compare_exchange(IDLE, token, AcqRel, Relaxed)
            .ok()?;
        trace!(mailbox = self.id, token, "mailbox acquired inline");
        Some(ActorGuard {
            mailbox: Arc::clone(self),
            token,
        })
    }

    /// Whether any connected channel has a published call waiting or has
    /// been closed and is still to be released.
    fn has_pending_work(&self) -> bool {
        self.probes
            .read()
            .iter()
            .any(|queue| queue.is_closed() || queue.has_data())
    }

    fn violation(&self, worker: u64, expected: u64) -> ! {
        let found = self.owner.load(Acquire);
        error!(
            mailbox = self.id,
            worker,
            expected,
            found,
            "mailbox owner token changed under its holder"
        );
        panic!(
            "mailbox {} owner token is {found}, expected {expected}",
            self.id
        );
    }

    /// Move newly connected consumers into the drain state.
    fn adopt_pending(&self, state: &mut DrainState<A>) {
        if !self.pending_dirty.load(Acquire) {
            return;
        }
        let mut pending = self.pending.lock();
        self.pending_dirty.store(false, Relaxed);
        state.channels.append(&mut pending);
    }

    /// Drop channels whose producer is gone and whose calls have all run.
    fn release_finished(&self, state: &mut DrainState<A>) {
        if !state.channels.iter().any(MessageConsumer::is_finished) {
            return;
        }
        // a finished channel stays finished: nobody can post to it again
        let (finished, live): (Vec<_>, Vec<_>) = state
            .channels
            .drain(..)
            .partition(MessageConsumer::is_finished);
        state.channels = live;
        self.probes
            .write()
            .retain(|queue| !finished.iter().any(|c| Arc::ptr_eq(queue, c.queue())));
        debug!(
            mailbox = self.id,
            released = finished.len(),
            channels = state.channels.len(),
            "closed channels released"
        );
    }

    /// Runs while `worker` holds the token. Returns when the channels have
    /// stayed empty for every linger round.
    ///
    /// # Safety
    /// The caller holds the owner token as `worker`.
    unsafe fn drain_claimed(&self, worker: u64) {
        let state = &mut *self.state.get();
        let backoff = Backoff::new();
        let mut idle_since: Option<Instant> = None;
        let mut lingered = 0;

        loop {
            self.adopt_pending(state);
            self.release_finished(state);
            if self.drain_round(state, worker) > 0 {
                idle_since = None;
                lingered = 0;
                backoff.reset();
                continue;
            }

            let since = *idle_since.get_or_insert_with(Instant::now);
            if since.elapsed() < self.config.idle_wait {
                backoff.snooze();
                continue;
            }
            lingered += 1;
            if lingered >= self.config.linger_rounds || !self.scheduler.should_continue() {
                return;
            }
            idle_since = None;
        }
    }

    /// One round-robin lap over every channel.
    fn drain_round(&self, state: &mut DrainState<A>, worker: u64) -> usize {
        let count = state.channels.len();
        let mut done = 0;
        for _ in 0..count {
            let index = state.next % count;
            state.next = (index + 1) % count;
            done += self.dispatch(&mut state.actor, &mut state.channels[index], worker);
        }
        done
    }

    /// Run up to `max_chunk` ready calls of one channel.
    fn dispatch(&self, actor: &mut A, consumer: &mut MessageConsumer<A>, worker: u64) -> usize {
        if consumer.wait_calls(Wait::NoWait) == 0 {
            return 0;
        }
        let max_chunk = self.config.max_chunk;
        let start = consumer.popped();

        loop {
            let used = (consumer.popped() - start) as usize;
            if used >= max_chunk {
                break;
            }
            if self.owner.load(Relaxed) != worker {
                self.violation(worker, worker);
            }
            let Some(address) = consumer.begin_pop_call() else {
                break;
            };
            let grant = max_chunk - used - 1;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut calls = Calls::new(&mut *consumer, address, grant);
                let result = (address.executor())(&mut *actor, &mut calls);
                if result.is_ok() && calls.in_call() {
                    calls.finish();
                }
                result
            }));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(CallError::Panicked(panic_message(payload.as_ref()))),
            };
            if let Some(err) = failure {
                self.failed_calls.fetch_add(1, Relaxed);
                error!(
                    mailbox = self.id,
                    worker,
                    executor = ?address,
                    error = %err,
                    "call failed; skipping"
                );
                consumer.abandon_call();
            }
        }

        let done = (consumer.popped() - start) as usize;
        self.calls.fetch_add(done as u64, Relaxed);
        done
    }

    /// Give the token back. Returns `true` if work showed up and the
    /// worker took the mailbox again.
    fn relinquish(&self, worker: u64) -> bool {
        if self
            .owner
            .compare_exchange(worker, IDLE, AcqRel, Acquire)
            .is_err()
        {
            self.violation(worker, worker);
        }
        fence(SeqCst);

        if !self.has_pending_work() {
            trace!(mailbox = self.id, worker, "mailbox relinquished");
            return false;
        }
        match self.owner.compare_exchange(IDLE, worker, AcqRel, Relaxed) {
            Ok(_) => {
                trace!(mailbox = self.id, worker, "mailbox reclaimed");
                true
            }
            Err(taken) => {
                trace!(mailbox = self.id, worker, taken, "work handed to the new owner");
                false
            }
        }
    }
}

impl<A: Send + 'static> Drainable for Mailbox<A> {
    fn drain(self: Arc<Self>, worker: u64) {
        if self
            .owner
            .compare_exchange(SCHEDULED, worker, AcqRel, Acquire)
            .is_err()
        {
            self.violation(worker, SCHEDULED);
        }
        self.drains.fetch_add(1, Relaxed);
        trace!(mailbox = self.id, worker, "mailbox claimed");

        loop {
            // SAFETY: the CAS above (or the reclaim in `relinquish`) made
            // `worker` the owner.
            unsafe { self.drain_claimed(worker) };
            if !self.relinquish(worker) {
                break;
            }
        }
    }

    fn id(&self) -> u64 {
        self.id
    }
}

impl<A: Send + 'static> fmt::Debug for Mailbox<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_mailbox(self.id, self.owner(), self.channels(), &self.stats(), f)
    }
}

/// Inline ownership of a mailbox's actor, from [`Mailbox::try_acquire`].
pub struct ActorGuard<A: Send + 'static> {
    mailbox: Arc<Mailbox<A>>,
    token: u64,
}

impl<A: Send + 'static> ActorGuard<A> {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn mailbox(&self) -> &Arc<Mailbox<A>> {
        &self.mailbox
    }
}

impl<A: Send + 'static> Deref for ActorGuard<A> {
    type Target = A;

    fn deref(&self) -> &A {
        // SAFETY: the guard holds the owner token.
        unsafe { &(*self.mailbox.state.get()).actor }
    }
}

impl<A: Send + 'static> DerefMut for ActorGuard<A> {
    fn deref_mut(&mut self) -> &mut A {
        unsafe { &mut (*self.mailbox.state.get()).actor }
    }
}

impl<A: Send + 'static> Drop for ActorGuard<A> {
    fn drop(&mut self) {
        let mailbox = &self.mailbox;
        if mailbox
            .owner
            .compare_exchange(self.token, IDLE, AcqRel, Acquire)
            .is_err()
        {
            error!(
                mailbox = mailbox.id,
                token = self.token,
                found = mailbox.owner.load(Acquire),
                "inline owner lost its token"
            );
            return;
        }
        fence(SeqCst);
        if mailbox.has_pending_work() {
            mailbox.have_tasks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Actor::MailboxBuilder;
    use crate::Messaging::Address;
    use std::time::Duration;

    #[derive(Default)]
    struct Tally {
        sum: u64,
    }

    fn add(t: &mut Tally, calls: &mut Calls<'_, Tally>) -> Result<(), CallError> {
        t.sum += calls.pop_arg::<u64>()?;
        Ok(())
    }

    fn mailbox(threads: usize) -> Arc<Mailbox<Tally>> {
        MailboxBuilder::new()
            .with_scheduler(Scheduler::with_threads(threads).unwrap())
            .with_idle_wait(Duration::from_micros(100))
            .with_linger_rounds(2)
            .build(Tally::default())
            .unwrap()
    }

    #[test]
    fn starts_idle() {
        let mb = mailbox(1);
        assert!(mb.is_idle());
        assert_eq!(mb.owner(), IDLE);
        assert_eq!(mb.stats(), MailboxStats::default());
    }

    #[test]
    fn posted_calls_are_drained() {
        let mb = mailbox(2);
        let mut tx = mb.connect().unwrap();
        let add_at = Address::new(add);
        for i in 0..1000u64 {
            tx.begin_push_call(add_at, Wait::Block).unwrap().push_arg(i);
        }
        mb.scheduler().wait_all();
        assert!(mb.is_idle());
        assert_eq!(mb.try_acquire().unwrap().sum, 999 * 1000 / 2);
        let stats = mb.stats();
        assert_eq!(stats.calls, 1000);
        assert_eq!(stats.failed_calls, 0);
        assert!(stats.drains >= 1);
    }

    #[test]
    fn acquire_excludes_and_hands_back_work() {
        let mb = mailbox(1);
        let mut tx = mb.connect().unwrap();
        let guard = mb.try_acquire().unwrap();
        assert!(mb.try_acquire().is_none());
        assert_eq!(mb.owner(), guard.token());

        tx.begin_push_call(Address::new(add), Wait::NoWait)
            .unwrap()
            .push_arg(5u64);
        // the post found the mailbox held, so nothing was scheduled
        assert_eq!(mb.scheduler().started(), 0);
        assert_eq!(guard.sum, 0);

        drop(guard);
        mb.scheduler().wait_all();
        assert_eq!(mb.scheduler().started(), 1);
        assert_eq!(mb.try_acquire().unwrap().sum, 5);
    }

    #[test]
    fn drain_without_schedule_is_a_violation() {
        let mb = mailbox(1);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Arc::clone(&mb).drain(42);
        }));
        assert!(result.is_err());
        assert!(mb.is_idle());
    }
}
