//! Out-of-line argument storage for queued calls.
//!
//! Every call pushes its arguments into two regions that advance in step
//! with the message ring: a byte region for `Pod` values and a reference
//! region for shared objects. Neither region is length-prefixed; the pop
//! side replays the push sequence of the call and is bounded by the
//! [`ArgSpan`] recorded in the call's message slot.

use crate::error::{CallError, ConfigError};
use bytemuck::Pod;
use crossbeam_utils::CachePadded;
use std::any::{type_name, Any};
use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

/// A reference argument as stored in the reference region.
pub type ArgRef = Arc<dyn Any + Send + Sync>;

/// Where one call's arguments live in the two regions.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgSpan {
    pub bytes_at: u32,
    pub bytes_len: u32,
    pub refs_at: u32,
    pub refs_len: u32,
}

impl ArgSpan {
    #[inline]
    pub fn bytes_end(&self) -> usize {
        self.bytes_at as usize + self.bytes_len as usize
    }

    #[inline]
    pub fn refs_end(&self) -> usize {
        self.refs_at as usize + self.refs_len as usize
    }
}

/// One side's position in both regions. `*_start` marks the current call.
#[repr(C)]
#[derive(Default)]
pub struct ArgCursors {
    pub bytes_start: AtomicUsize,
    pub bytes: AtomicUsize,
    pub refs_start: AtomicUsize,
    pub refs: AtomicUsize,
}

pub struct ArgsChannel {
    bytes: Box<[UnsafeCell<u8>]>,
    refs: Box<[UnsafeCell<Option<ArgRef>>]>,
    max_call_bytes: usize,
    max_call_refs: usize,
    /// Producer cursors.
    head: CachePadded<ArgCursors>,
    /// Consumer cursors.
    tail: CachePadded<ArgCursors>,
}

// SAFETY: the producer only writes the part of each region the consumer is
// not reading, and the hand-off of every call is ordered by the release and
// acquire of its message slot. Reference payloads are `Send + Sync`.
unsafe impl Send for ArgsChannel {}
unsafe impl Sync for ArgsChannel {}

impl ArgsChannel {
    /// A channel for a ring of `capacity` calls, each carrying at most
    /// `max_call_bytes` argument bytes and `max_call_refs` references.
    ///
    /// With every call bounded and at most `capacity` calls holding
    /// arguments at once, `capacity + 1` calls' worth of room per region
    /// covers the in-flight calls plus the gap left by a wrap.
    pub fn new(
        capacity: usize,
        max_call_bytes: usize,
        max_call_refs: usize,
    ) -> Result<Self, ConfigError> {
        let bytes_len = region_len("bytes", capacity, max_call_bytes)?;
        let refs_len = region_len("refs", capacity, max_call_refs)?;
        Ok(Self {
            bytes: (0..bytes_len).map(|_| UnsafeCell::new(0)).collect(),
            refs: (0..refs_len).map(|_| UnsafeCell::new(None)).collect(),
            max_call_bytes,
            max_call_refs,
            head: CachePadded::new(ArgCursors::default()),
            tail: CachePadded::new(ArgCursors::default()),
        })
    }

    pub fn max_call_bytes(&self) -> usize {
        self.max_call_bytes
    }

    pub fn max_call_refs(&self) -> usize {
        self.max_call_refs
    }

    pub fn bytes_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn refs_len(&self) -> usize {
        self.refs.len()
    }

    pub fn head(&self) -> &ArgCursors {
        &self.head
    }

    pub fn tail(&self) -> &ArgCursors {
        &self.tail
    }

    // ---------------------------------------------------------------------
    // Producer side
    // ---------------------------------------------------------------------

    /// Start a call at the last committed producer position.
    ///
    /// `*_start` holds where the previous `end_push` left off. Anything
    /// pushed after it belongs to a call that was never ended; it is
    /// discarded here and its references are released.
    ///
    /// # Safety
    /// Only the single producer may call this, and only while it holds a
    /// reserved message slot for the call.
    pub unsafe fn begin_push(&self) {
        let bytes_at = wrap(
            self.head.bytes_start.load(Relaxed),
            self.bytes.len(),
            self.max_call_bytes,
        );
        let refs_at = wrap(
            self.head.refs_start.load(Relaxed),
            self.refs.len(),
            self.max_call_refs,
        );
        let refs_end = self.head.refs.load(Relaxed).min(self.refs.len());
        for pos in refs_at..refs_end {
            drop((*self.refs[pos].get()).take());
        }
        self.head.bytes_start.store(bytes_at, Relaxed);
        self.head.bytes.store(bytes_at, Relaxed);
        self.head.refs_start.store(refs_at, Relaxed);
        self.head.refs.store(refs_at, Relaxed);
    }

    /// Append a plain value to the current call.
    ///
    /// # Panics
    /// If the call would carry more than `max_call_bytes`.
    ///
    /// # Safety
    /// Only the single producer may call this, between `begin_push` and
    /// `end_push`.
    pub unsafe fn push_arg<T: Pod>(&self, value: T) {
        let size = size_of::<T>();
        let start = self.head.bytes_start.load(Relaxed);
        let pos = self.head.bytes.load(Relaxed);
        assert!(
            pos - start + size <= self.max_call_bytes,
            "call arguments exceed {} bytes",
            self.max_call_bytes
        );
        assert!(pos + size <= self.bytes.len(), "byte cursor past the region");
        let src = bytemuck::bytes_of(&value);
        ptr::copy_nonoverlapping(src.as_ptr(), self.byte_ptr(pos), size);
        self.head.bytes.store(pos + size, Relaxed);
    }

    /// Append a reference to the current call; it stays alive until popped
    /// or until the call is closed.
    ///
    /// # Panics
    /// If the call would carry more than `max_call_refs`.
    ///
    /// # Safety
    /// As for [`ArgsChannel::push_arg`].
    pub unsafe fn push_ref(&self, value: ArgRef) {
        let start = self.head.refs_start.load(Relaxed);
        let pos = self.head.refs.load(Relaxed);
        assert!(
            pos - start < self.max_call_refs,
            "call references exceed {}",
            self.max_call_refs
        );
        assert!(pos < self.refs.len(), "reference cursor past the region");
        *self.refs[pos].get() = Some(value);
        self.head.refs.store(pos + 1, Relaxed);
    }

    /// Close the current call, commit the producer position and return the
    /// call's span. Each cursor goes back to the start of its region when
    /// less than one call's worth remains.
    ///
    /// # Safety
    /// Only the single producer may call this, after `begin_push`.
    pub unsafe fn end_push(&self) -> ArgSpan {
        let bytes_at = self.head.bytes_start.load(Relaxed);
        let bytes = self.head.bytes.load(Relaxed);
        let refs_at = self.head.refs_start.load(Relaxed);
        let refs = self.head.refs.load(Relaxed);

        let bytes_next = wrap(bytes, self.bytes.len(), self.max_call_bytes);
        let refs_next = wrap(refs, self.refs.len(), self.max_call_refs);
        self.head.bytes_start.store(bytes_next, Relaxed);
        self.head.bytes.store(bytes_next, Relaxed);
        self.head.refs_start.store(refs_next, Relaxed);
        self.head.refs.store(refs_next, Relaxed);

        // Offsets fit: region lengths were checked against u32 at construction.
        ArgSpan {
            bytes_at: bytes_at as u32,
            bytes_len: (bytes - bytes_at) as u32,
            refs_at: refs_at as u32,
            refs_len: (refs - refs_at) as u32,
        }
    }

    // ---------------------------------------------------------------------
    // Consumer side
    // ---------------------------------------------------------------------

    /// Start decoding the call recorded as `span`.
    ///
    /// # Safety
    /// Only the single consumer may call this, for a call whose message slot
    /// it has observed as published.
    pub unsafe fn begin_pop(&self, span: &ArgSpan) {
        debug_assert_eq!(
            self.tail.bytes.load(Relaxed),
            span.bytes_at as usize,
            "byte cursor out of step with the message ring"
        );
        debug_assert_eq!(
            self.tail.refs.load(Relaxed),
            span.refs_at as usize,
            "reference cursor out of step with the message ring"
        );
        self.tail.bytes_start.store(span.bytes_at as usize, Relaxed);
        self.tail.bytes.store(span.bytes_at as usize, Relaxed);
        self.tail.refs_start.store(span.refs_at as usize, Relaxed);
        self.tail.refs.store(span.refs_at as usize, Relaxed);
    }

    /// Next plain value of the call, bounded by `span`.
    ///
    /// # Safety
    /// Only the single consumer may call this, between `begin_pop(span)` and
    /// `end_pop(span)`.
    pub unsafe fn pop_arg<T: Pod>(&self, span: &ArgSpan) -> Result<T, CallError> {
        let size = size_of::<T>();
        let pos = self.tail.bytes.load(Relaxed);
        let end = span.bytes_end();
        if pos + size > end {
            return Err(CallError::ArgOverrun {
                wanted: size,
                left: end - pos,
            });
        }
        let src = std::slice::from_raw_parts(self.byte_ptr(pos) as *const u8, size);
        let value = bytemuck::pod_read_unaligned(src);
        self.tail.bytes.store(pos + size, Relaxed);
        Ok(value)
    }

    /// Next reference of the call, downcast to `T`.
    ///
    /// # Safety
    /// As for [`ArgsChannel::pop_arg`].
    pub unsafe fn pop_ref<T: Any + Send + Sync>(
        &self,
        span: &ArgSpan,
    ) -> Result<Arc<T>, CallError> {
        let pos = self.tail.refs.load(Relaxed);
        if pos >= span.refs_end() {
            return Err(CallError::MissingRef);
        }
        self.tail.refs.store(pos + 1, Relaxed);
        let value = (*self.refs[pos].get()).take().ok_or(CallError::MissingRef)?;
        value.downcast::<T>().map_err(|_| CallError::RefMismatch {
            expected: type_name::<T>(),
        })
    }

    /// Close the call recorded as `span`: release any reference left unread
    /// and move both cursors to where the producer ended the call.
    ///
    /// Returns whether the call was decoded to exactly its recorded length.
    ///
    /// # Safety
    /// Only the single consumer may call this, after `begin_pop(span)` and
    /// before the call's message slot is released.
    pub unsafe fn end_pop(&self, span: &ArgSpan) -> bool {
        let bytes_end = span.bytes_end();
        let refs_end = span.refs_end();
        let exact = self.tail.bytes.load(Relaxed) == bytes_end
            && self.tail.refs.load(Relaxed) == refs_end;

        for pos in self.tail.refs.load(Relaxed).min(refs_end)..refs_end {
            drop((*self.refs[pos].get()).take());
        }

        self.tail
            .bytes
            .store(wrap(bytes_end, self.bytes.len(), self.max_call_bytes), Relaxed);
        self.tail
            .refs
            .store(wrap(refs_end, self.refs.len(), self.max_call_refs), Relaxed);
        exact
    }

    #[inline]
    fn byte_ptr(&self, pos: usize) -> *mut u8 {
        // SAFETY: callers keep `pos` within the region (one past the end
        // only for zero-sized copies).
        unsafe { UnsafeCell::raw_get(self.bytes.as_ptr().add(pos)) }
    }
}

#[inline]
fn wrap(pos: usize, len: usize, per_call: usize) -> usize {
    if len.saturating_sub(pos) < per_call {
        0
    } else {
        pos
    }
}

fn region_len(region: &'static str, capacity: usize, per_call: usize) -> Result<usize, ConfigError> {
    capacity
        .checked_add(1)
        .and_then(|calls| calls.checked_mul(per_call))
        .filter(|len| *len <= u32::MAX as usize)
        .ok_or(ConfigError::RegionTooLarge {
            region,
            len: capacity.saturating_add(1).saturating_mul(per_call),
        })
}
