// Slot storage and the adaptive single-producer/single-consumer queue built on it

use super::layout::{ConsumerCursors, ProducerCursors};
use crate::BQueue::Structs::Buffer_Structs::BatchConfig;
use crate::error::ConfigError;

use crossbeam_utils::CachePadded;
use std::marker::PhantomData;
use std::num::{NonZeroU32, NonZeroU64, NonZeroUsize};
use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize};

/// An element type that can live in a ring slot.
///
/// The slot cell itself is the synchronisation point: a cell is either in its
/// designated *empty* (sentinel) state or holds exactly one produced,
/// not-yet-consumed element. No shared counter is consulted by the other side.
///
/// # Safety
/// Implementors must guarantee that:
/// - `store` publishes the value with release semantics and leaves the cell
///   non-empty;
/// - `is_occupied` observes the cell with acquire semantics, so a `true`
///   result makes every write that preceded the matching `store` visible;
/// - `clear` returns the cell to its sentinel state with release semantics.
pub unsafe trait SlotElement: Sized {
    /// Atomic storage for one slot.
    type Cell;

    /// A cell in its sentinel state.
    fn empty_cell() -> Self::Cell;

    fn is_occupied(cell: &Self::Cell) -> bool;

    /// # Safety
    /// The caller is the only producer and the cell is empty.
    unsafe fn store(cell: &Self::Cell, value: Self);

    /// Bitwise read of the value, leaving the cell occupied.
    ///
    /// # Safety
    /// The caller is the only consumer, the cell is occupied, and for owning
    /// element types the value is read at most once before `clear`.
    unsafe fn read(cell: &Self::Cell) -> Self;

    /// # Safety
    /// The caller is the only consumer and the cell is occupied.
    unsafe fn clear(cell: &Self::Cell);
}

// Zero is the sentinel; the niche keeps it out of the value domain.
macro_rules! nonzero_slot {
    ($nz:ty, $atomic:ty) => {
        unsafe impl SlotElement for $nz {
            type Cell = $atomic;

            #[inline]
            fn empty_cell() -> $atomic {
                <$atomic>::new(0)
            }

            #[inline]
            fn is_occupied(cell: &$atomic) -> bool {
                cell.load(Acquire) != 0
            }

            #[inline]
            unsafe fn store(cell: &$atomic, value: Self) {
                cell.store(value.get(), Release);
            }

            #[inline]
            unsafe fn read(cell: &$atomic) -> Self {
                // SAFETY: caller guarantees the cell is occupied, i.e. non-zero.
                <$nz>::new_unchecked(cell.load(Acquire))
            }

            #[inline]
            unsafe fn clear(cell: &$atomic) {
                cell.store(0, Release);
            }
        }
    };
}

nonzero_slot!(NonZeroU32, AtomicU32);
nonzero_slot!(NonZeroU64, AtomicU64);
nonzero_slot!(NonZeroUsize, AtomicUsize);

// Owned payloads: the null pointer is the sentinel.
unsafe impl<T> SlotElement for Box<T> {
    type Cell = AtomicPtr<T>;

    #[inline]
    fn empty_cell() -> AtomicPtr<T> {
        AtomicPtr::new(ptr::null_mut())
    }

    #[inline]
    fn is_occupied(cell: &AtomicPtr<T>) -> bool {
        !cell.load(Acquire).is_null()
    }

    #[inline]
    unsafe fn store(cell: &AtomicPtr<T>, value: Self) {
        cell.store(Box::into_raw(value), Release);
    }

    #[inline]
    unsafe fn read(cell: &AtomicPtr<T>) -> Self {
        // SAFETY: the pointer came from `Box::into_raw` in `store` and the
        // caller reads it once before clearing the cell.
        Box::from_raw(cell.load(Acquire))
    }

    #[inline]
    unsafe fn clear(cell: &AtomicPtr<T>) {
        cell.store(ptr::null_mut(), Release);
    }
}

/// Fixed-capacity circular array of slots addressed by `seq & mask`.
///
/// Allocated once and never resized.
pub struct RingBuffer<T: SlotElement> {
    /// One cell per slot; the cell's sentinel state marks it empty.
    pub(crate) slots: Box<[T::Cell]>,

    /// The capacity of the buffer (number of slots), a power of two.
    pub(crate) capacity: usize,

    /// A bitmask used to wrap sequence numbers around the buffer.
    /// Calculated as `capacity - 1`.
    pub(crate) mask: usize,
}

impl<T: SlotElement> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity < 2 {
            return Err(ConfigError::CapacityTooSmall { capacity, min: 2 });
        }
        if !capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo { capacity });
        }
        let slots = (0..capacity).map(|_| T::empty_cell()).collect();
        Ok(Self {
            slots,
            capacity,
            mask: capacity - 1,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn mask(&self) -> usize {
        self.mask
    }

    /// The cell that sequence `seq` maps to.
    #[inline]
    pub fn slot(&self, seq: u64) -> &T::Cell {
        &self.slots[(seq as usize) & self.mask]
    }

    #[inline]
    pub fn is_occupied(&self, seq: u64) -> bool {
        T::is_occupied(self.slot(seq))
    }
}

/// B-Queue: a ring buffer with independent producer and consumer cursors.
///
/// ### Concurrency Design:
/// - **Producer**: owns `head`/`batch_head`. It only re-checks for room when
///   `head` reaches `batch_head`, by probing a single slot far ahead.
/// - **Consumer**: owns `tail`/`batch_tail` and the batch history. When
///   `tail` reaches `batch_tail` it backtracks: one probe at
///   `tail + history`, halving the distance until an occupied slot is found.
/// - No field is written by both sides; slot occupancy is the only signal.
///
/// The raw queue is shared behind an `Arc` by a [`crate::BQueue::Producer`]
/// and a [`crate::BQueue::Consumer`]; the side-specific operations are
/// `unsafe` and only reachable through those handles.
pub struct AdaptiveQueue<T: SlotElement> {
    pub(crate) buffer: RingBuffer<T>,

    /// Producer-owned cursors, isolated on their own cache line.
    pub(crate) producer: CachePadded<ProducerCursors>,

    /// Consumer-owned cursors, isolated on their own cache line.
    pub(crate) consumer: CachePadded<ConsumerCursors>,

    pub(crate) batch: BatchConfig,

    _marker: PhantomData<*const T>,
}

// SAFETY: elements move from the producer thread to the consumer thread, so
// `T: Send` suffices; the cursor groups are atomics written by one side only.
unsafe impl<T: SlotElement + Send> Send for AdaptiveQueue<T> {}
unsafe impl<T: SlotElement + Send> Sync for AdaptiveQueue<T> {}

impl<T: SlotElement> AdaptiveQueue<T> {
    pub fn new(capacity: usize, batch: BatchConfig) -> Result<Self, ConfigError> {
        let buffer = RingBuffer::new(capacity)?;
        batch.validate(capacity)?;
        Ok(Self {
            buffer,
            producer: CachePadded::new(ProducerCursors::default()),
            consumer: CachePadded::new(ConsumerCursors::new(batch.consumer_batch)),
            batch,
            _marker: PhantomData,
        })
    }
}
