//! Bounded single producer / single consumer byte queue.
//!
//! Each side owns its own cursor and sequence counter, and only ever stores
//! to those, so no read-modify-write is shared between an interrupt handler
//! and the main loop. The pending count is derived from the two sequence
//! counters rather than kept as a shared counter.
//!
//! A queue used from a single context can be driven directly through
//! `&mut self`. A queue shared between an interrupt handler and the main
//! loop is [`ByteQueue::split`] into a [`Producer`] and a [`Consumer`].

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct ByteQueue<const N: usize> {
    buf: UnsafeCell<[u8; N]>,

    // Producer side
    insert: AtomicUsize,
    enqueued: AtomicUsize,

    // Consumer side
    remove: AtomicUsize,
    dequeued: AtomicUsize,
}

// Slots are only written by the producer while unpublished and only read by
// the consumer once published, see `enqueue` / `dequeue`.
unsafe impl<const N: usize> Sync for ByteQueue<N> {}

impl<const N: usize> Default for ByteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteQueue<N> {
    const CAPACITY: usize = {
        assert!(N > 0, "ByteQueue capacity must be > 0");
        assert!(N <= usize::MAX / 2, "ByteQueue capacity must leave room for sequence wrap");
        N
    };

    /// Create an empty queue
    pub const fn new() -> Self {
        let _ = Self::CAPACITY;

        Self {
            buf: UnsafeCell::new([0u8; N]),
            insert: AtomicUsize::new(0),
            enqueued: AtomicUsize::new(0),
            remove: AtomicUsize::new(0),
            dequeued: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of bytes pending removal
    pub fn len(&self) -> usize {
        // Consumer sequence first, so the snapshot can only over-count
        let dequeued = self.dequeued.load(Ordering::Acquire);
        let enqueued = self.enqueued.load(Ordering::Acquire);
        enqueued.wrapping_sub(dequeued).min(N)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Append a byte, returns false (and drops the byte) when the queue is full
    pub fn try_enqueue(&mut self, byte: u8) -> bool {
        // SAFETY: `&mut self` excludes any other producer or consumer
        unsafe { self.enqueue(byte) }
    }

    /// Remove the oldest byte, if any
    pub fn try_dequeue(&mut self) -> Option<u8> {
        // SAFETY: `&mut self` excludes any other producer or consumer
        unsafe { self.dequeue() }
    }

    /// Split the queue into its producer and consumer halves.
    ///
    /// Each half may be handed to a different execution context (for example
    /// the receive interrupt and the main loop). The borrow guarantees there is
    /// exactly one of each for as long as the halves live.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let queue: &Self = self;
        (Producer { queue }, Consumer { queue })
    }

    /// # Safety
    ///
    /// Must only be called from the single producer context.
    unsafe fn enqueue(&self, byte: u8) -> bool {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let dequeued = self.dequeued.load(Ordering::Acquire);
        if enqueued.wrapping_sub(dequeued) >= N {
            return false;
        }

        let idx = self.insert.load(Ordering::Relaxed);
        debug_assert!(idx < N);

        // The slot at `idx` is not visible to the consumer until the
        // sequence store below, so no reference to the whole array is formed
        (self.buf.get() as *mut u8).add(idx).write(byte);

        let mut next = idx + 1;
        if next > N - 1 {
            next = 0;
        }
        self.insert.store(next, Ordering::Relaxed);

        // Publish
        self.enqueued.store(enqueued.wrapping_add(1), Ordering::Release);

        true
    }

    /// # Safety
    ///
    /// Must only be called from the single consumer context.
    unsafe fn dequeue(&self) -> Option<u8> {
        let dequeued = self.dequeued.load(Ordering::Relaxed);
        let enqueued = self.enqueued.load(Ordering::Acquire);
        if enqueued == dequeued {
            return None;
        }

        let idx = self.remove.load(Ordering::Relaxed);
        debug_assert!(idx < N);

        let byte = (self.buf.get() as *const u8).add(idx).read();

        let mut next = idx + 1;
        if next > N - 1 {
            next = 0;
        }
        self.remove.store(next, Ordering::Relaxed);

        // Release the slot back to the producer
        self.dequeued.store(dequeued.wrapping_add(1), Ordering::Release);

        Some(byte)
    }
}

/// Insertion half of a split [`ByteQueue`]
pub struct Producer<'a, const N: usize> {
    queue: &'a ByteQueue<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    /// Append a byte, returns false (and drops the byte) when the queue is full
    #[inline]
    pub fn try_enqueue(&mut self, byte: u8) -> bool {
        // SAFETY: only one `Producer` exists per queue borrow
        unsafe { self.queue.enqueue(byte) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}

/// Removal half of a split [`ByteQueue`]
pub struct Consumer<'a, const N: usize> {
    queue: &'a ByteQueue<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    /// Remove the oldest byte, if any
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<u8> {
        // SAFETY: only one `Consumer` exists per queue borrow
        unsafe { self.queue.dequeue() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
