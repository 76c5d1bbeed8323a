//! Lock-free single-producer single-consumer ring buffer.
//!
//! Carries work between the main context and the step interrupt without
//! taking a lock in either direction. One side may only push, the other may
//! only pop; both operations are wait-free.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Bounded SPSC queue of `S` elements, `S` a power of two.
///
/// `head` and `tail` advance monotonically modulo `2*S`, which keeps a full
/// queue (`head - tail == S`) distinct from an empty one (`head == tail`)
/// so all `S` slots are usable. Slot access masks with `S - 1`.
///
/// The producer publishes the element with a release store on `head`; the
/// consumer's acquire load pairs with it, so a reader never observes an
/// unwritten slot. Symmetrically, the consumer releases `tail` only after
/// the element has been copied out.
pub struct Ring<T: Copy, const S: usize> {
    slots: UnsafeCell<[MaybeUninit<T>; S]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: the SPSC discipline (one pushing context, one popping context)
// makes concurrent slot access disjoint; the index handoff is atomic.
unsafe impl<T: Copy + Send, const S: usize> Sync for Ring<T, S> {}

impl<T: Copy, const S: usize> Ring<T, S> {
    const MASK: usize = S - 1;
    const WRAP: usize = 2 * S - 1;

    pub const fn new() -> Self {
        assert!(S.is_power_of_two());
        Ring {
            slots: UnsafeCell::new([const { MaybeUninit::uninit() }; S]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & Self::WRAP
    }

    pub fn is_empty(&self) -> bool {
        !self.readable()
    }

    /// True if at least one element can be popped.
    pub fn readable(&self) -> bool {
        self.head.load(Ordering::Acquire) != self.tail.load(Ordering::Acquire)
    }

    /// True if at least one element can be pushed.
    pub fn writable(&self) -> bool {
        self.len() < S
    }

    /// Producer side. Returns `false` (element dropped) when full.
    pub fn push(&self, value: T) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) & Self::WRAP == S {
            return false;
        }
        unsafe {
            let base = self.slots.get() as *mut MaybeUninit<T>;
            base.add(head & Self::MASK).write(MaybeUninit::new(value));
        }
        // Publish the element before moving head.
        self.head.store(head.wrapping_add(1) & Self::WRAP, Ordering::Release);
        true
    }

    /// Consumer side: copy of the oldest element, without removing it.
    pub fn peek(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        if self.head.load(Ordering::Acquire) == tail {
            return None;
        }
        let value = unsafe {
            let base = self.slots.get() as *const MaybeUninit<T>;
            (*base.add(tail & Self::MASK)).assume_init()
        };
        Some(value)
    }

    /// Consumer side: remove and return the oldest element.
    pub fn pop(&self) -> Option<T> {
        let value = self.peek()?;
        let tail = self.tail.load(Ordering::Relaxed);
        // The element is out; only now hand the slot back.
        self.tail.store(tail.wrapping_add(1) & Self::WRAP, Ordering::Release);
        Some(value)
    }
}

impl<T: Copy, const S: usize> Default for Ring<T, S> {
    fn default() -> Self {
        Self::new()
    }
}
