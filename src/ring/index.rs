//! Ring index arithmetic and the shared occupancy counter.
//!
//! Offsets live in `[0, capacity)` and belong to exactly one side: the
//! producer handle owns the write offset, the consumer handle owns the read
//! offset. The only state crossing threads is the atomic `written` byte
//! count, which the producer release-increments after a slot's bytes are in
//! place and the consumer release-decrements after copying bytes out. The
//! paired acquire loads on the opposite side make the bytes themselves
//! visible without any further synchronisation.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RingIndex {
    capacity: usize,
    written: AtomicUsize,
}

impl RingIndex {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            capacity,
            written: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advance an offset by `k` bytes, wrapping at capacity.
    #[inline]
    pub fn wrap_add(&self, offset: usize, k: usize) -> usize {
        debug_assert!(offset < self.capacity);
        debug_assert!(k <= self.capacity);
        let sum = offset + k;
        if sum >= self.capacity {
            sum - self.capacity
        } else {
            sum
        }
    }

    /// Bytes currently stored, acquire-ordered so the caller also sees the
    /// slot bytes that the publishing side wrote before moving the counter.
    #[inline]
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Acquire)
    }

    /// Free bytes available to the producer.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.capacity - self.written()
    }

    /// Producer publish: `written += k`. Release-ordered; everything the
    /// producer wrote into the ring beforehand is visible to a consumer
    /// that acquire-loads the counter afterwards.
    #[inline]
    pub fn commit(&self, k: usize) {
        debug_assert!(self.written() + k <= self.capacity);
        self.written.fetch_add(k, Ordering::Release);
    }

    /// Consumer retire: `written -= k`. Release-ordered; the producer's
    /// space check will not observe the freed bytes until the consumer has
    /// finished copying out of them.
    #[inline]
    pub fn consume(&self, k: usize) {
        debug_assert!(self.written() >= k);
        self.written.fetch_sub(k, Ordering::Release);
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Proves: wrap_add never leaves [0, capacity) for in-contract inputs.
    #[kani::proof]
    fn wrap_add_bounded() {
        let capacity: usize = kani::any();
        kani::assume(capacity > 0 && capacity < usize::MAX / 2);
        let offset: usize = kani::any();
        let k: usize = kani::any();
        kani::assume(offset < capacity);
        kani::assume(k <= capacity);

        let index = RingIndex::new(capacity);
        let result = index.wrap_add(offset, k);
        kani::assert(result < capacity, "wrapped offset must stay in range");
        kani::assert(result == (offset + k) % capacity, "must match modular add");
    }
}
