//! Side table tracking concealment slots by sequence number.
//!
//! Each entry records where a synthesised slot's header lives in the ring so
//! a late-arriving real packet can overwrite the placeholder payload in
//! place. The entry's `in_use` flag is the exclusive baton serialising that
//! update against the consumer reading the same slot; `stale` marks entries
//! whose slot has been fully dequeued, reclaimed lazily at the next producer
//! touch.
//!
//! Map structure (insert/remove) is producer-dominant and guarded by a
//! mutex whose critical sections are a handful of hash operations; the
//! consumer only reads entries and flips their atomics under the baton.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Map row for one concealment slot.
#[derive(Debug)]
pub struct ConcealmentEntry {
    /// Ring byte offset of the slot's header. Moves forward when the
    /// consumer partially reads the slot and rewrites the header.
    offset: AtomicUsize,
    /// Slot fully dequeued; row awaits removal.
    stale: AtomicBool,
    /// Exclusive baton. Test-and-set by whichever side needs the payload.
    in_use: AtomicBool,
}

impl ConcealmentEntry {
    fn new(offset: usize) -> Self {
        Self {
            offset: AtomicUsize::new(offset),
            stale: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
        }
    }

    /// Try to take the baton. Acquire-ordered on success so payload writes
    /// released by the previous holder are visible.
    pub fn acquire(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Drop the baton, releasing any slot mutations made while holding it.
    pub fn release(&self) {
        self.in_use.store(false, Ordering::Release);
    }

    pub fn offset(&self) -> usize {
        self.offset.load(Ordering::Acquire)
    }

    /// Record the header's new position. Caller holds the baton.
    pub fn set_offset(&self, offset: usize) {
        self.offset.store(offset, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Mark the slot fully consumed. Caller holds the baton.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }
}

/// Sequence number to entry map.
#[derive(Default)]
pub struct ConcealmentMap {
    entries: Mutex<HashMap<u64, Arc<ConcealmentEntry>>>,
}

impl ConcealmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row for a freshly written concealment slot. The producer
    /// never synthesises the same sequence number twice, so an existing row
    /// indicates a logic error.
    pub fn insert(&self, sequence_number: u64, offset: usize) {
        let mut entries = self.entries.lock().unwrap();
        let previous = entries.insert(sequence_number, Arc::new(ConcealmentEntry::new(offset)));
        debug_assert!(previous.is_none(), "double concealment insert");
    }

    pub fn find(&self, sequence_number: u64) -> Option<Arc<ConcealmentEntry>> {
        self.entries.lock().unwrap().get(&sequence_number).cloned()
    }

    pub fn remove(&self, sequence_number: u64) {
        self.entries.lock().unwrap().remove(&sequence_number);
    }

    /// Drop every row whose slot has been fully dequeued. Called from the
    /// producer so stale rows cannot accumulate across long sessions.
    pub fn sweep_stale(&self) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| !entry.is_stale());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
