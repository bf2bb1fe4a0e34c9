use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::{Mutex, MutexGuard};

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Stable small integer identifying the calling thread.
pub fn thread_id() -> usize {
    THREAD_ID.with(|id| *id)
}

/// Fixed size table of mutex guarded resources, indexed by lock number.
///
/// Built once at proxy startup and dropped when the server stops.
pub struct LockTable<T> {
    locks: Box<[Mutex<T>]>,
}

impl<T> LockTable<T> {
    /// Creates a table of `count` locks (at least one), initializing each slot with `init`.
    pub fn new(count: usize, mut init: impl FnMut(usize) -> T) -> Self {
        let locks = (0..count.max(1))
            .map(|idx| Mutex::new(init(idx)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        LockTable { locks }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Locks slot `index`, wrapping around the table size.
    pub fn lock(&self, index: usize) -> MutexGuard<'_, T> {
        self.locks[index % self.locks.len()].lock()
    }

    /// Locks the slot assigned to the calling thread.
    pub fn for_current_thread(&self) -> MutexGuard<'_, T> {
        self.lock(thread_id())
    }
}

impl<T> fmt::Debug for LockTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("len", &self.locks.len())
            .finish()
    }
}
