//! The FS-wide mutual exclusion primitive.
//!
//! Every public [`crate::fs::FileSystem`] operation runs under a single coarse lock,
//! separate from whatever locking the [`crate::flash::FlashDriver`] does internally to
//! arbitrate the flash bus. [`FsLock`] lets a host plug in whatever primitive its RTOS (or
//! lack of one) provides; [`SpinFsLock`] is a busy-wait default for hosts without one and
//! for tests.

use core::sync::atomic::{AtomicBool, Ordering};

/// A mutual-exclusion primitive serializing `flogfs` operations.
///
/// Implementations should provide FIFO-fair blocking where the host platform can offer it,
/// so that no caller is starved under contention; [`SpinFsLock`] does not make this
/// guarantee and should not be used where fairness matters.
pub trait FsLock {
    /// Blocks until the lock is held by the caller.
    fn lock(&mut self);

    /// Releases the lock.
    fn unlock(&mut self);
}

/// A busy-wait [`FsLock`] for hosts without a richer primitive, and for the test harness.
///
/// This is not FIFO-fair: under contention, which waiter acquires the lock next is
/// unspecified. A production target with more than one caller should supply its own
/// [`FsLock`] backed by its RTOS's queued mutex instead.
pub struct SpinFsLock {
    locked: AtomicBool,
}

impl SpinFsLock {
    /// Creates a new, unlocked `SpinFsLock`.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for SpinFsLock {
    fn default() -> Self {
        Self::new()
    }
}

impl FsLock for SpinFsLock {
    fn lock(&mut self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    fn unlock(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}
