//! Scoped filesystem-credential elevation.
//!
//! `setfsuid(2)` changes the credential used for permission checks of the
//! calling thread only. [`FsuidElevation`] raises it to 0 for the lifetime
//! of a guard and restores the previous value on drop. The guard is
//! `!Send`, so it is released on the thread that took it, and at most one
//! elevation can be active per thread.

use std::cell::Cell;
use std::marker::PhantomData;

use nix::unistd::{Uid, setfsuid};
use warden_common::error::{Result, WardenError};

thread_local! {
    static ELEVATED: Cell<bool> = const { Cell::new(false) };
}

/// Guard holding the calling thread's fsuid at 0.
#[derive(Debug)]
pub struct FsuidElevation {
    previous: Uid,
    _thread_bound: PhantomData<*const ()>,
}

impl FsuidElevation {
    /// Raises the calling thread's fsuid to root.
    ///
    /// The kernel never reports failure from `setfsuid`; if the change did
    /// not take, a warning is logged and the guard is still returned, so
    /// the privileged operations that follow fail with their own errno.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::ElevationActive`] if this thread already
    /// holds an elevation.
    pub fn acquire() -> Result<Self> {
        if ELEVATED.with(Cell::get) {
            return Err(WardenError::ElevationActive);
        }
        let previous = setfsuid(Uid::from_raw(0));
        // -1 is never a valid fsuid, so this only reads back the current one.
        let current = setfsuid(Uid::from_raw(u32::MAX));
        if !current.is_root() {
            tracing::warn!(
                previous = previous.as_raw(),
                current = current.as_raw(),
                "kernel refused fsuid elevation"
            );
        }
        ELEVATED.with(|flag| flag.set(true));
        tracing::debug!(previous = previous.as_raw(), "fsuid elevated");
        Ok(Self {
            previous,
            _thread_bound: PhantomData,
        })
    }

    /// Returns the fsuid that will be restored on drop.
    #[must_use]
    pub const fn previous(&self) -> Uid {
        self.previous
    }

    /// Returns whether the calling thread currently holds an elevation.
    #[must_use]
    pub fn is_active() -> bool {
        ELEVATED.with(Cell::get)
    }
}

impl Drop for FsuidElevation {
    fn drop(&mut self) {
        let _ = setfsuid(self.previous);
        ELEVATED.with(|flag| flag.set(false));
        tracing::debug!(restored = self.previous.as_raw(), "fsuid restored");
    }
}
