//! [`RegistryLock`] – the device-registry lock that callers of the lifecycle
//! entry points must already hold.
//!
//! The orchestrator never takes this lock; it only checks that the calling
//! thread owns it.

use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use tracing::error;

/// Registry-level lock with owner tracking.
#[derive(Default)]
pub struct RegistryLock {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

/// Proof that the registry lock is held.  Unlocks on drop.
pub struct RegistryGuard<'a> {
    registry: &'a RegistryLock,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        *self.registry.owner.lock() = None;
    }
}

impl RegistryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> RegistryGuard<'_> {
        let guard = self.lock.lock();
        *self.owner.lock() = Some(thread::current().id());
        RegistryGuard {
            registry: self,
            _guard: guard,
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Check that the calling thread holds the lock.  Logs an error in
    /// release builds and panics in debug builds when it does not.
    pub fn assert_held(&self, device: &str) {
        if !self.is_held_by_current_thread() {
            error!(device, "lifecycle operation without the registry lock held");
            debug_assert!(false, "registry lock not held for {device}");
        }
    }
}
