//! [`ChildDevice`] – one live personality instance on the host bus – and the
//! [`ChildDriver`] trait implemented by external drivers that bind to it.
//!
//! # Release model
//!
//! A child is shared through [`Arc`].  Deleting it from the bus only drops
//! the bus's reference; whoever else still holds a clone (a bound driver, a
//! diagnostic tool) keeps it alive.  The release callback supplied at
//! construction runs from [`Drop`], i.e. exactly when the last reference goes
//! away.  Callers must treat "delete requested" and "released" as two
//! separate moments.

use std::fmt;
use std::sync::Arc;

use facet_types::{FacetError, FeatureId};
use parking_lot::{Mutex, MutexGuard, RwLock};

/// Callback run once when the last reference to a child is dropped.
pub type ReleaseFn = Box<dyn FnOnce(&ChildDevice) + Send>;

/// A driver that binds to children of one personality.
///
/// Only [`name`](ChildDriver::name), [`probe`](ChildDriver::probe) and
/// [`remove`](ChildDriver::remove) are mandatory.  Suspend and resume are
/// optional hooks; a driver advertises them through
/// [`can_suspend`](ChildDriver::can_suspend) and
/// [`can_resume`](ChildDriver::can_resume).
pub trait ChildDriver: Send + Sync {
    /// Driver name, e.g. `"facet_eth"`.
    fn name(&self) -> &str;

    /// Called when the bus matches this driver to a new child.
    ///
    /// # Errors
    ///
    /// A failed probe leaves the child registered but unbound.
    fn probe(&self, child: &ChildDevice) -> Result<(), FacetError>;

    /// Called when the child is deleted or manually unbound.
    fn remove(&self, child: &ChildDevice);

    fn can_suspend(&self) -> bool {
        false
    }

    /// Quiesce the personality without destroying the child.
    fn suspend(&self, _child: &ChildDevice) {}

    fn can_resume(&self) -> bool {
        false
    }

    /// Bring a suspended personality back.
    ///
    /// # Errors
    ///
    /// Returns [`FacetError::ResumeFailed`] when the personality cannot be
    /// restored.
    fn resume(&self, _child: &ChildDevice) -> Result<(), FacetError> {
        Ok(())
    }
}

/// A child object representing one active personality of a parent device.
pub struct ChildDevice {
    name: String,
    parent: String,
    feature: FeatureId,
    index: u32,
    driver: RwLock<Option<Arc<dyn ChildDriver>>>,
    /// Serialises probe, remove and bus removal for this child.
    bind_lock: Mutex<()>,
    release: Mutex<Option<ReleaseFn>>,
}

impl ChildDevice {
    /// Build a child.  `release` runs when the last [`Arc`] is dropped.
    pub fn new(
        parent: impl Into<String>,
        feature: FeatureId,
        index: u32,
        name: impl Into<String>,
        release: ReleaseFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: parent.into(),
            feature,
            index,
            driver: RwLock::new(None),
            bind_lock: Mutex::new(()),
            release: Mutex::new(Some(release)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning device.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn feature(&self) -> FeatureId {
        self.feature
    }

    /// Index taken from the allocator for this child's name.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Currently bound driver, if any.
    pub fn driver(&self) -> Option<Arc<dyn ChildDriver>> {
        self.driver.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.driver.read().is_some()
    }

    /// Taken before the bus map lock, never after it.
    pub(crate) fn lock_binding(&self) -> MutexGuard<'_, ()> {
        self.bind_lock.lock()
    }

    pub(crate) fn bind(&self, driver: Arc<dyn ChildDriver>) {
        *self.driver.write() = Some(driver);
    }

    pub(crate) fn unbind(&self) -> Option<Arc<dyn ChildDriver>> {
        self.driver.write().take()
    }
}

impl fmt::Debug for ChildDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildDevice")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("feature", &self.feature)
            .field("index", &self.index)
            .field("driver", &self.driver.read().as_ref().map(|d| d.name().to_string()))
            .finish()
    }
}

impl Drop for ChildDevice {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            release(&*self);
        }
    }
}
