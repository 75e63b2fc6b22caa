//! Lifecycle orchestrator: rescan, attach, detach, register and unregister.
//!
//! Every entry point asserts the registry lock, takes the peer-group lock
//! for its whole duration and walks the feature table in a fixed order:
//!
//! | Operation | Order | On child creation failure |
//! |---|---|---|
//! | rescan (delete phase) | highest id first | n/a, deletion never fails |
//! | rescan (create phase) | lowest id first | log, remember, continue |
//! | attach | lowest id first | stop, return the error |
//! | detach | highest id first | n/a |
//!
//! Deleting a child clears its slot immediately.  The child's index goes
//! back to the allocator only when the last reference to it is dropped,
//! which the release callback installed by `create_child` observes.

use std::sync::Arc;

use facet_host::{ChildDevice, ChildDriver};
use facet_types::{FacetError, FeatureId, HcaCaps, LifecycleEvent, LifecycleEventKind};
use tracing::{debug, info, instrument, warn};

use crate::device::CoreDevice;
use crate::feature_table::{FEATURES, descriptor};
use crate::flags::DeviceFlags;
use crate::slots::ChildHandle;

impl CoreDevice {
    // ────────────────────────────────────────────────────────────────────
    // Public entry points
    // ────────────────────────────────────────────────────────────────────

    /// Reconcile the children with the current capabilities and parameters.
    ///
    /// No-op while the device is detaching.  Returns the last creation error
    /// if any personality failed to load; the others are still created.
    #[instrument(skip(self), fields(device = %self.name()))]
    pub fn rescan(&self) -> Result<(), FacetError> {
        self.registry.assert_held(self.name());
        let _peers = self.peers.lock();
        self.rescan_locked()
    }

    /// Bring the device up after a reset: create missing personalities and
    /// resume suspended ones, stopping at the first failure.
    #[instrument(skip(self), fields(device = %self.name()))]
    pub fn attach(&self) -> Result<(), FacetError> {
        self.registry.assert_held(self.name());
        let _peers = self.peers.lock();

        self.update_flags(|f| f.remove(DeviceFlags::DETACHING));
        let flags = self.flags();
        let lightweight = flags.contains(DeviceFlags::DISABLE_ALL);
        let caps = self.query_caps();
        let view = self.view(&caps, flags);

        for desc in FEATURES.iter() {
            let existing = self.slot(desc.id);
            let step = match existing {
                Some(handle) => self.resume_child(&handle),
                None => {
                    if lightweight || !desc.is_enabled(&view) || !desc.is_supported(&view) {
                        continue;
                    }
                    self.create_child(desc.id)
                        .map(|handle| self.fill_slot(desc.id, handle))
                }
            };

            if let Err(e) = step {
                warn!(
                    device = %self.name(),
                    error = %e,
                    "Device[{}] ({}) failed to load",
                    desc.id.index(),
                    desc.label
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Tear the device down.  With `suspend`, personalities whose bound
    /// driver can suspend are suspended and kept; everything else is
    /// deleted.  The device is left detaching, so rescans do nothing until
    /// the next [`attach`](CoreDevice::attach).
    #[instrument(skip(self), fields(device = %self.name()))]
    pub fn detach(&self, suspend: bool) {
        self.registry.assert_held(self.name());
        let _peers = self.peers.lock();

        let caps = self.query_caps();
        let view = self.view(&caps, self.flags());

        for desc in FEATURES.iter().rev() {
            let Some(handle) = self.slot(desc.id) else {
                continue;
            };

            // A disabled personality is always deleted, and so is one whose
            // driver was unbound by hand.
            let suspend_with = if suspend && desc.is_enabled(&view) {
                handle.driver().filter(|d| d.can_suspend())
            } else {
                None
            };

            match suspend_with {
                Some(driver) => self.suspend_child(&handle, driver.as_ref()),
                None => {
                    drop(handle);
                    if let Some(handle) = self.take_slot(desc.id) {
                        self.delete_child(handle);
                    }
                }
            }
        }
        self.update_flags(|f| f.insert(DeviceFlags::DETACHING));
    }

    /// Leave lightweight mode and create every applicable personality.  On
    /// failure the device is unregistered again before the error is
    /// returned.
    #[instrument(skip(self), fields(device = %self.name()))]
    pub fn register_device(&self) -> Result<(), FacetError> {
        self.registry.assert_held(self.name());
        let result = {
            let _peers = self.peers.lock();
            self.update_flags(|f| f.remove(DeviceFlags::DISABLE_ALL));
            self.rescan_locked()
        };

        if let Err(e) = &result {
            warn!(device = %self.name(), error = %e, "registration failed; unregistering");
            self.unregister_device();
        }
        result
    }

    /// Collapse the flags to lightweight mode and delete every child.
    #[instrument(skip(self), fields(device = %self.name()))]
    pub fn unregister_device(&self) {
        self.registry.assert_held(self.name());
        let _peers = self.peers.lock();
        self.store_flags(DeviceFlags::DISABLE_ALL);
        // Lightweight deletes everything without reading caps or params.
        self.delete_phase(&None);
    }

    // ────────────────────────────────────────────────────────────────────
    // Rescan phases
    // ────────────────────────────────────────────────────────────────────

    fn rescan_locked(&self) -> Result<(), FacetError> {
        if self.is_detaching() {
            debug!(device = %self.name(), "detaching; rescan skipped");
            return Ok(());
        }

        let caps = self.query_caps();
        self.delete_phase(&caps);
        if self.is_lightweight() {
            return Ok(());
        }
        self.create_phase(&caps)
    }

    fn delete_phase(&self, caps: &Option<HcaCaps>) {
        let flags = self.flags();
        let delete_all = flags.contains(DeviceFlags::DISABLE_ALL);
        let view = self.view(caps, flags);

        for desc in FEATURES.iter().rev() {
            if !self.is_slot_present(desc.id) {
                continue;
            }
            let keep = !delete_all && desc.is_enabled(&view) && desc.is_supported(&view);
            if keep {
                continue;
            }
            if let Some(handle) = self.take_slot(desc.id) {
                self.delete_child(handle);
            }
        }
    }

    fn create_phase(&self, caps: &Option<HcaCaps>) -> Result<(), FacetError> {
        let view = self.view(caps, self.flags());
        let mut result = Ok(());

        for desc in FEATURES.iter() {
            if self.is_slot_present(desc.id) {
                continue;
            }
            if !desc.is_enabled(&view) {
                debug!(device = %self.name(), feature = desc.label, "disabled by parameter");
                continue;
            }
            if !desc.is_supported(&view) {
                continue;
            }

            match self.create_child(desc.id) {
                Ok(handle) => self.fill_slot(desc.id, handle),
                Err(e) => {
                    warn!(
                        device = %self.name(),
                        error = %e,
                        "Device[{}] ({}) failed to load",
                        desc.id.index(),
                        desc.label
                    );
                    // Keep going; the caller decides whether to unwind.
                    result = Err(e);
                }
            }
        }
        result
    }

    // ────────────────────────────────────────────────────────────────────
    // Child primitives
    // ────────────────────────────────────────────────────────────────────

    /// Allocate an index, build the child and register it on the bus.  On
    /// failure the index is already back in the allocator.
    fn create_child(&self, feature: FeatureId) -> Result<ChildHandle, FacetError> {
        let label = descriptor(feature).label;
        let ida = self.host.ida().clone();
        let index = ida.alloc()?;
        let name = format!("{}.{}.{}", self.host.bus().prefix(), label, index);

        let events = self.host.events().clone();
        let device = self.name().to_string();
        let child = ChildDevice::new(
            self.name(),
            feature,
            index,
            name,
            Box::new(move |c: &ChildDevice| {
                ida.free(c.index());
                debug!(child = c.name(), "child released");
                events.publish(LifecycleEvent::new(
                    device,
                    c.feature(),
                    c.name(),
                    LifecycleEventKind::Released,
                ));
            }),
        );

        // On error the bus kept no reference; dropping `child` here runs the
        // release callback and returns the index.
        self.host.bus().add(child.clone())?;

        info!(device = %self.name(), child = child.name(), "personality created");
        self.publish(&child, LifecycleEventKind::Created);
        Ok(ChildHandle::new(child))
    }

    /// Request removal.  The slot has already been cleared by the caller.
    fn delete_child(&self, handle: ChildHandle) {
        let child = handle.into_child();
        self.host.bus().delete(&child);
        info!(device = %self.name(), child = child.name(), "personality deleted");
        self.publish(&child, LifecycleEventKind::DeleteRequested);
    }

    fn suspend_child(&self, handle: &ChildHandle, driver: &dyn ChildDriver) {
        driver.suspend(handle.child());
        info!(device = %self.name(), child = handle.name(), "personality suspended");
        self.publish(handle.child(), LifecycleEventKind::Suspended);
    }

    fn resume_child(&self, handle: &ChildHandle) -> Result<(), FacetError> {
        let Some(driver) = handle.driver() else {
            return Ok(());
        };
        if !driver.can_resume() {
            return Ok(());
        }
        driver.resume(handle.child())?;
        info!(device = %self.name(), child = handle.name(), "personality resumed");
        self.publish(handle.child(), LifecycleEventKind::Resumed);
        Ok(())
    }

    fn publish(&self, child: &Arc<ChildDevice>, kind: LifecycleEventKind) {
        self.host.events().publish(LifecycleEvent::new(
            self.name(),
            child.feature(),
            child.name(),
            kind,
        ));
    }
}
