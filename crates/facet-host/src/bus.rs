//! [`ChildBus`] – the host's child-object model – and [`AuxBus`], its
//! in-memory implementation.
//!
//! The bus keeps one reference to every registered [`ChildDevice`] and
//! matches children to drivers by personality.  Registering a child probes a
//! matching driver; deleting it removes the driver and drops the bus's
//! reference.  The child's release callback runs whenever the *last*
//! reference goes away, which may be later than the delete.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use facet_types::{FacetError, FeatureId};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::child::{ChildDevice, ChildDriver};

/// Host object model consumed by the lifecycle orchestrator.
pub trait ChildBus: Send + Sync {
    /// Prefix used to build child names (`"<prefix>.<label>.<index>"`).
    fn prefix(&self) -> &str;

    /// Register `child` so drivers can discover and bind to it.
    ///
    /// # Errors
    ///
    /// Returns [`FacetError::ChildCreationFailed`] when the bus rejects the
    /// child.  The bus keeps no reference in that case.
    fn add(&self, child: Arc<ChildDevice>) -> Result<(), FacetError>;

    /// Unbind any driver and drop the bus's reference to `child`.
    fn delete(&self, child: &ChildDevice);
}

#[derive(Default)]
struct AuxBusInner {
    children: BTreeMap<String, Arc<ChildDevice>>,
    drivers: HashMap<FeatureId, Arc<dyn ChildDriver>>,
    failing: HashSet<FeatureId>,
}

/// In-memory [`ChildBus`] with driver matching and fault injection.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use facet_host::{AuxBus, ChildBus, ChildDevice, SimDriver};
/// use facet_types::FeatureId;
///
/// let bus = AuxBus::new("facet_core");
/// let drv = SimDriver::new("facet_eth").build();
/// bus.register_driver(FeatureId::Eth, drv.clone());
///
/// let child = ChildDevice::new("pf0", FeatureId::Eth, 0, "facet_core.eth.0", Box::new(|_| {}));
/// bus.add(child.clone()).unwrap();
/// assert!(child.is_bound());
/// assert_eq!(drv.probes(), 1);
/// ```
pub struct AuxBus {
    prefix: String,
    inner: Mutex<AuxBusInner>,
}

impl AuxBus {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            inner: Mutex::new(AuxBusInner::default()),
        }
    }

    /// Register `driver` for every child of `feature`.  Replaces any previous
    /// driver for that personality and probes already registered, unbound
    /// children.
    pub fn register_driver(&self, feature: FeatureId, driver: Arc<dyn ChildDriver>) {
        let unbound: Vec<Arc<ChildDevice>> = {
            let mut inner = self.inner.lock();
            inner.drivers.insert(feature, driver.clone());
            inner
                .children
                .values()
                .filter(|c| c.feature() == feature && !c.is_bound())
                .cloned()
                .collect()
        };
        for child in unbound {
            self.try_bind(&child, driver.clone());
        }
    }

    /// Make every subsequent [`ChildBus::add`] of `feature` fail.
    pub fn fail_add(&self, feature: FeatureId, fail: bool) {
        let mut inner = self.inner.lock();
        if fail {
            inner.failing.insert(feature);
        } else {
            inner.failing.remove(&feature);
        }
    }

    /// Detach the driver from child `name` without deleting the child, the
    /// way an administrator unbinds a driver by hand.  Returns `false` when
    /// no such child is bound.
    pub fn unbind(&self, name: &str) -> bool {
        let Some(child) = self.get(name) else {
            return false;
        };
        let _binding = child.lock_binding();
        match child.unbind() {
            Some(driver) => {
                driver.remove(&child);
                debug!(child = name, driver = driver.name(), "driver unbound");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ChildDevice>> {
        self.inner.lock().children.get(name).cloned()
    }

    /// Names of every registered child, sorted.
    pub fn children(&self) -> Vec<String> {
        self.inner.lock().children.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_registered(&self, child: &ChildDevice) -> bool {
        self.inner
            .lock()
            .children
            .get(child.name())
            .is_some_and(|c| std::ptr::eq(c.as_ref(), child))
    }

    /// Probe `driver` against `child` under the child's bind lock.  A child
    /// deleted or bound by someone else in the meantime is left alone.
    fn try_bind(&self, child: &ChildDevice, driver: Arc<dyn ChildDriver>) {
        let _binding = child.lock_binding();
        if child.is_bound() || !self.is_registered(child) {
            return;
        }
        match driver.probe(child) {
            Ok(()) => {
                debug!(child = child.name(), driver = driver.name(), "driver bound");
                child.bind(driver);
            }
            Err(e) => {
                warn!(child = child.name(), driver = driver.name(), error = %e, "probe failed; child left unbound");
            }
        }
    }
}

impl ChildBus for AuxBus {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn add(&self, child: Arc<ChildDevice>) -> Result<(), FacetError> {
        let driver = {
            let mut inner = self.inner.lock();
            if inner.failing.contains(&child.feature()) {
                return Err(FacetError::ChildCreationFailed {
                    child: child.name().to_string(),
                    details: "bus rejected registration".to_string(),
                });
            }
            if inner.children.contains_key(child.name()) {
                return Err(FacetError::ChildCreationFailed {
                    child: child.name().to_string(),
                    details: "name already registered".to_string(),
                });
            }
            inner
                .children
                .insert(child.name().to_string(), child.clone());
            inner.drivers.get(&child.feature()).cloned()
        };

        if let Some(driver) = driver {
            self.try_bind(&child, driver);
        }
        Ok(())
    }

    fn delete(&self, child: &ChildDevice) {
        let binding = child.lock_binding();
        let removed = if self.is_registered(child) {
            self.inner.lock().children.remove(child.name())
        } else {
            None
        };
        if let Some(driver) = child.unbind() {
            driver.remove(child);
        }
        drop(binding);
        // The bus reference must be dropped outside both locks: it may be
        // the last one and run the release callback.
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_driver::SimDriver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn child(feature: FeatureId, index: u32) -> Arc<ChildDevice> {
        let name = format!("facet_core.{}.{index}", feature.label());
        ChildDevice::new("pf0", feature, index, name, Box::new(|_| {}))
    }

    #[test]
    fn add_without_driver_leaves_child_unbound() {
        let bus = AuxBus::new("facet_core");
        let c = child(FeatureId::Rdma, 0);
        bus.add(c.clone()).unwrap();
        assert!(!c.is_bound());
        assert_eq!(bus.children(), vec!["facet_core.rdma.0".to_string()]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let bus = AuxBus::new("facet_core");
        bus.add(child(FeatureId::Eth, 0)).unwrap();
        let result = bus.add(child(FeatureId::Eth, 0));
        assert!(matches!(result, Err(FacetError::ChildCreationFailed { .. })));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn injected_failure_keeps_no_reference() {
        let bus = AuxBus::new("facet_core");
        bus.fail_add(FeatureId::Vnet, true);
        let c = child(FeatureId::Vnet, 1);
        assert!(bus.add(c.clone()).is_err());
        assert!(bus.is_empty());
        assert_eq!(Arc::strong_count(&c), 1);

        bus.fail_add(FeatureId::Vnet, false);
        assert!(bus.add(c).is_ok());
    }

    #[test]
    fn delete_removes_driver_and_releases_when_last() {
        let bus = AuxBus::new("facet_core");
        let drv = SimDriver::new("facet_eth").build();
        bus.register_driver(FeatureId::Eth, drv.clone());

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let c = ChildDevice::new(
            "pf0",
            FeatureId::Eth,
            0,
            "facet_core.eth.0",
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
        );
        bus.add(c.clone()).unwrap();
        assert!(c.is_bound());

        bus.delete(&c);
        assert_eq!(drv.removes(), 1);
        assert!(!c.is_bound());
        assert!(bus.is_empty());
        assert!(!released.load(Ordering::SeqCst));

        drop(c);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn late_driver_registration_binds_existing_children() {
        let bus = AuxBus::new("facet_core");
        let c = child(FeatureId::Dpll, 0);
        bus.add(c.clone()).unwrap();
        assert!(!c.is_bound());

        let drv = SimDriver::new("facet_dpll").build();
        bus.register_driver(FeatureId::Dpll, drv.clone());
        assert!(c.is_bound());
        assert_eq!(drv.probes(), 1);
    }

    #[test]
    fn failed_probe_still_registers_child() {
        let bus = AuxBus::new("facet_core");
        let drv = SimDriver::new("facet_eth").build();
        drv.fail_probe(true);
        bus.register_driver(FeatureId::Eth, drv);
        let c = child(FeatureId::Eth, 0);
        assert!(bus.add(c.clone()).is_ok());
        assert!(!c.is_bound());
    }

    #[test]
    fn manual_unbind_keeps_child() {
        let bus = AuxBus::new("facet_core");
        let drv = SimDriver::new("facet_eth").build();
        bus.register_driver(FeatureId::Eth, drv.clone());
        let c = child(FeatureId::Eth, 0);
        bus.add(c.clone()).unwrap();

        assert!(bus.unbind("facet_core.eth.0"));
        assert!(!c.is_bound());
        assert_eq!(bus.len(), 1);
        assert_eq!(drv.removes(), 1);
        assert!(!bus.unbind("facet_core.eth.0"));
        assert!(!bus.unbind("missing"));
    }

    /// Blocks inside `probe` until the test opens the gate.
    struct GatedDriver {
        entered: mpsc::Sender<()>,
        gate: Mutex<mpsc::Receiver<()>>,
        probes: AtomicUsize,
        removes: AtomicUsize,
    }

    impl ChildDriver for GatedDriver {
        fn name(&self) -> &str {
            "facet_gated"
        }

        fn probe(&self, _child: &ChildDevice) -> Result<(), FacetError> {
            let _ = self.entered.send(());
            let _ = self.gate.lock().recv();
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn remove(&self, _child: &ChildDevice) {
            self.removes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn delete_waits_for_in_flight_bind() {
        let bus = Arc::new(AuxBus::new("facet_core"));
        let c = child(FeatureId::Eth, 0);
        bus.add(c.clone()).unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let drv = Arc::new(GatedDriver {
            entered: entered_tx,
            gate: Mutex::new(gate_rx),
            probes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        });

        let binder = {
            let bus = bus.clone();
            let drv = drv.clone();
            thread::spawn(move || bus.register_driver(FeatureId::Eth, drv))
        };
        entered_rx.recv().unwrap();

        let deleter = {
            let bus = bus.clone();
            let c = c.clone();
            thread::spawn(move || bus.delete(&c))
        };
        // Give the delete a chance to run ahead of the bind.
        thread::sleep(Duration::from_millis(50));
        gate_tx.send(()).unwrap();

        binder.join().unwrap();
        deleter.join().unwrap();

        assert!(bus.is_empty());
        assert!(!c.is_bound());
        assert_eq!(drv.probes.load(Ordering::SeqCst), 1);
        assert_eq!(drv.removes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deleted_child_is_not_bound_by_stale_snapshot() {
        let bus = AuxBus::new("facet_core");
        let c = child(FeatureId::Eth, 0);
        bus.add(c.clone()).unwrap();
        bus.delete(&c);

        let drv = SimDriver::new("facet_eth").build();
        bus.try_bind(&c, drv.clone());
        assert!(!c.is_bound());
        assert_eq!(drv.probes(), 0);
    }
}
