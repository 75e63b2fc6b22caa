//! [`CoreDevice`] – one physical function and its personality slots – and
//! [`Host`], the collaborators shared by every device.
//!
//! # Locking
//!
//! Lock order is always: registry lock (held by the caller) → peer-group
//! lock → slot lock.  Flags and slots are only written while the peer-group
//! lock is held.  Flags are an atomic word and the slot lock is only taken
//! for single reads or updates, never across a bus or driver call, so driver
//! hooks may query their parent device freely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use facet_host::{CapabilitySource, ChildBus, ChildDevice, EventBus, ParamStore};
use facet_types::{BuildFeatures, DeviceSnapshot, FeatureId, HcaCaps, SlotSnapshot};
use parking_lot::Mutex;
use tracing::warn;

use crate::feature_table::DeviceView;
use crate::flags::DeviceFlags;
use crate::ida::{self, IndexAllocator};
use crate::peer::PeerGroup;
use crate::registry::RegistryLock;
use crate::slots::{ChildHandle, ChildSlots};

/// Collaborators shared by every device on the host.
pub struct Host {
    bus: Arc<dyn ChildBus>,
    ida: Arc<IndexAllocator>,
    events: EventBus,
    build: BuildFeatures,
}

impl Host {
    /// Host on `bus` using the process-wide index allocator, a fresh event
    /// bus and every personality family built in.
    pub fn new(bus: Arc<dyn ChildBus>) -> Self {
        Self {
            bus,
            ida: ida::global(),
            events: EventBus::default(),
            build: BuildFeatures::default(),
        }
    }

    pub fn with_ida(mut self, ida: Arc<IndexAllocator>) -> Self {
        self.ida = ida;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_build(mut self, build: BuildFeatures) -> Self {
        self.build = build;
        self
    }

    pub fn bus(&self) -> &Arc<dyn ChildBus> {
        &self.bus
    }

    pub fn ida(&self) -> &Arc<IndexAllocator> {
        &self.ida
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn build(&self) -> &BuildFeatures {
        &self.build
    }
}

/// A physical function whose personalities are managed as child objects.
///
/// The lifecycle entry points ([`rescan`](CoreDevice::rescan),
/// [`attach`](CoreDevice::attach), [`detach`](CoreDevice::detach),
/// [`register_device`](CoreDevice::register_device),
/// [`unregister_device`](CoreDevice::unregister_device)) live in
/// [`crate::lifecycle`].  All of them expect the caller to hold
/// [`CoreDevice::registry`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use facet_host::{AuxBus, CapsRegister, ParamTable};
/// use facet_kernel::{CoreDevice, Host, IndexAllocator, PeerGroup};
/// use facet_types::{FeatureId, HcaCaps};
///
/// let host = Arc::new(
///     Host::new(Arc::new(AuxBus::new("facet_core")))
///         .with_ida(Arc::new(IndexAllocator::new())),
/// );
/// let dev = CoreDevice::new(
///     "0000:08:00.0",
///     host,
///     Arc::new(CapsRegister::new(HcaCaps::ethernet_pf(0x1234))),
///     Arc::new(ParamTable::with_defaults()),
///     PeerGroup::new(0x1234),
/// );
///
/// let _registry = dev.registry().lock();
/// dev.register_device().unwrap();
/// assert_eq!(
///     dev.present_features(),
///     vec![FeatureId::Eth, FeatureId::Rdma, FeatureId::Fwctl]
/// );
/// ```
pub struct CoreDevice {
    name: String,
    pub(crate) host: Arc<Host>,
    caps: Arc<dyn CapabilitySource>,
    params: Arc<dyn ParamStore>,
    pub(crate) registry: Arc<RegistryLock>,
    pub(crate) peers: Arc<PeerGroup>,
    flags: AtomicU32,
    slots: Mutex<ChildSlots>,
}

impl CoreDevice {
    pub fn new(
        name: impl Into<String>,
        host: Arc<Host>,
        caps: Arc<dyn CapabilitySource>,
        params: Arc<dyn ParamStore>,
        peers: Arc<PeerGroup>,
    ) -> Self {
        Self {
            name: name.into(),
            host,
            caps,
            params,
            registry: Arc::new(RegistryLock::new()),
            peers,
            flags: AtomicU32::new(DeviceFlags::empty().bits()),
            slots: Mutex::new(ChildSlots::new()),
        }
    }

    /// Share an existing registry lock instead of a private one.
    pub fn with_registry(mut self, registry: Arc<RegistryLock>) -> Self {
        self.registry = registry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Lock callers must hold around every lifecycle entry point.
    pub fn registry(&self) -> &RegistryLock {
        &self.registry
    }

    pub fn peers(&self) -> &Arc<PeerGroup> {
        &self.peers
    }

    /// Lock-free read; safe from inside driver hooks.
    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// Enter lightweight mode.  Children are removed by the next rescan.
    pub fn set_lightweight(&self) {
        let _peers = self.peers.lock();
        self.update_flags(|f| f.insert(DeviceFlags::DISABLE_ALL));
    }

    pub fn is_lightweight(&self) -> bool {
        self.flags().contains(DeviceFlags::DISABLE_ALL)
    }

    pub fn is_detaching(&self) -> bool {
        self.flags().contains(DeviceFlags::DETACHING)
    }

    /// Suppress or allow the RDMA personalities.  Takes effect on the next
    /// rescan.
    pub fn set_ib_disabled(&self, disabled: bool) {
        let _peers = self.peers.lock();
        self.update_flags(|f| f.set(DeviceFlags::DISABLE_IB, disabled));
    }

    /// Present feature ids in table order.
    pub fn present_features(&self) -> Vec<FeatureId> {
        self.slots.lock().present().collect()
    }

    /// The live child of `feature`, if present.
    pub fn child(&self, feature: FeatureId) -> Option<Arc<ChildDevice>> {
        self.slot(feature).map(ChildHandle::into_child)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let flags = self.flags();
        let slots = self.slots.lock();
        DeviceSnapshot {
            device: self.name.clone(),
            detaching: flags.contains(DeviceFlags::DETACHING),
            lightweight: flags.contains(DeviceFlags::DISABLE_ALL),
            ib_disabled: flags.contains(DeviceFlags::DISABLE_IB),
            slots: slots
                .iter()
                .map(|h| SlotSnapshot {
                    feature: h.feature(),
                    child: h.name().to_string(),
                    index: h.index(),
                    driver: h.driver().map(|d| d.name().to_string()),
                })
                .collect(),
        }
    }

    // Writers must hold the peer-group lock.
    pub(crate) fn store_flags(&self, flags: DeviceFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub(crate) fn update_flags(&self, f: impl FnOnce(&mut DeviceFlags)) {
        let mut flags = self.flags();
        f(&mut flags);
        self.store_flags(flags);
    }

    pub(crate) fn slot(&self, feature: FeatureId) -> Option<ChildHandle> {
        self.slots.lock().get(feature).cloned()
    }

    pub(crate) fn is_slot_present(&self, feature: FeatureId) -> bool {
        self.slots.lock().is_present(feature)
    }

    pub(crate) fn take_slot(&self, feature: FeatureId) -> Option<ChildHandle> {
        self.slots.lock().take(feature)
    }

    pub(crate) fn fill_slot(&self, feature: FeatureId, handle: ChildHandle) {
        self.slots.lock().insert(feature, handle);
    }

    /// Read capabilities once for a lifecycle pass.  A failed read yields
    /// `None`, which every `supported` predicate treats as absent.
    pub(crate) fn query_caps(&self) -> Option<HcaCaps> {
        match self.caps.query() {
            Ok(caps) => Some(caps),
            Err(e) => {
                warn!(device = %self.name, error = %e, "capability query failed; treating personalities as unsupported");
                None
            }
        }
    }

    pub(crate) fn view<'a>(&'a self, caps: &'a Option<HcaCaps>, flags: DeviceFlags) -> DeviceView<'a> {
        DeviceView {
            device: &self.name,
            caps: caps.as_ref(),
            params: self.params.as_ref(),
            flags,
            build: &self.host.build,
        }
    }
}
