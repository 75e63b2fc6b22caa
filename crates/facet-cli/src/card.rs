//! A simulated card assembled from a [`Config`]: one shared bus, index
//! allocator, event bus and registry lock, and one [`CoreDevice`] per
//! configured device.

use std::sync::Arc;

use facet_host::{AuxBus, CapsRegister, EventReceiver, ParamTable, SimDriver};
use facet_kernel::{CoreDevice, Host, IndexAllocator, PeerDirectory, RegistryLock};
use facet_types::{FacetError, FeatureId};
use tracing::{info, warn};

use crate::config::Config;

/// One device on the card plus the handles used to poke its inputs.
pub struct CardDevice {
    pub dev: CoreDevice,
    pub caps: Arc<CapsRegister>,
    pub params: Arc<ParamTable>,
}

pub struct Card {
    pub bus: Arc<AuxBus>,
    pub ida: Arc<IndexAllocator>,
    pub registry: Arc<RegistryLock>,
    pub peers: PeerDirectory,
    pub devices: Vec<CardDevice>,
    pub drivers: Vec<(FeatureId, Arc<SimDriver>)>,
    events: EventReceiver,
}

impl Card {
    pub fn build(cfg: &Config) -> Self {
        let bus = Arc::new(AuxBus::new(cfg.bus_prefix.clone()));
        let ida = Arc::new(IndexAllocator::with_limit(cfg.index_limit));
        let host = Arc::new(
            Host::new(bus.clone())
                .with_ida(ida.clone())
                .with_build(cfg.build.clone()),
        );
        let events = host.events().subscribe();
        let registry = Arc::new(RegistryLock::new());
        let peers = PeerDirectory::new();

        let mut drivers = Vec::new();
        for drv in &cfg.drivers {
            let Some(feature) = drv.feature() else {
                warn!(driver = %drv.name, label = %drv.label, "unknown personality; driver skipped");
                continue;
            };
            let mut builder = SimDriver::new(drv.name.clone());
            if drv.suspend {
                builder = builder.with_suspend();
            }
            if drv.resume {
                builder = builder.with_resume();
            }
            let sim = builder.build();
            bus.register_driver(feature, sim.clone());
            drivers.push((feature, sim));
        }

        let devices = cfg
            .devices
            .iter()
            .map(|d| {
                let caps = Arc::new(CapsRegister::new(d.caps.clone()));
                let params = Arc::new(ParamTable::with_defaults());
                for (id, value) in d.params.overrides() {
                    params.set(id, value);
                }
                let group = peers.join(d.caps.system_image_guid);
                let dev = CoreDevice::new(
                    d.name.clone(),
                    host.clone(),
                    caps.clone(),
                    params.clone(),
                    group,
                )
                .with_registry(registry.clone());
                CardDevice { dev, caps, params }
            })
            .collect();

        Self {
            bus,
            ida,
            registry,
            peers,
            devices,
            drivers,
            events,
        }
    }

    pub fn device(&self, name: &str) -> Result<&CardDevice, FacetError> {
        self.devices
            .iter()
            .find(|d| d.dev.name() == name)
            .ok_or_else(|| FacetError::UnknownDevice(name.to_string()))
    }

    /// Register every device.  Returns the devices that failed.
    pub fn register_all(&self) -> Vec<(String, FacetError)> {
        let _registry = self.registry.lock();
        self.devices
            .iter()
            .filter_map(|d| {
                d.dev
                    .register_device()
                    .err()
                    .map(|e| (d.dev.name().to_string(), e))
            })
            .collect()
    }

    /// Unregister every device in reverse order.
    pub fn shutdown(&self) {
        let _registry = self.registry.lock();
        for d in self.devices.iter().rev() {
            d.dev.unregister_device();
        }
        info!(children = self.bus.len(), indices = self.ida.in_use(), "card shut down");
    }

    /// Lifecycle events published since the last call.
    pub fn take_events(&mut self) -> Vec<facet_types::LifecycleEvent> {
        facet_host::events::drain(&mut self.events)
    }
}
