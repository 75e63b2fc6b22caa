//! `facet-kernel` – Personality lifecycle orchestration
//!
//! Decides which personalities of a multi-function device exist as child
//! objects, creates and deletes them in a fixed order, and keeps them
//! consistent across resets, mode changes and parameter updates.
//!
//! # Modules
//!
//! - [`ida`] – [`IndexAllocator`][ida::IndexAllocator]: process-wide unique
//!   child indices, lowest free first.
//! - [`flags`] – [`DeviceFlags`][flags::DeviceFlags]: the detaching,
//!   lightweight and IB-disabled bits.
//! - [`feature_table`] – the static [`FEATURES`][feature_table::FEATURES]
//!   table with per-personality `supported` / `enabled` predicates.
//! - [`slots`] – [`ChildSlots`][slots::ChildSlots]: one optional child per
//!   feature id.
//! - [`peer`] – [`PeerGroup`][peer::PeerGroup] and
//!   [`PeerDirectory`][peer::PeerDirectory]: the lock shared by ports of the
//!   same hardware.
//! - [`registry`] – [`RegistryLock`][registry::RegistryLock]: the outer lock
//!   callers hold around every lifecycle entry point.
//! - [`device`] – [`CoreDevice`][device::CoreDevice] and the shared
//!   [`Host`][device::Host].
//! - [`lifecycle`] – rescan, attach, detach, register and unregister.

pub mod device;
pub mod feature_table;
pub mod flags;
pub mod ida;
pub mod lifecycle;
pub mod peer;
pub mod registry;
pub mod slots;

pub use device::{CoreDevice, Host};
pub use feature_table::{DeviceView, FEATURES, FeatureDescriptor, descriptor};
pub use flags::DeviceFlags;
pub use ida::{IndexAllocator, alloc_index, free_index};
pub use peer::{PeerDirectory, PeerGroup, same_hw_devs};
pub use registry::{RegistryGuard, RegistryLock};
pub use slots::{ChildHandle, ChildSlots};
