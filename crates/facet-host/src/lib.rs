//! `facet-host` – Host collaborators for the personality lifecycle manager
//!
//! Everything the orchestrator in `facet-kernel` consumes but does not own.
//!
//! # Modules
//!
//! - [`child`] – [`ChildDevice`][child::ChildDevice] with release-on-last-drop
//!   semantics and the [`ChildDriver`][child::ChildDriver] hook trait.
//! - [`bus`] – the [`ChildBus`][bus::ChildBus] host object model and the
//!   in-memory [`AuxBus`][bus::AuxBus] with driver matching and fault
//!   injection.
//! - [`caps`] – [`CapabilitySource`][caps::CapabilitySource] and
//!   [`ParamStore`][caps::ParamStore] with in-memory implementations.
//! - [`events`] – broadcast [`EventBus`][events::EventBus] for lifecycle
//!   notifications.
//! - [`sim_driver`] – [`SimDriver`][sim_driver::SimDriver], a recording stub
//!   driver.

pub mod bus;
pub mod caps;
pub mod child;
pub mod events;
pub mod sim_driver;

pub use bus::{AuxBus, ChildBus};
pub use caps::{CapabilitySource, CapsRegister, ParamStore, ParamTable};
pub use child::{ChildDevice, ChildDriver, ReleaseFn};
pub use events::{EventBus, EventReceiver};
pub use sim_driver::SimDriver;
