//! Capability and parameter sources read by the personality predicates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use facet_types::{FacetError, HcaCaps, ParamId};
use parking_lot::RwLock;

/// Hardware/firmware capability query.
pub trait CapabilitySource: Send + Sync {
    /// Read the current capability snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`FacetError::PredicateUnavailable`] when the capabilities
    /// cannot be read.
    fn query(&self) -> Result<HcaCaps, FacetError>;
}

/// Administrative parameter store (driver-init values).
pub trait ParamStore: Send + Sync {
    /// Read a boolean parameter.
    ///
    /// # Errors
    ///
    /// Returns [`FacetError::PredicateUnavailable`] when the parameter is
    /// not registered.
    fn get(&self, id: ParamId) -> Result<bool, FacetError>;
}

/// In-memory capability register.  Capabilities can be rewritten at any
/// time, e.g. to model a firmware update or an eswitch mode change.
pub struct CapsRegister {
    caps: RwLock<HcaCaps>,
    offline: AtomicBool,
}

impl CapsRegister {
    pub fn new(caps: HcaCaps) -> Self {
        Self {
            caps: RwLock::new(caps),
            offline: AtomicBool::new(false),
        }
    }

    /// Replace the whole snapshot.
    pub fn set(&self, caps: HcaCaps) {
        *self.caps.write() = caps;
    }

    /// Modify the snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut HcaCaps)) {
        f(&mut *self.caps.write());
    }

    /// While offline every query fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl CapabilitySource for CapsRegister {
    fn query(&self) -> Result<HcaCaps, FacetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FacetError::PredicateUnavailable {
                what: "capabilities".to_string(),
                details: "capability query timed out".to_string(),
            });
        }
        Ok(self.caps.read().clone())
    }
}

/// In-memory [`ParamStore`].
#[derive(Default)]
pub struct ParamTable {
    values: RwLock<HashMap<ParamId, bool>>,
}

impl ParamTable {
    /// A table with no registered parameters; every read fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every parameter registered and set to `true`.
    pub fn with_defaults() -> Self {
        let table = Self::new();
        for id in ParamId::ALL {
            table.set(id, true);
        }
        table
    }

    pub fn set(&self, id: ParamId, value: bool) {
        self.values.write().insert(id, value);
    }

    /// Unregister `id` so subsequent reads fail.
    pub fn unset(&self, id: ParamId) {
        self.values.write().remove(&id);
    }
}

impl ParamStore for ParamTable {
    fn get(&self, id: ParamId) -> Result<bool, FacetError> {
        self.values
            .read()
            .get(&id)
            .copied()
            .ok_or_else(|| FacetError::PredicateUnavailable {
                what: id.name().to_string(),
                details: "parameter not registered".to_string(),
            })
    }
}
