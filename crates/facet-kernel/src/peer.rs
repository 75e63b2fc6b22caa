//! Peer groups: devices that are ports of one physical card share a
//! [`PeerGroup`] and therefore one lifecycle lock.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use facet_types::HcaCaps;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

/// Guard returned by [`PeerGroup::lock`].
pub type PeerGuard<'a> = MutexGuard<'a, ()>;

/// Lock shared by every device of one physical card.
#[derive(Debug, Default)]
pub struct PeerGroup {
    guid: u64,
    lock: Mutex<()>,
}

impl PeerGroup {
    /// A group keyed by `guid`.  Zero denotes a private group.
    pub fn new(guid: u64) -> Arc<Self> {
        Arc::new(Self {
            guid,
            lock: Mutex::new(()),
        })
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    /// Serialise lifecycle work across the group.
    pub fn lock(&self) -> PeerGuard<'_> {
        self.lock.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

/// Hands out one [`PeerGroup`] per system image GUID.
#[derive(Default)]
pub struct PeerDirectory {
    groups: Mutex<HashMap<u64, Weak<PeerGroup>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the group for `guid`, creating it on first use.  A zero GUID
    /// cannot be matched to any peer and always yields a fresh private
    /// group.
    pub fn join(&self, guid: u64) -> Arc<PeerGroup> {
        if guid == 0 {
            return PeerGroup::new(0);
        }
        let mut groups = self.groups.lock();
        groups.retain(|_, g| g.strong_count() > 0);
        if let Some(group) = groups.get(&guid).and_then(Weak::upgrade) {
            return group;
        }
        debug!(guid, "creating peer group");
        let group = PeerGroup::new(guid);
        groups.insert(guid, Arc::downgrade(&group));
        group
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups
            .lock()
            .values()
            .filter(|g| g.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether two devices are ports of the same physical card.
pub fn same_hw_devs(a: &HcaCaps, b: &HcaCaps) -> bool {
    a.system_image_guid != 0 && a.system_image_guid == b.system_image_guid
}
