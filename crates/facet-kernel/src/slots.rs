//! [`ChildSlots`] – the per-device array of personality slots.
//!
//! One slot per [`FeatureId`], indexed by [`FeatureId::index`].  A slot is
//! either empty or owns exactly one [`ChildHandle`].

use std::sync::Arc;

use facet_host::{ChildDevice, ChildDriver};
use facet_types::FeatureId;

/// Owning handle to one live child object.
///
/// Dropping the handle gives up the slot's reference; the child itself is
/// released once every other reference (bus, drivers, observers) is gone.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    child: Arc<ChildDevice>,
}

impl ChildHandle {
    pub fn new(child: Arc<ChildDevice>) -> Self {
        Self { child }
    }

    pub fn feature(&self) -> FeatureId {
        self.child.feature()
    }

    pub fn name(&self) -> &str {
        self.child.name()
    }

    pub fn index(&self) -> u32 {
        self.child.index()
    }

    /// Driver currently bound to the child.
    pub fn driver(&self) -> Option<Arc<dyn ChildDriver>> {
        self.child.driver()
    }

    pub fn child(&self) -> &Arc<ChildDevice> {
        &self.child
    }

    pub fn into_child(self) -> Arc<ChildDevice> {
        self.child
    }
}

/// Fixed-size slot array.
#[derive(Debug)]
pub struct ChildSlots {
    slots: [Option<ChildHandle>; FeatureId::COUNT],
}

impl Default for ChildSlots {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl ChildSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FeatureId) -> Option<&ChildHandle> {
        self.slots[id.index()].as_ref()
    }

    pub fn is_present(&self, id: FeatureId) -> bool {
        self.slots[id.index()].is_some()
    }

    /// Fill an empty slot.
    pub fn insert(&mut self, id: FeatureId, handle: ChildHandle) {
        debug_assert_eq!(handle.feature(), id);
        let previous = self.slots[id.index()].replace(handle);
        debug_assert!(previous.is_none(), "slot {id} was already present");
    }

    /// Empty a slot, returning its handle.
    pub fn take(&mut self, id: FeatureId) -> Option<ChildHandle> {
        self.slots[id.index()].take()
    }

    /// Present feature ids in table order.
    pub fn present(&self) -> impl Iterator<Item = FeatureId> + '_ {
        FeatureId::ALL
            .into_iter()
            .filter(|id| self.is_present(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildHandle> {
        self.slots.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(feature: FeatureId) -> ChildHandle {
        let name = format!("facet_core.{}.0", feature.label());
        ChildHandle::new(ChildDevice::new("pf0", feature, 0, name, Box::new(|_| {})))
    }

    #[test]
    fn new_slots_are_empty() {
        let slots = ChildSlots::new();
        assert!(slots.is_empty());
        assert_eq!(slots.present().count(), 0);
    }

    #[test]
    fn insert_and_take() {
        let mut slots = ChildSlots::new();
        slots.insert(FeatureId::Dpll, handle(FeatureId::Dpll));
        slots.insert(FeatureId::Eth, handle(FeatureId::Eth));

        assert!(slots.is_present(FeatureId::Eth));
        assert_eq!(
            slots.present().collect::<Vec<_>>(),
            vec![FeatureId::Eth, FeatureId::Dpll]
        );
        assert_eq!(slots.get(FeatureId::Dpll).unwrap().name(), "facet_core.dpll.0");

        let taken = slots.take(FeatureId::Eth).unwrap();
        assert_eq!(taken.feature(), FeatureId::Eth);
        assert!(!slots.is_present(FeatureId::Eth));
        assert!(slots.take(FeatureId::Eth).is_none());
        assert_eq!(slots.iter().count(), 1);
    }
}
