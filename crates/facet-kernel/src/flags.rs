//! Per-device lifecycle flags.  Written only while the peer-group lock is
//! held.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFlags: u32 {
        /// Full teardown in progress; rescans are no-ops.
        const DETACHING = 1 << 0;
        /// Lightweight mode; no child may exist.
        const DISABLE_ALL = 1 << 1;
        /// Suppress every RDMA-family personality.
        const DISABLE_IB = 1 << 2;
    }
}
