use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One personality a multi-function device can expose.
///
/// The discriminant is the feature's position in the feature table: it is
/// the creation order for attach and the reverse of the teardown order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureId {
    /// Ethernet netdev
    Eth = 0,
    /// Ethernet representor (switchdev mode)
    EthRep = 1,
    /// RDMA device
    Rdma = 2,
    /// RDMA representor
    RdmaRep = 3,
    /// Multiport RDMA slave
    Multiport = 4,
    /// vDPA virtio-net backend
    Vnet = 5,
    /// SyncE / DPLL timing
    Dpll = 6,
    /// Firmware control channel
    Fwctl = 7,
}

impl FeatureId {
    /// Number of personalities in the table.
    pub const COUNT: usize = 8;

    /// Every feature in table order.
    pub const ALL: [FeatureId; Self::COUNT] = [
        FeatureId::Eth,
        FeatureId::EthRep,
        FeatureId::Rdma,
        FeatureId::RdmaRep,
        FeatureId::Multiport,
        FeatureId::Vnet,
        FeatureId::Dpll,
        FeatureId::Fwctl,
    ];

    /// Position of this feature in the table.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`FeatureId::index`].
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Name suffix used for child objects of this personality.
    pub const fn label(self) -> &'static str {
        match self {
            FeatureId::Eth => "eth",
            FeatureId::EthRep => "eth-rep",
            FeatureId::Rdma => "rdma",
            FeatureId::RdmaRep => "rdma-rep",
            FeatureId::Multiport => "multiport",
            FeatureId::Vnet => "vnet",
            FeatureId::Dpll => "dpll",
            FeatureId::Fwctl => "fwctl",
        }
    }

    /// Parse a label such as `"rdma-rep"`.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware capabilities
// ────────────────────────────────────────────────────────────────────────────

/// Link layer reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    #[default]
    Ethernet,
    Infiniband,
}

/// PCI function flavour of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Physical function
    #[default]
    Pf,
    /// Virtual function
    Vf,
    /// Sub-function
    Sf,
}

/// Embedded switch operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EswitchMode {
    #[default]
    Legacy,
    Switchdev,
}

/// Snapshot of the capability bits the personality predicates inspect.
///
/// `Default` is a device that supports nothing; use
/// [`HcaCaps::ethernet_pf`] for a typical Ethernet physical function.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HcaCaps {
    pub port_type: PortType,
    pub function: FunctionKind,
    /// Identifies the physical card; ports of one card share it. Zero means
    /// unknown.
    pub system_image_guid: u64,

    pub eth_net_offloads: bool,
    pub nic_flow_table: bool,
    pub csum_cap: bool,
    pub max_lso_cap: bool,
    pub vlan_cap: bool,
    pub rss_ind_tbl_cap: bool,
    pub max_ft_level: u8,
    pub self_lb_en_modifiable: bool,
    pub cq_moderation: bool,

    pub eswitch_manager: bool,
    pub eswitch_mode: EswitchMode,

    /// Multiport RDMA is enabled on this device (it is the master).
    pub mp_enabled: bool,
    /// This device is a multiport RDMA slave.
    pub mp_slave: bool,

    pub virtio_net_q: bool,
    pub vdpa_qp_event_mode: bool,
    pub eth_frame_offload: bool,

    pub synce_registers: bool,
    pub uctx_cap: bool,
}

impl HcaCaps {
    /// An Ethernet PF with full offloads, an eswitch in legacy mode and a
    /// firmware control channel.
    pub fn ethernet_pf(system_image_guid: u64) -> Self {
        Self {
            port_type: PortType::Ethernet,
            function: FunctionKind::Pf,
            system_image_guid,
            eth_net_offloads: true,
            nic_flow_table: true,
            csum_cap: true,
            max_lso_cap: true,
            vlan_cap: true,
            rss_ind_tbl_cap: true,
            max_ft_level: 6,
            self_lb_en_modifiable: true,
            cq_moderation: true,
            eswitch_manager: true,
            eswitch_mode: EswitchMode::Legacy,
            uctx_cap: true,
            ..Self::default()
        }
    }
}

/// Which personality families the host was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildFeatures {
    pub core_en: bool,
    pub eswitch: bool,
    pub infiniband: bool,
    pub vdpa_net: bool,
    pub dpll: bool,
}

impl Default for BuildFeatures {
    fn default() -> Self {
        Self {
            core_en: true,
            eswitch: true,
            infiniband: true,
            vdpa_net: true,
            dpll: true,
        }
    }
}

/// Administrative driver-init parameters that gate personalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamId {
    EnableEth,
    EnableRdma,
    EnableVnet,
}

impl ParamId {
    pub const ALL: [ParamId; 3] = [ParamId::EnableEth, ParamId::EnableRdma, ParamId::EnableVnet];

    pub const fn name(self) -> &'static str {
        match self {
            ParamId::EnableEth => "enable_eth",
            ParamId::EnableRdma => "enable_rdma",
            ParamId::EnableVnet => "enable_vnet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle events and snapshots
// ────────────────────────────────────────────────────────────────────────────

/// What happened to a child object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Registered with the host bus.
    Created,
    /// Removal requested; the slot is empty from this point on.
    DeleteRequested,
    /// Bound driver suspended; the child stays present.
    Suspended,
    /// Bound driver resumed.
    Resumed,
    /// Last reference dropped; the index is back in the allocator.
    Released,
}

/// Lifecycle notification published for every child transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Owning device name, e.g. `"0000:08:00.0"`.
    pub device: String,
    pub feature: FeatureId,
    /// Full child name, e.g. `"facet_core.eth.0"`.
    pub child: String,
    pub kind: LifecycleEventKind,
}

impl LifecycleEvent {
    pub fn new(
        device: impl Into<String>,
        feature: FeatureId,
        child: impl Into<String>,
        kind: LifecycleEventKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            device: device.into(),
            feature,
            child: child.into(),
            kind,
        }
    }
}

/// One present slot as seen by [`DeviceSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub feature: FeatureId,
    pub child: String,
    pub index: u32,
    /// Name of the bound driver, if any.
    pub driver: Option<String>,
}

/// Point-in-time view of a device's flags and children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device: String,
    pub detaching: bool,
    pub lightweight: bool,
    pub ib_disabled: bool,
    pub slots: Vec<SlotSnapshot>,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Errors raised while managing device personalities.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacetError {
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    #[error("Child creation failed for {child}: {details}")]
    ChildCreationFailed { child: String, details: String },

    #[error("Predicate input unavailable ({what}): {details}")]
    PredicateUnavailable { what: String, details: String },

    #[error("Resume failed for {child}: {details}")]
    ResumeFailed { child: String, details: String },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_order_matches_index() {
        for (i, f) in FeatureId::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
            assert_eq!(FeatureId::from_index(i), Some(*f));
        }
        assert_eq!(FeatureId::from_index(FeatureId::COUNT), None);
    }

    #[test]
    fn feature_label_roundtrip() {
        for f in FeatureId::ALL {
            assert_eq!(FeatureId::from_label(f.label()), Some(f));
        }
        assert_eq!(FeatureId::from_label("infiniband"), None);
        assert_eq!(FeatureId::RdmaRep.to_string(), "rdma-rep");
    }

    #[test]
    fn feature_serializes_as_label() {
        let json = serde_json::to_string(&FeatureId::EthRep).unwrap();
        assert_eq!(json, "\"eth-rep\"");
    }

    #[test]
    fn param_name_roundtrip() {
        for p in ParamId::ALL {
            assert_eq!(ParamId::from_name(p.name()), Some(p));
        }
        assert_eq!(ParamId::from_name("enable_dpll"), None);
    }

    #[test]
    fn default_caps_support_nothing() {
        let caps = HcaCaps::default();
        assert!(!caps.eth_net_offloads);
        assert!(!caps.uctx_cap);
        assert_eq!(caps.system_image_guid, 0);
    }

    #[test]
    fn caps_deserialize_with_missing_fields() {
        let caps: HcaCaps =
            serde_json::from_str(r#"{"function":"sf","uctx_cap":true}"#).unwrap();
        assert_eq!(caps.function, FunctionKind::Sf);
        assert!(caps.uctx_cap);
        assert_eq!(caps.port_type, PortType::Ethernet);
    }

    #[test]
    fn build_features_default_all_enabled() {
        let b: BuildFeatures = serde_json::from_str(r#"{"dpll":false}"#).unwrap();
        assert!(b.core_en && b.eswitch && b.infiniband && b.vdpa_net);
        assert!(!b.dpll);
    }

    #[test]
    fn lifecycle_event_roundtrip() {
        let ev = LifecycleEvent::new(
            "0000:08:00.0",
            FeatureId::Rdma,
            "facet_core.rdma.3",
            LifecycleEventKind::Created,
        );
        let json = serde_json::to_string(&ev).unwrap();
        let back: LifecycleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, ev.id);
        assert_eq!(back.feature, FeatureId::Rdma);
        assert_eq!(back.kind, LifecycleEventKind::Created);
    }

    #[test]
    fn facet_error_display() {
        let err = FacetError::ChildCreationFailed {
            child: "facet_core.eth.0".to_string(),
            details: "name in use".to_string(),
        };
        assert!(err.to_string().contains("facet_core.eth.0"));

        let err = FacetError::ResourceExhausted {
            resource: "child index".to_string(),
        };
        assert!(err.to_string().contains("exhausted"));
    }
}
