//! The personality table: one [`FeatureDescriptor`] per [`FeatureId`], in
//! table order.
//!
//! Each descriptor carries a `supported` predicate (hardware and firmware
//! capabilities) and an optional `enabled` predicate (administrative
//! parameter).  Predicates are plain functions over a [`DeviceView`]; a
//! capability or parameter that cannot be read counts as `false`.
//!
//! | id | label | enabled by |
//! |---|---|---|
//! | 0 | `eth` | `enable_eth` |
//! | 1 | `eth-rep` | – |
//! | 2 | `rdma` | `enable_rdma` |
//! | 3 | `rdma-rep` | – |
//! | 4 | `multiport` | – |
//! | 5 | `vnet` | `enable_vnet` |
//! | 6 | `dpll` | – |
//! | 7 | `fwctl` | – |

use facet_host::ParamStore;
use facet_types::{
    BuildFeatures, EswitchMode, FeatureId, FunctionKind, HcaCaps, ParamId, PortType,
};
use tracing::{debug, warn};

use crate::flags::DeviceFlags;

/// Everything a predicate may look at.
pub struct DeviceView<'a> {
    pub device: &'a str,
    /// `None` when the capability query failed.
    pub caps: Option<&'a HcaCaps>,
    pub params: &'a dyn ParamStore,
    pub flags: DeviceFlags,
    pub build: &'a BuildFeatures,
}

pub type Predicate = fn(&DeviceView<'_>) -> bool;

/// Static description of one personality.
pub struct FeatureDescriptor {
    pub id: FeatureId,
    pub label: &'static str,
    pub supported: Predicate,
    pub enabled: Option<Predicate>,
}

impl FeatureDescriptor {
    pub fn is_supported(&self, view: &DeviceView<'_>) -> bool {
        (self.supported)(view)
    }

    /// `true` when there is no `enabled` predicate.
    pub fn is_enabled(&self, view: &DeviceView<'_>) -> bool {
        self.enabled.is_none_or(|enabled| enabled(view))
    }
}

/// The feature table, indexed by [`FeatureId::index`].
pub static FEATURES: [FeatureDescriptor; FeatureId::COUNT] = [
    FeatureDescriptor {
        id: FeatureId::Eth,
        label: FeatureId::Eth.label(),
        supported: eth_supported,
        enabled: Some(eth_enabled),
    },
    FeatureDescriptor {
        id: FeatureId::EthRep,
        label: FeatureId::EthRep.label(),
        supported: eth_rep_supported,
        enabled: None,
    },
    FeatureDescriptor {
        id: FeatureId::Rdma,
        label: FeatureId::Rdma.label(),
        supported: rdma_supported,
        enabled: Some(rdma_enabled),
    },
    FeatureDescriptor {
        id: FeatureId::RdmaRep,
        label: FeatureId::RdmaRep.label(),
        supported: rdma_rep_supported,
        enabled: None,
    },
    FeatureDescriptor {
        id: FeatureId::Multiport,
        label: FeatureId::Multiport.label(),
        supported: multiport_supported,
        enabled: None,
    },
    FeatureDescriptor {
        id: FeatureId::Vnet,
        label: FeatureId::Vnet.label(),
        supported: vnet_supported,
        enabled: Some(vnet_enabled),
    },
    FeatureDescriptor {
        id: FeatureId::Dpll,
        label: FeatureId::Dpll.label(),
        supported: dpll_supported,
        enabled: None,
    },
    FeatureDescriptor {
        id: FeatureId::Fwctl,
        label: FeatureId::Fwctl.label(),
        supported: fwctl_supported,
        enabled: None,
    },
];

pub fn descriptor(id: FeatureId) -> &'static FeatureDescriptor {
    &FEATURES[id.index()]
}

// ────────────────────────────────────────────────────────────────────────────
// Supported predicates
// ────────────────────────────────────────────────────────────────────────────

fn eth_supported(view: &DeviceView<'_>) -> bool {
    let Some(caps) = view.caps else {
        return false;
    };
    if !view.build.core_en || caps.port_type != PortType::Ethernet {
        return false;
    }

    let required = [
        (caps.eth_net_offloads, "eth_net_offloads"),
        (caps.nic_flow_table, "nic_flow_table"),
        (caps.csum_cap, "csum_cap"),
        (caps.max_lso_cap, "max_lso_cap"),
        (caps.vlan_cap, "vlan_cap"),
        (caps.rss_ind_tbl_cap, "rss_ind_tbl_cap"),
    ];
    if let Some((_, missing)) = required.iter().find(|(present, _)| !present) {
        warn!(device = view.device, capability = missing, "missing eth capability");
        return false;
    }
    if caps.max_ft_level < 3 {
        warn!(device = view.device, level = caps.max_ft_level, "max_ft_level < 3");
        return false;
    }

    if !caps.self_lb_en_modifiable {
        warn!(device = view.device, "self loopback prevention is not supported");
    }
    if !caps.cq_moderation {
        warn!(device = view.device, "CQ moderation is not supported");
    }
    true
}

fn eth_rep_supported(view: &DeviceView<'_>) -> bool {
    let Some(caps) = view.caps else {
        return false;
    };
    view.build.eswitch && caps.eswitch_manager && caps.eswitch_mode == EswitchMode::Switchdev
}

fn ib_allowed(view: &DeviceView<'_>) -> bool {
    view.build.infiniband && !view.flags.contains(DeviceFlags::DISABLE_IB)
}

fn rdma_rep_supported(view: &DeviceView<'_>) -> bool {
    let Some(caps) = view.caps else {
        return false;
    };
    ib_allowed(view) && eth_rep_supported(view) && !caps.mp_enabled
}

fn multiport_supported(view: &DeviceView<'_>) -> bool {
    let Some(caps) = view.caps else {
        return false;
    };
    ib_allowed(view)
        && !rdma_rep_supported(view)
        && caps.port_type == PortType::Ethernet
        && caps.mp_slave
}

fn rdma_supported(view: &DeviceView<'_>) -> bool {
    view.caps.is_some()
        && ib_allowed(view)
        && !rdma_rep_supported(view)
        && !multiport_supported(view)
}

fn vnet_supported(view: &DeviceView<'_>) -> bool {
    let Some(caps) = view.caps else {
        return false;
    };
    view.build.vdpa_net
        && caps.function != FunctionKind::Pf
        && caps.virtio_net_q
        && caps.vdpa_qp_event_mode
        && caps.eth_frame_offload
}

fn dpll_supported(view: &DeviceView<'_>) -> bool {
    let Some(caps) = view.caps else {
        return false;
    };
    if !view.build.dpll {
        return false;
    }
    if !caps.synce_registers {
        debug!(device = view.device, "missing SyncE capability");
        return false;
    }
    true
}

// fwctl is most useful on PFs and VFs; SFs are excluded.
fn fwctl_supported(view: &DeviceView<'_>) -> bool {
    view.caps
        .is_some_and(|caps| caps.uctx_cap && caps.function != FunctionKind::Sf)
}

// ────────────────────────────────────────────────────────────────────────────
// Enabled predicates
// ────────────────────────────────────────────────────────────────────────────

fn param_enabled(view: &DeviceView<'_>, id: ParamId) -> bool {
    match view.params.get(id) {
        Ok(value) => value,
        Err(e) => {
            debug!(device = view.device, param = %id, error = %e, "parameter unreadable; treating as disabled");
            false
        }
    }
}

fn eth_enabled(view: &DeviceView<'_>) -> bool {
    param_enabled(view, ParamId::EnableEth)
}

fn rdma_enabled(view: &DeviceView<'_>) -> bool {
    param_enabled(view, ParamId::EnableRdma)
}

fn vnet_enabled(view: &DeviceView<'_>) -> bool {
    param_enabled(view, ParamId::EnableVnet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_host::ParamTable;

    fn supported_set(caps: Option<&HcaCaps>, flags: DeviceFlags, build: &BuildFeatures) -> Vec<FeatureId> {
        let params = ParamTable::with_defaults();
        let view = DeviceView {
            device: "test",
            caps,
            params: &params,
            flags,
            build,
        };
        FEATURES
            .iter()
            .filter(|d| d.is_supported(&view))
            .map(|d| d.id)
            .collect()
    }

    fn supported(caps: &HcaCaps) -> Vec<FeatureId> {
        supported_set(Some(caps), DeviceFlags::empty(), &BuildFeatures::default())
    }

    #[test]
    fn table_is_in_id_order() {
        for (i, desc) in FEATURES.iter().enumerate() {
            assert_eq!(desc.id.index(), i);
            assert_eq!(desc.label, desc.id.label());
            assert_eq!(descriptor(desc.id).id, desc.id);
        }
    }

    #[test]
    fn only_eth_rdma_vnet_have_enable_params() {
        let gated: Vec<_> = FEATURES
            .iter()
            .filter(|d| d.enabled.is_some())
            .map(|d| d.id)
            .collect();
        assert_eq!(gated, vec![FeatureId::Eth, FeatureId::Rdma, FeatureId::Vnet]);
    }

    #[test]
    fn ethernet_pf_legacy_mode() {
        let caps = HcaCaps::ethernet_pf(1);
        assert_eq!(
            supported(&caps),
            vec![FeatureId::Eth, FeatureId::Rdma, FeatureId::Fwctl]
        );
    }

    #[test]
    fn switchdev_replaces_rdma_with_representors() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.eswitch_mode = EswitchMode::Switchdev;
        assert_eq!(
            supported(&caps),
            vec![
                FeatureId::Eth,
                FeatureId::EthRep,
                FeatureId::RdmaRep,
                FeatureId::Fwctl
            ]
        );
    }

    #[test]
    fn multiport_slave_replaces_rdma() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.mp_slave = true;
        let set = supported(&caps);
        assert!(set.contains(&FeatureId::Multiport));
        assert!(!set.contains(&FeatureId::Rdma));
    }

    #[test]
    fn multiport_master_in_switchdev_has_no_rdma_rep() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.eswitch_mode = EswitchMode::Switchdev;
        caps.mp_enabled = true;
        let set = supported(&caps);
        assert!(set.contains(&FeatureId::EthRep));
        assert!(!set.contains(&FeatureId::RdmaRep));
        assert!(set.contains(&FeatureId::Rdma));
    }

    #[test]
    fn disable_ib_suppresses_rdma_family() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.eswitch_mode = EswitchMode::Switchdev;
        let set = supported_set(Some(&caps), DeviceFlags::DISABLE_IB, &BuildFeatures::default());
        assert_eq!(set, vec![FeatureId::Eth, FeatureId::EthRep, FeatureId::Fwctl]);
    }

    #[test]
    fn missing_offload_disables_eth() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.csum_cap = false;
        assert!(!supported(&caps).contains(&FeatureId::Eth));

        let mut caps = HcaCaps::ethernet_pf(1);
        caps.max_ft_level = 2;
        assert!(!supported(&caps).contains(&FeatureId::Eth));
    }

    #[test]
    fn optional_eth_caps_only_warn() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.self_lb_en_modifiable = false;
        caps.cq_moderation = false;
        assert!(supported(&caps).contains(&FeatureId::Eth));
    }

    #[test]
    fn infiniband_port_has_no_eth() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.port_type = PortType::Infiniband;
        let set = supported(&caps);
        assert!(!set.contains(&FeatureId::Eth));
        assert!(set.contains(&FeatureId::Rdma));
    }

    #[test]
    fn vnet_requires_non_pf_and_vdpa_caps() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.virtio_net_q = true;
        caps.vdpa_qp_event_mode = true;
        caps.eth_frame_offload = true;
        assert!(!supported(&caps).contains(&FeatureId::Vnet));

        caps.function = FunctionKind::Vf;
        assert!(supported(&caps).contains(&FeatureId::Vnet));

        caps.vdpa_qp_event_mode = false;
        assert!(!supported(&caps).contains(&FeatureId::Vnet));
    }

    #[test]
    fn sub_function_has_no_fwctl() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.function = FunctionKind::Sf;
        assert!(!supported(&caps).contains(&FeatureId::Fwctl));
    }

    #[test]
    fn dpll_needs_synce() {
        let mut caps = HcaCaps::ethernet_pf(1);
        assert!(!supported(&caps).contains(&FeatureId::Dpll));
        caps.synce_registers = true;
        assert!(supported(&caps).contains(&FeatureId::Dpll));
    }

    #[test]
    fn build_features_gate_families() {
        let mut caps = HcaCaps::ethernet_pf(1);
        caps.synce_registers = true;
        let build = BuildFeatures {
            core_en: false,
            infiniband: false,
            dpll: false,
            ..BuildFeatures::default()
        };
        let set = supported_set(Some(&caps), DeviceFlags::empty(), &build);
        assert_eq!(set, vec![FeatureId::Fwctl]);
    }

    #[test]
    fn unreadable_caps_support_nothing() {
        assert!(supported_set(None, DeviceFlags::empty(), &BuildFeatures::default()).is_empty());
    }

    #[test]
    fn unreadable_param_counts_as_disabled() {
        let params = ParamTable::new();
        let caps = HcaCaps::ethernet_pf(1);
        let build = BuildFeatures::default();
        let view = DeviceView {
            device: "test",
            caps: Some(&caps),
            params: &params,
            flags: DeviceFlags::empty(),
            build: &build,
        };
        assert!(!descriptor(FeatureId::Eth).is_enabled(&view));
        assert!(descriptor(FeatureId::EthRep).is_enabled(&view));

        params.set(ParamId::EnableEth, true);
        assert!(descriptor(FeatureId::Eth).is_enabled(&view));
    }
}
