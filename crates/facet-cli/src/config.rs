//! Card description – reads/writes `~/.facet/card.toml`.
//!
//! The card file describes the simulated hardware `facetctl` manages: the
//! bus prefix, the index space, which personality families are built in,
//! every device with its capability bits and parameters, and the drivers
//! bound to each personality.

use facet_types::{BuildFeatures, FeatureId, HcaCaps, ParamId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted card description stored in `~/.facet/card.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Prefix of every child name (`<prefix>.<label>.<index>`).
    #[serde(default = "default_bus_prefix")]
    pub bus_prefix: String,

    /// Child indices are issued in `0..index_limit`.
    #[serde(default = "default_index_limit")]
    pub index_limit: u32,

    /// Personality families compiled into the host.
    #[serde(default)]
    pub build: BuildFeatures,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub drivers: Vec<DriverConfig>,
}

/// One device (PCI function) on the card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,

    #[serde(default)]
    pub caps: HcaCaps,

    #[serde(default)]
    pub params: ParamsConfig,
}

/// Driver-init parameters.  An absent value keeps the default (`true`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_eth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_rdma: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_vnet: Option<bool>,
}

impl ParamsConfig {
    /// Explicitly configured values, in [`ParamId::ALL`] order.
    pub fn overrides(&self) -> impl Iterator<Item = (ParamId, bool)> + '_ {
        ParamId::ALL.into_iter().filter_map(move |id| {
            let value = match id {
                ParamId::EnableEth => self.enable_eth,
                ParamId::EnableRdma => self.enable_rdma,
                ParamId::EnableVnet => self.enable_vnet,
            };
            value.map(|v| (id, v))
        })
    }
}

/// A driver bound to every child of one personality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Personality label, e.g. `"eth"` or `"rdma-rep"`.
    pub label: String,

    /// Driver name, e.g. `"facet_eth"`.
    pub name: String,

    #[serde(default)]
    pub suspend: bool,

    #[serde(default)]
    pub resume: bool,
}

impl DriverConfig {
    /// Personality this driver binds to, or `None` for an unknown label.
    pub fn feature(&self) -> Option<FeatureId> {
        FeatureId::from_label(&self.label)
    }
}

fn default_bus_prefix() -> String {
    "facet_core".to_string()
}
fn default_index_limit() -> u32 {
    facet_kernel::ida::DEFAULT_INDEX_LIMIT
}

impl Default for Config {
    /// Two ports of one Ethernet card sharing a system image GUID, an eth
    /// driver that can suspend and resume, and an rdma driver that cannot.
    fn default() -> Self {
        const CARD_GUID: u64 = 0x0c42_a103_0065_1b2e;

        let port = |name: &str| DeviceConfig {
            name: name.to_string(),
            caps: HcaCaps::ethernet_pf(CARD_GUID),
            params: ParamsConfig::default(),
        };

        Self {
            bus_prefix: default_bus_prefix(),
            index_limit: default_index_limit(),
            build: BuildFeatures::default(),
            devices: vec![port("0000:08:00.0"), port("0000:08:00.1")],
            drivers: vec![
                DriverConfig {
                    label: FeatureId::Eth.label().to_string(),
                    name: "facet_eth".to_string(),
                    suspend: true,
                    resume: true,
                },
                DriverConfig {
                    label: FeatureId::Rdma.label().to_string(),
                    name: "facet_rdma".to_string(),
                    suspend: false,
                    resume: false,
                },
            ],
        }
    }
}

impl Config {
    /// Check device names are unique and every driver label is known.
    pub fn validate(&self) -> Result<(), String> {
        for (i, dev) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|d| d.name == dev.name) {
                return Err(format!("Duplicate device name '{}'", dev.name));
            }
        }
        for drv in &self.drivers {
            if drv.feature().is_none() {
                return Err(format!(
                    "Driver '{}' names unknown personality '{}'",
                    drv.name, drv.label
                ));
            }
        }
        Ok(())
    }
}

/// Return the card path: `FACET_CONFIG` if set, else `~/.facet/card.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("FACET_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".facet").join("card.toml")
}

/// Load the card from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read card at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse card: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `FACET_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FACET_BUS_PREFIX` | `bus_prefix` |
/// | `FACET_INDEX_LIMIT` | `index_limit` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// [`apply_env_overrides`] with the variable lookup supplied by the caller.
pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("FACET_BUS_PREFIX")
        && !v.is_empty()
    {
        cfg.bus_prefix = v;
    }
    if let Some(v) = lookup("FACET_INDEX_LIMIT")
        && let Ok(limit) = v.parse::<u32>()
    {
        cfg.index_limit = limit;
    }
}

/// Save the card to disk, creating `~/.facet/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create card directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize card: {}", e))?;
    // Owner read/write only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write card at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write card at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_types::EswitchMode;
    use std::collections::HashMap;

    #[test]
    fn default_card_has_two_peer_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(
            cfg.devices[0].caps.system_image_guid,
            cfg.devices[1].caps.system_image_guid
        );
        assert_ne!(cfg.devices[0].caps.system_image_guid, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn roundtrip_default_card() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.devices, cfg.devices);
        assert_eq!(loaded.drivers, cfg.drivers);
        assert_eq!(loaded.build, BuildFeatures::default());
    }

    #[cfg(unix)]
    #[test]
    fn card_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn config_path_points_to_facet_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".facet"));
        assert!(p.to_string_lossy().ends_with("card.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_card_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("card.toml");
        std::fs::write(
            &path,
            r#"
[build]
infiniband = false

[[devices]]
name = "pf0"

[devices.caps]
eth_net_offloads = true
eswitch_mode = "switchdev"

[devices.params]
enable_rdma = false

[[drivers]]
label = "eth-rep"
name = "facet_rep"
suspend = true
"#,
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert!(!cfg.build.infiniband);
        assert!(cfg.build.core_en);
        let dev = &cfg.devices[0];
        assert!(dev.caps.eth_net_offloads);
        assert!(!dev.caps.csum_cap);
        assert_eq!(dev.caps.eswitch_mode, EswitchMode::Switchdev);
        assert_eq!(
            dev.params.overrides().collect::<Vec<_>>(),
            vec![(ParamId::EnableRdma, false)]
        );
        assert_eq!(cfg.drivers[0].feature(), Some(FeatureId::EthRep));
        assert!(!cfg.drivers[0].resume);
    }

    #[test]
    fn unknown_driver_label_is_rejected() {
        let mut cfg = Config::default();
        cfg.drivers[0].label = "wifi".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("wifi"));
    }

    #[test]
    fn duplicate_device_name_is_rejected() {
        let mut cfg = Config::default();
        cfg.devices[1].name = cfg.devices[0].name.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_card_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("card.toml");
        std::fs::write(&path, "devices = 3").expect("write");
        assert!(load_from(&path).is_err());
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn overrides_change_prefix_and_limit() {
        let env = vars(&[("FACET_BUS_PREFIX", "mlx_test"), ("FACET_INDEX_LIMIT", "16")]);
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |k| env.get(k).cloned());
        assert_eq!(cfg.bus_prefix, "mlx_test");
        assert_eq!(cfg.index_limit, 16);
    }

    #[test]
    fn unparsable_or_empty_overrides_are_ignored() {
        let env = vars(&[("FACET_BUS_PREFIX", ""), ("FACET_INDEX_LIMIT", "lots")]);
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |k| env.get(k).cloned());
        assert_eq!(cfg.bus_prefix, Config::default().bus_prefix);
        assert_eq!(cfg.index_limit, default_index_limit());
    }
}
