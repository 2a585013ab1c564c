//! Device registry
//!
//! The rack is described by a JSON registry listing the matrix DIN devices
//! (one per DUT channel) and the bus DIN devices (one per load bus). Racks
//! with several matrices keep one numbered registry per instance:
//! `dinmatrix.json`, `dinmatrix1.json`, ...

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::state::{BusId, DutChannel, LoadMask, LoadType};

/// Base name of registry files
pub const REGISTRY_BASE_NAME: &str = "dinmatrix";

/// A matrix DIN device, which carries the selector relays of one DUT channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    /// DUT channel this device switches
    pub channel: DutChannel,
    /// Display alias (e.g. `dinmatrix0`)
    pub alias: String,
    /// Network address of the relay box
    pub ip: String,
    /// Hardware address, informational
    #[serde(default)]
    pub mac: String,
}

/// A bus DIN device, which carries the load relays of one bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusRecord {
    /// Bus id; also the selector output index on every matrix device
    pub id: BusId,
    /// Display alias (e.g. `dinbus0`)
    pub alias: String,
    /// Network address of the relay box
    pub ip: String,
    /// Hardware address, informational
    #[serde(default)]
    pub mac: String,
    /// Kind of load wired to the bank
    pub load_type: LoadType,
    /// Number of load relays in the bank
    #[serde(default = "default_num_loads")]
    pub num_loads: usize,
}

fn default_num_loads() -> usize {
    8
}

/// What to do when a relay write fails while a path is being installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the path recorded and leave relays as far as the writes got
    #[default]
    LeaveAsIs,
    /// Open the target bus, clear its loads and drop the path (best effort)
    ///
    /// The path is only dropped once its selector is open; a selector that
    /// cannot be opened stays recorded under either policy.
    Compensate,
}

/// Full registry for one matrix instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RackConfig {
    /// Matrix instance number
    #[serde(default)]
    pub instance: u32,
    /// Behaviour on relay write failure
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Matrix devices, one per DUT channel
    pub devices: Vec<DeviceRecord>,
    /// Load buses
    pub buses: Vec<BusRecord>,
}

impl RackConfig {
    /// Registry file name for `instance` inside `dir`
    ///
    /// Instance 0 uses the bare base name, later instances append their
    /// number. A `path` that already names a file is used as the stem.
    pub fn file_name(path: &Path, instance: u32) -> PathBuf {
        let stem = if path.is_dir() {
            path.join(REGISTRY_BASE_NAME)
        } else if path.extension().is_some() {
            path.with_extension("")
        } else {
            path.to_path_buf()
        };

        let mut name = stem.into_os_string();
        if instance != 0 {
            name.push(instance.to_string());
        }
        name.push(".json");
        PathBuf::from(name)
    }

    /// Parse and validate a registry from JSON text
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RackConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a registry file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading registry: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Write the registry as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check structural rules
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("no matrix devices".to_string()));
        }
        if self.buses.is_empty() {
            return Err(ConfigError::Invalid("no load buses".to_string()));
        }

        let mut channels = BTreeSet::new();
        for device in &self.devices {
            if !channels.insert(device.channel) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate DUT channel {} ({})",
                    device.channel, device.alias
                )));
            }
        }

        let mut buses = BTreeSet::new();
        for bus in &self.buses {
            if !buses.insert(bus.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate bus {} ({})",
                    bus.id, bus.alias
                )));
            }
            if bus.num_loads == 0 || bus.num_loads > LoadMask::MAX_LOADS {
                return Err(ConfigError::Invalid(format!(
                    "{} has {} loads, expected 1..={}",
                    bus.alias,
                    bus.num_loads,
                    LoadMask::MAX_LOADS
                )));
            }
        }

        Ok(())
    }

    /// Registry for an `n` x `n` rack with `num_loads` loads per bus
    ///
    /// Addresses follow the lab convention of one subnet for matrix devices
    /// and one for bus devices. Load types are assigned in catalogue order.
    pub fn square(n: u8, num_loads: usize) -> Self {
        let devices = (0..n)
            .map(|c| DeviceRecord {
                channel: DutChannel(c),
                alias: format!("dinmatrix{c}"),
                ip: format!("192.168.10.{}", 10 + c as u16),
                mac: String::new(),
            })
            .collect();
        let buses = (0..n)
            .map(|b| BusRecord {
                id: BusId(b),
                alias: format!("dinbus{b}"),
                ip: format!("192.168.11.{}", 10 + b as u16),
                mac: String::new(),
                load_type: LoadType::ALL[b as usize % LoadType::ALL.len()],
                num_loads,
            })
            .collect();

        Self {
            instance: 0,
            failure_policy: FailurePolicy::default(),
            devices,
            buses,
        }
    }
}
