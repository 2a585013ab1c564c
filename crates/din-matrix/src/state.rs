//! Identifiers and small value types shared across the matrix

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Index of a DUT input channel (one matrix DIN device per channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DutChannel(pub u8);

impl DutChannel {
    /// Get the raw channel index
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for DutChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Index of a load bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(pub u8);

impl BusId {
    /// Get the raw bus index
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}", self.0)
    }
}

/// Bitmask selecting which loads of a bank are energized (bit `i` is load `i`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadMask(pub u32);

impl LoadMask {
    /// No loads
    pub const NONE: LoadMask = LoadMask(0);

    /// Largest number of loads a mask can address
    pub const MAX_LOADS: usize = 32;

    /// Mask with the low `count` bits set
    pub fn all(count: usize) -> Self {
        if count >= Self::MAX_LOADS {
            LoadMask(u32::MAX)
        } else {
            LoadMask((1u32 << count) - 1)
        }
    }

    /// Check if no load is selected
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Check whether load `index` is selected
    pub fn contains(&self, index: usize) -> bool {
        index < Self::MAX_LOADS && (self.0 >> index) & 1 == 1
    }

    /// Copy of this mask with load `index` set or cleared
    pub fn with(self, index: usize, on: bool) -> Self {
        if index >= Self::MAX_LOADS {
            return self;
        }
        if on {
            LoadMask(self.0 | (1 << index))
        } else {
            LoadMask(self.0 & !(1 << index))
        }
    }

    /// Raw mask value
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for LoadMask {
    fn from(bits: u32) -> Self {
        LoadMask(bits)
    }
}

impl fmt::Display for LoadMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// On/off status of a bus or of a path request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    /// Nothing routed
    #[default]
    Off,
    /// A channel is routed
    On,
}

impl Status {
    /// Check for `On`
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Kind of lighting load wired to a bus
///
/// Load types must never be mixed on one DUT channel, which is why the rack
/// is a 1:1 matrix rather than a full crossbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum LoadType {
    /// 0-10V dimming
    TenVolt,
    Incandescent,
    Led,
    /// Electronic low voltage
    Elv,
    Fan,
    /// Magnetic low voltage
    Mlv,
    /// Compact fluorescent
    Cfl,
    Fluorescent,
}

impl LoadType {
    /// All load types in catalogue order
    pub const ALL: [LoadType; 8] = [
        LoadType::TenVolt,
        LoadType::Incandescent,
        LoadType::Led,
        LoadType::Elv,
        LoadType::Fan,
        LoadType::Mlv,
        LoadType::Cfl,
        LoadType::Fluorescent,
    ];

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::TenVolt => "0-10V",
            Self::Incandescent => "Incandescent",
            Self::Led => "LED",
            Self::Elv => "ELV",
            Self::Fan => "Fan",
            Self::Mlv => "MLV",
            Self::Cfl => "CFL",
            Self::Fluorescent => "Fluorescent",
        }
    }
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LoadType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "010v" | "10v" | "tenvolt" => Ok(Self::TenVolt),
            "incandescent" | "inc" => Ok(Self::Incandescent),
            "led" => Ok(Self::Led),
            "elv" => Ok(Self::Elv),
            "fan" => Ok(Self::Fan),
            "mlv" => Ok(Self::Mlv),
            "cfl" => Ok(Self::Cfl),
            "fluorescent" | "fluor" => Ok(Self::Fluorescent),
            _ => Err(ConfigError::Invalid(format!("unknown load type: {s}"))),
        }
    }
}

impl TryFrom<String> for LoadType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Load bank summary: which loads exist and which are on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Bus this report describes
    pub bus: BusId,
    /// One bit per populated load
    pub exists: LoadMask,
    /// One bit per energized load
    pub state: LoadMask,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.exists, self.state)
    }
}
