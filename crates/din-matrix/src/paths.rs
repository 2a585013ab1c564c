//! Active path table and request classification
//!
//! The table is a two-way map between DUT channels and buses, so "one path
//! per channel" and "one path per bus" hold by construction. Classification
//! compares a request against the table and names the change needed; it does
//! no I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::MatrixError;
use crate::state::{BusId, DutChannel};

/// A DUT channel routed through a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ActivePath {
    /// Routed channel
    pub channel: DutChannel,
    /// Bus carrying it
    pub bus: BusId,
}

impl fmt::Display for ActivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.channel, self.bus)
    }
}

/// Set of active paths, at most one per channel and one per bus
#[derive(Debug, Clone, Default)]
pub struct ActivePaths {
    by_channel: BTreeMap<DutChannel, BusId>,
    by_bus: BTreeMap<BusId, DutChannel>,
}

impl ActivePaths {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active paths
    pub fn len(&self) -> usize {
        self.by_channel.len()
    }

    /// Check for no active paths
    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty()
    }

    /// Bus the channel is routed through
    pub fn bus_for(&self, channel: DutChannel) -> Option<BusId> {
        self.by_channel.get(&channel).copied()
    }

    /// Channel routed through the bus
    pub fn channel_on(&self, bus: BusId) -> Option<DutChannel> {
        self.by_bus.get(&bus).copied()
    }

    /// Check whether exactly this path is active
    pub fn contains(&self, path: ActivePath) -> bool {
        self.bus_for(path.channel) == Some(path.bus)
    }

    /// Record a path; both its channel and its bus must be free
    pub fn insert(&mut self, path: ActivePath) -> Result<(), MatrixError> {
        if let Some(bus) = self.bus_for(path.channel) {
            return Err(MatrixError::Consistency(format!(
                "cannot add {path}: {} already routed through {bus}",
                path.channel
            )));
        }
        if let Some(channel) = self.channel_on(path.bus) {
            return Err(MatrixError::Consistency(format!(
                "cannot add {path}: {} already carries {channel}",
                path.bus
            )));
        }
        self.by_channel.insert(path.channel, path.bus);
        self.by_bus.insert(path.bus, path.channel);
        Ok(())
    }

    /// Drop a path; returns whether it was present
    pub fn remove(&mut self, path: ActivePath) -> bool {
        if !self.contains(path) {
            return false;
        }
        self.by_channel.remove(&path.channel);
        self.by_bus.remove(&path.bus);
        true
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.by_channel.clear();
        self.by_bus.clear();
    }

    /// Active paths in channel order
    pub fn iter(&self) -> impl Iterator<Item = ActivePath> + '_ {
        self.by_channel
            .iter()
            .map(|(&channel, &bus)| ActivePath { channel, bus })
    }

    /// Check that both directions of the map agree
    pub fn check_consistency(&self) -> Result<(), MatrixError> {
        if self.by_channel.len() != self.by_bus.len() {
            return Err(MatrixError::Consistency(format!(
                "{} channel entries but {} bus entries",
                self.by_channel.len(),
                self.by_bus.len()
            )));
        }
        for (&channel, &bus) in &self.by_channel {
            if self.by_bus.get(&bus) != Some(&channel) {
                return Err(MatrixError::Consistency(format!(
                    "{channel} maps to {bus} but {bus} does not map back"
                )));
            }
        }
        Ok(())
    }
}

/// Change needed to satisfy a path request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathChange {
    /// The requested path is already active
    NoChange,
    /// The bus carries another channel and the channel is on another bus
    BothChange {
        /// Channel currently on the requested bus
        stale_channel: DutChannel,
        /// Bus currently carrying the requested channel
        stale_bus: BusId,
    },
    /// Only the bus is taken, by another channel
    InputChange {
        /// Channel currently on the requested bus
        stale_channel: DutChannel,
    },
    /// Only the channel is taken, on another bus
    LoadBankChange {
        /// Bus currently carrying the requested channel
        stale_bus: BusId,
    },
    /// Neither side is in use
    NewPath,
}

impl PathChange {
    /// Paths that must be torn down before the request can be installed
    pub fn stale_paths(&self, request: ActivePath) -> Vec<ActivePath> {
        match *self {
            PathChange::NoChange | PathChange::NewPath => Vec::new(),
            PathChange::BothChange {
                stale_channel,
                stale_bus,
            } => vec![
                ActivePath {
                    channel: stale_channel,
                    bus: request.bus,
                },
                ActivePath {
                    channel: request.channel,
                    bus: stale_bus,
                },
            ],
            PathChange::InputChange { stale_channel } => vec![ActivePath {
                channel: stale_channel,
                bus: request.bus,
            }],
            PathChange::LoadBankChange { stale_bus } => vec![ActivePath {
                channel: request.channel,
                bus: stale_bus,
            }],
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PathChange::NoChange => "no change",
            PathChange::BothChange { .. } => "both change",
            PathChange::InputChange { .. } => "input change",
            PathChange::LoadBankChange { .. } => "load bank change",
            PathChange::NewPath => "new path",
        }
    }
}

/// Decide what change `request` needs against `paths`
///
/// The lookups cover every combination of "channel routed / not routed" and
/// "bus taken / free"; the only failure is a table whose two directions
/// disagree about the requested channel or bus.
pub fn classify(paths: &ActivePaths, request: ActivePath) -> Result<PathChange, MatrixError> {
    let channel_route = paths.bus_for(request.channel);
    let bus_holder = paths.channel_on(request.bus);

    match (channel_route, bus_holder) {
        (Some(bus), Some(channel)) if bus == request.bus && channel == request.channel => {
            Ok(PathChange::NoChange)
        }
        (Some(bus), Some(channel)) if bus == request.bus || channel == request.channel => {
            Err(MatrixError::Consistency(format!(
                "{} routes to {bus} but {} carries {channel}",
                request.channel, request.bus
            )))
        }
        (Some(bus), None) if bus == request.bus => Err(MatrixError::Consistency(format!(
            "{} routes to {bus} but {bus} carries nothing",
            request.channel
        ))),
        (None, Some(channel)) if channel == request.channel => {
            Err(MatrixError::Consistency(format!(
                "{} carries {channel} but {channel} has no route",
                request.bus
            )))
        }
        (Some(stale_bus), Some(stale_channel)) => Ok(PathChange::BothChange {
            stale_channel,
            stale_bus,
        }),
        (None, Some(stale_channel)) => Ok(PathChange::InputChange { stale_channel }),
        (Some(stale_bus), None) => Ok(PathChange::LoadBankChange { stale_bus }),
        (None, None) => Ok(PathChange::NewPath),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(channel: u8, bus: u8) -> ActivePath {
        ActivePath {
            channel: DutChannel(channel),
            bus: BusId(bus),
        }
    }

    fn table(entries: &[(u8, u8)]) -> ActivePaths {
        let mut paths = ActivePaths::new();
        for &(c, b) in entries {
            paths.insert(path(c, b)).unwrap();
        }
        paths
    }

    #[test]
    fn test_insert_rejects_shared_channel_or_bus() {
        let mut paths = table(&[(0, 0)]);
        assert!(paths.insert(path(0, 1)).is_err());
        assert!(paths.insert(path(1, 0)).is_err());
        assert_eq!(paths.len(), 1);
        paths.check_consistency().unwrap();
    }

    #[test]
    fn test_remove_only_exact_path() {
        let mut paths = table(&[(0, 0), (1, 1)]);
        assert!(!paths.remove(path(0, 1)));
        assert!(paths.remove(path(0, 0)));
        assert_eq!(paths.iter().collect::<Vec<_>>(), vec![path(1, 1)]);
        assert_eq!(paths.channel_on(BusId(0)), None);
    }

    #[test]
    fn test_classify_new_path() {
        let paths = table(&[(1, 1)]);
        assert_eq!(classify(&paths, path(0, 0)).unwrap(), PathChange::NewPath);
    }

    #[test]
    fn test_classify_no_change() {
        let paths = table(&[(0, 3)]);
        assert_eq!(classify(&paths, path(0, 3)).unwrap(), PathChange::NoChange);
    }

    #[test]
    fn test_classify_input_change() {
        let paths = table(&[(2, 1)]);
        assert_eq!(
            classify(&paths, path(0, 1)).unwrap(),
            PathChange::InputChange {
                stale_channel: DutChannel(2)
            }
        );
    }

    #[test]
    fn test_classify_load_bank_change() {
        let paths = table(&[(0, 0)]);
        assert_eq!(
            classify(&paths, path(0, 2)).unwrap(),
            PathChange::LoadBankChange {
                stale_bus: BusId(0)
            }
        );
    }

    #[test]
    fn test_classify_both_change() {
        let paths = table(&[(0, 0), (1, 1)]);
        let change = classify(&paths, path(0, 1)).unwrap();
        assert_eq!(
            change,
            PathChange::BothChange {
                stale_channel: DutChannel(1),
                stale_bus: BusId(0)
            }
        );
        assert_eq!(change.stale_paths(path(0, 1)), vec![path(1, 1), path(0, 0)]);
    }

    #[test]
    fn test_digit_prefixes_do_not_collide() {
        // Channel 1 and channel 10 must never be confused
        let paths = table(&[(10, 1), (1, 10)]);
        assert_eq!(classify(&paths, path(1, 10)).unwrap(), PathChange::NoChange);
        assert_eq!(classify(&paths, path(10, 1)).unwrap(), PathChange::NoChange);
        assert_eq!(classify(&paths, path(11, 11)).unwrap(), PathChange::NewPath);
    }

    #[test]
    fn test_stale_paths_for_single_sided_changes() {
        let request = path(0, 1);
        assert_eq!(
            PathChange::InputChange {
                stale_channel: DutChannel(3)
            }
            .stale_paths(request),
            vec![path(3, 1)]
        );
        assert_eq!(
            PathChange::LoadBankChange {
                stale_bus: BusId(4)
            }
            .stale_paths(request),
            vec![path(0, 4)]
        );
        assert!(PathChange::NewPath.stale_paths(request).is_empty());
    }
}
