//! Events emitted by the matrix
//!
//! The matrix buffers events as it works; a dispatcher or test drains them
//! with [`Matrix::drain_events`](crate::Matrix::drain_events).

use din_relay::RelayAddress;
use serde::Serialize;

use crate::paths::{ActivePath, PathChange};
use crate::state::{BusId, LoadMask};

/// Matrix activity
///
/// Serializes as `{"kind": "...", ...}` for log shipping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatrixEvent {
    /// The registry was applied
    Configured {
        /// Number of DUT channels
        channels: usize,
        /// Number of buses
        buses: usize,
    },

    /// A path request was classified
    PathRequested {
        /// Requested path
        path: ActivePath,
        /// Requested load mask
        mask: LoadMask,
        /// Classification result
        change: PathChange,
    },

    /// A channel was routed through a bus
    PathEstablished {
        /// New path
        path: ActivePath,
        /// Mask applied to the bus's loads
        mask: LoadMask,
    },

    /// A path was torn down and its bus opened
    PathRetired {
        /// Removed path
        path: ActivePath,
    },

    /// A bus's load mask was replaced
    LoadsApplied {
        /// Bus whose loads changed
        bus: BusId,
        /// New mask
        mask: LoadMask,
    },

    /// A relay write failed
    HardwareFault {
        /// Relay that failed, when known
        address: Option<RelayAddress>,
        /// Error message
        message: String,
        /// Whether compensating writes were attempted
        compensated: bool,
    },
}

impl MatrixEvent {
    /// Check if this event changed the path table
    pub fn is_path_change(&self) -> bool {
        matches!(
            self,
            MatrixEvent::PathEstablished { .. } | MatrixEvent::PathRetired { .. }
        )
    }

    /// Bus the event concerns, if any
    pub fn bus(&self) -> Option<BusId> {
        match self {
            MatrixEvent::PathRequested { path, .. }
            | MatrixEvent::PathEstablished { path, .. }
            | MatrixEvent::PathRetired { path } => Some(path.bus),
            MatrixEvent::LoadsApplied { bus, .. } => Some(*bus),
            MatrixEvent::Configured { .. } | MatrixEvent::HardwareFault { .. } => None,
        }
    }
}
