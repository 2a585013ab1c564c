//! Error types for relay access

use thiserror::Error;

use crate::RelayAddress;

/// Errors reported by relay implementations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// A write to the relay hardware failed
    #[error("relay {address} write failed: {reason}")]
    Hardware {
        /// Relay that failed
        address: RelayAddress,
        /// Driver-supplied description
        reason: String,
    },

    /// The driver cannot reach or open the relay
    #[error("relay {address} unavailable: {reason}")]
    Unavailable {
        /// Relay that could not be opened
        address: RelayAddress,
        /// Driver-supplied description
        reason: String,
    },
}

impl RelayError {
    /// Address of the relay this error concerns
    pub fn address(&self) -> &RelayAddress {
        match self {
            Self::Hardware { address, .. } | Self::Unavailable { address, .. } => address,
        }
    }
}
