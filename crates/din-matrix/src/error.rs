//! Error types for the matrix

use din_relay::RelayError;
use thiserror::Error;

use crate::state::{BusId, DutChannel};

/// Errors raised while loading or validating the device registry
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Registry file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry file is not valid JSON for the expected shape
    #[error("malformed registry: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry content violates a structural rule
    #[error("invalid registry: {0}")]
    Invalid(String),
}

/// Errors that can occur in the matrix
#[derive(Debug, Error)]
pub enum MatrixError {
    /// No bus with this id is configured
    #[error("unknown bus: {0}")]
    UnknownBus(BusId),

    /// The bus has no selector relay for this DUT channel
    #[error("unknown channel {channel} on {bus}")]
    UnknownChannel {
        /// Bus that was asked to route the channel
        bus: BusId,
        /// Channel with no selector relay
        channel: DutChannel,
    },

    /// Load index outside the bank
    #[error("load {load} out of range on {bus} ({num_loads} loads)")]
    UnknownLoad {
        /// Bus owning the load bank
        bus: BusId,
        /// Requested load index
        load: usize,
        /// Number of loads in the bank
        num_loads: usize,
    },

    /// A relay write failed
    #[error("hardware error: {0}")]
    Hardware(#[from] RelayError),

    /// The active path table contradicts itself
    #[error("matrix consistency error: {0}")]
    Consistency(String),

    /// Device registry problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
