//! DIN-rail Load Rack Matrix
//!
//! This crate provides the path-switching core of a lighting load test rack.
//! DUT (device under test) channels are routed onto load buses built from
//! DIN-rail relay boxes, and each bus energizes a bank of loads selected by a
//! bitmask.
//!
//! # Architecture
//!
//! - [`LoadBank`]: load relays of one bus, switched individually or by mask
//! - [`Bus`]: one selector relay per DUT channel, at most one closed, plus a
//!   load bank
//! - [`Matrix`]: owns the buses and the device registry, classifies each
//!   path request against the [`ActivePaths`] table and drives the relays
//!
//! The rack is a limited matrix: each channel maps to at most one bus and
//! each bus to at most one channel. Mixing load types on a channel can
//! destroy equipment, so stale paths are always opened before a new one is
//! closed.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use din_matrix::{BusId, DutChannel, LoadMask, Matrix, RackConfig, Status};
//! use din_sim::SimRack;
//!
//! let rack = SimRack::new();
//! let matrix = Matrix::from_config(&RackConfig::square(2, 8), Arc::new(rack)).unwrap();
//!
//! let status = matrix
//!     .set_matrix_path(DutChannel(0), BusId(1), LoadMask(0x03))
//!     .unwrap();
//! assert_eq!(status, Status::On);
//! assert_eq!(matrix.get_matrix_path(DutChannel(0)), "01 03");
//! ```

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod load_bank;
pub mod paths;
pub mod state;

pub use bus::Bus;
pub use config::{BusRecord, DeviceRecord, FailurePolicy, RackConfig, REGISTRY_BASE_NAME};
pub use engine::Matrix;
pub use error::{ConfigError, MatrixError};
pub use events::MatrixEvent;
pub use load_bank::LoadBank;
pub use paths::{classify, ActivePath, ActivePaths, PathChange};
pub use state::{BusId, DutChannel, LoadMask, LoadReport, LoadType, Status};
