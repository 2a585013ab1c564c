//! Load Rack Simulation Library
//!
//! This crate provides a simulation layer for exercising the DIN-rail matrix
//! without relay hardware. It includes:
//!
//! - **SimRack**: a shared in-memory view of every simulated relay, with a
//!   write journal and fault injection. It doubles as a `RelayFactory`.
//! - **SimRelay**: a relay handle that records its writes into the rack
//!
//! # Example
//!
//! ```rust
//! use din_relay::{Relay, RelayAddress, RelayFactory, RelayState};
//! use din_sim::SimRack;
//!
//! let rack = SimRack::new();
//! let mut relay = rack.create(RelayAddress::new("10.0.0.9", 0)).unwrap();
//!
//! relay.turn_on().unwrap();
//!
//! assert_eq!(rack.state_of(&RelayAddress::new("10.0.0.9", 0)), Some(RelayState::On));
//! assert_eq!(rack.journal().len(), 1);
//! ```

pub mod rack;

pub use rack::{Fault, RelayWrite, SimRack, SimRelay};
