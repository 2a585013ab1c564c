//! Relay capability
//!
//! This crate defines the small surface the load rack needs from a relay:
//! an addressable binary actuator that can be written on or off and that
//! remembers the last state it was written to.
//!
//! Concrete drivers (DIN-rail network relays, GPIO, I2C expanders) live
//! outside this workspace. They implement [`Relay`] and are handed to the
//! matrix through a [`RelayFactory`].
//!
//! # Example
//!
//! ```rust
//! use din_relay::{Relay, RelayAddress, RelayError, RelayState};
//!
//! struct Led {
//!     address: RelayAddress,
//!     state: RelayState,
//! }
//!
//! impl Relay for Led {
//!     fn address(&self) -> &RelayAddress {
//!         &self.address
//!     }
//!
//!     fn set_state(&mut self, state: RelayState) -> Result<(), RelayError> {
//!         self.state = state;
//!         Ok(())
//!     }
//!
//!     fn state(&self) -> RelayState {
//!         self.state
//!     }
//! }
//!
//! let mut led = Led {
//!     address: RelayAddress::new("10.0.0.5", 3),
//!     state: RelayState::Off,
//! };
//! led.toggle().unwrap();
//! assert!(led.state().is_on());
//! ```

pub mod error;

use std::fmt;

pub use error::RelayError;

/// Binary relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelayState {
    /// Contact open
    #[default]
    Off,
    /// Contact closed
    On,
}

impl RelayState {
    /// Build a state from a boolean (`true` is on)
    pub fn from_bool(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Check if the relay is closed
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    /// The opposite state
    pub fn inverted(&self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        Self::from_bool(on)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Physical identity of a relay: the device it hangs off and its output index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayAddress {
    /// Address of the driving device (IP address for network relay boxes)
    pub bus_address: String,
    /// Output index on that device
    pub channel_id: u8,
}

impl RelayAddress {
    /// Create a new relay address
    pub fn new(bus_address: impl Into<String>, channel_id: u8) -> Self {
        Self {
            bus_address: bus_address.into(),
            channel_id,
        }
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.bus_address, self.channel_id)
    }
}

/// An addressable on/off actuator
///
/// Writes are synchronous and may block on I/O. Implementations that talk to
/// flaky hardware are expected to do their own retrying; callers treat an
/// `Err` as final.
pub trait Relay: Send {
    /// Where this relay lives
    fn address(&self) -> &RelayAddress;

    /// Drive the relay to `state`
    fn set_state(&mut self, state: RelayState) -> Result<(), RelayError>;

    /// Last state successfully written
    fn state(&self) -> RelayState;

    /// Flip the relay
    fn toggle(&mut self) -> Result<(), RelayError> {
        let next = self.state().inverted();
        self.set_state(next)
    }

    /// Close the relay
    fn turn_on(&mut self) -> Result<(), RelayError> {
        self.set_state(RelayState::On)
    }

    /// Open the relay
    fn turn_off(&mut self) -> Result<(), RelayError> {
        self.set_state(RelayState::Off)
    }
}

impl<R: Relay + ?Sized> Relay for Box<R> {
    fn address(&self) -> &RelayAddress {
        (**self).address()
    }

    fn set_state(&mut self, state: RelayState) -> Result<(), RelayError> {
        (**self).set_state(state)
    }

    fn state(&self) -> RelayState {
        (**self).state()
    }
}

/// Creates relay handles for addresses named in the device registry
pub trait RelayFactory: Send + Sync {
    /// Open a handle to the relay at `address`
    ///
    /// The returned relay is not written; the caller decides its initial
    /// state.
    fn create(&self, address: RelayAddress) -> Result<Box<dyn Relay>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Latch {
        address: RelayAddress,
        state: RelayState,
        writes: usize,
    }

    impl Relay for Latch {
        fn address(&self) -> &RelayAddress {
            &self.address
        }

        fn set_state(&mut self, state: RelayState) -> Result<(), RelayError> {
            self.writes += 1;
            self.state = state;
            Ok(())
        }

        fn state(&self) -> RelayState {
            self.state
        }
    }

    fn latch() -> Latch {
        Latch {
            address: RelayAddress::new("192.168.1.40", 2),
            state: RelayState::Off,
            writes: 0,
        }
    }

    #[test]
    fn test_toggle_flips_state() {
        let mut relay = latch();
        relay.toggle().unwrap();
        assert_eq!(relay.state(), RelayState::On);
        relay.toggle().unwrap();
        assert_eq!(relay.state(), RelayState::Off);
        assert_eq!(relay.writes, 2);
    }

    #[test]
    fn test_turn_on_off() {
        let mut relay = latch();
        relay.turn_on().unwrap();
        assert!(relay.state().is_on());
        relay.turn_off().unwrap();
        assert!(!relay.state().is_on());
    }

    #[test]
    fn test_boxed_relay_forwards() {
        let mut relay: Box<dyn Relay> = Box::new(latch());
        relay.turn_on().unwrap();
        assert_eq!(relay.state(), RelayState::On);
        assert_eq!(relay.address().channel_id, 2);
    }

    #[test]
    fn test_state_from_bool() {
        assert_eq!(RelayState::from(true), RelayState::On);
        assert_eq!(RelayState::from_bool(false), RelayState::Off);
        assert_eq!(RelayState::On.inverted(), RelayState::Off);
    }

    #[test]
    fn test_address_display() {
        let addr = RelayAddress::new("10.1.2.3", 7);
        assert_eq!(addr.to_string(), "10.1.2.3#7");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn toggle_parity(toggles in 0usize..64) {
                let mut relay = latch();
                for _ in 0..toggles {
                    relay.toggle().unwrap();
                }
                prop_assert_eq!(relay.state().is_on(), toggles % 2 == 1);
                prop_assert_eq!(relay.writes, toggles);
            }
        }
    }
}
