//! Simulated relay rack
//!
//! Every [`SimRelay`] created from a [`SimRack`] reports into the same shared
//! state, so a test can look at the whole rack the way a logic analyser on
//! the relay outputs would: the ordered list of writes, the final state of
//! each output, and injected failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use din_relay::{Relay, RelayAddress, RelayError, RelayFactory, RelayState};
use parking_lot::Mutex;
use tracing::{trace, warn};

/// One successful relay write, in rack-wide order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayWrite {
    /// Position in the journal (starts at 0)
    pub seq: u64,
    /// Relay written
    pub address: RelayAddress,
    /// State written
    pub state: RelayState,
}

/// How an injected fault behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every write to the relay fails until faults are cleared
    Always,
    /// The next write fails, later writes succeed
    Once,
}

#[derive(Debug, Default)]
struct RackState {
    journal: Vec<RelayWrite>,
    next_seq: u64,
    states: BTreeMap<RelayAddress, RelayState>,
    faults: HashMap<RelayAddress, Fault>,
    /// Writes remaining before the next write of any relay fails
    fail_after: Option<usize>,
}

impl RackState {
    fn check_fault(&mut self, address: &RelayAddress) -> Result<(), RelayError> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                return Err(RelayError::Hardware {
                    address: address.clone(),
                    reason: "injected fault (write budget exhausted)".to_string(),
                });
            }
            *remaining -= 1;
        }

        match self.faults.get(address).copied() {
            Some(Fault::Always) => Err(RelayError::Hardware {
                address: address.clone(),
                reason: "injected fault".to_string(),
            }),
            Some(Fault::Once) => {
                self.faults.remove(address);
                Err(RelayError::Hardware {
                    address: address.clone(),
                    reason: "injected fault (once)".to_string(),
                })
            }
            None => Ok(()),
        }
    }

    fn record(&mut self, address: &RelayAddress, state: RelayState) {
        self.journal.push(RelayWrite {
            seq: self.next_seq,
            address: address.clone(),
            state,
        });
        self.next_seq += 1;
        self.states.insert(address.clone(), state);
    }
}

/// Shared view of all simulated relays
///
/// Cloning a `SimRack` yields another handle to the same rack.
#[derive(Debug, Clone, Default)]
pub struct SimRack {
    state: Arc<Mutex<RackState>>,
}

impl SimRack {
    /// Create an empty rack
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a relay handle at `address`
    ///
    /// Nothing is written; the relay reads as off until its first write.
    pub fn relay(&self, address: RelayAddress) -> SimRelay {
        SimRelay {
            address,
            state: RelayState::Off,
            rack: self.clone(),
        }
    }

    /// All successful writes so far, oldest first
    pub fn journal(&self) -> Vec<RelayWrite> {
        self.state.lock().journal.clone()
    }

    /// Writes recorded at or after position `seq`
    pub fn journal_since(&self, seq: u64) -> Vec<RelayWrite> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|w| w.seq >= seq)
            .cloned()
            .collect()
    }

    /// Sequence number the next write will get
    pub fn next_seq(&self) -> u64 {
        self.state.lock().next_seq
    }

    /// Forget recorded writes (relay states are kept)
    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Last state written to `address`, if it was ever written
    pub fn state_of(&self, address: &RelayAddress) -> Option<RelayState> {
        self.state.lock().states.get(address).copied()
    }

    /// Every relay currently on, in address order
    pub fn on_relays(&self) -> Vec<RelayAddress> {
        self.state
            .lock()
            .states
            .iter()
            .filter(|(_, s)| s.is_on())
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Make writes to `address` fail
    pub fn inject_fault(&self, address: RelayAddress, fault: Fault) {
        self.state.lock().faults.insert(address, fault);
    }

    /// Let `writes` more writes succeed, then fail the next one (any relay)
    pub fn fail_after(&self, writes: usize) {
        self.state.lock().fail_after = Some(writes);
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.fail_after = None;
    }
}

impl RelayFactory for SimRack {
    fn create(&self, address: RelayAddress) -> Result<Box<dyn Relay>, RelayError> {
        Ok(Box::new(self.relay(address)))
    }
}

/// Relay handle backed by a [`SimRack`]
#[derive(Debug)]
pub struct SimRelay {
    address: RelayAddress,
    state: RelayState,
    rack: SimRack,
}

impl Relay for SimRelay {
    fn address(&self) -> &RelayAddress {
        &self.address
    }

    fn set_state(&mut self, state: RelayState) -> Result<(), RelayError> {
        let mut rack = self.rack.state.lock();
        if let Err(e) = rack.check_fault(&self.address) {
            warn!("Simulated relay {} rejected write: {}", self.address, e);
            return Err(e);
        }
        rack.record(&self.address, state);
        trace!(relay = %self.address, %state, "relay write");
        self.state = state;
        Ok(())
    }

    fn state(&self) -> RelayState {
        self.state
    }
}
