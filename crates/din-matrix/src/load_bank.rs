//! Load bank: the relays behind a bus

use din_relay::{Relay, RelayAddress, RelayFactory, RelayState};
use tracing::debug;

use crate::error::{ConfigError, MatrixError};
use crate::state::{BusId, LoadMask};

/// A bank of load relays, indexed `0..num_loads`
///
/// All access goes through `&mut self`, and the matrix holds its lock across
/// every call, so a reader never sees a half-applied mask.
pub struct LoadBank {
    bus: BusId,
    alias: String,
    relays: Vec<Box<dyn Relay>>,
}

impl LoadBank {
    /// Create a bank of `num_loads` relays at `device_address`
    ///
    /// Load `i` is relay output `i` of the device. Every relay is written off
    /// before the bank is returned.
    pub fn new(
        bus: BusId,
        alias: impl Into<String>,
        device_address: &str,
        num_loads: usize,
        factory: &dyn RelayFactory,
    ) -> Result<Self, MatrixError> {
        if num_loads == 0 || num_loads > LoadMask::MAX_LOADS {
            return Err(ConfigError::Invalid(format!(
                "{bus}: load bank must have 1..={} loads, got {num_loads}",
                LoadMask::MAX_LOADS
            ))
            .into());
        }

        let mut relays = Vec::with_capacity(num_loads);
        for index in 0..num_loads {
            // Bounded by MAX_LOADS above
            let mut relay = factory.create(RelayAddress::new(device_address, index as u8))?;
            relay.turn_off()?;
            relays.push(relay);
        }

        let alias = alias.into();
        debug!("Created load bank {} with {} loads for {}", alias, num_loads, bus);

        Ok(Self { bus, alias, relays })
    }

    /// Bus this bank belongs to
    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// Display alias
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Number of loads in the bank
    pub fn num_loads(&self) -> usize {
        self.relays.len()
    }

    fn check_index(&self, load: usize) -> Result<(), MatrixError> {
        if load >= self.relays.len() {
            return Err(MatrixError::UnknownLoad {
                bus: self.bus,
                load,
                num_loads: self.relays.len(),
            });
        }
        Ok(())
    }

    /// Switch a single load
    pub fn set_load_state(&mut self, load: usize, state: RelayState) -> Result<(), MatrixError> {
        self.check_index(load)?;
        self.relays[load].set_state(state)?;
        Ok(())
    }

    /// Read a single load
    pub fn get_load_state(&self, load: usize) -> Result<RelayState, MatrixError> {
        self.check_index(load)?;
        Ok(self.relays[load].state())
    }

    /// Reject a mask that selects loads the bank does not have
    pub fn check_mask(&self, mask: LoadMask) -> Result<(), MatrixError> {
        let extra = mask.bits() & !self.exists_mask().bits();
        if extra != 0 {
            return Err(MatrixError::UnknownLoad {
                bus: self.bus,
                load: extra.trailing_zeros() as usize,
                num_loads: self.relays.len(),
            });
        }
        Ok(())
    }

    /// Replace the whole bank state: load `i` on iff bit `i` of `mask`
    ///
    /// A mask with bits at or above `num_loads` is rejected before anything
    /// is written. Stops at the first failed write.
    pub fn apply_mask(&mut self, mask: LoadMask) -> Result<(), MatrixError> {
        self.check_mask(mask)?;
        debug!("{}: applying load mask {}", self.alias, mask);
        for (index, relay) in self.relays.iter_mut().enumerate() {
            relay.set_state(RelayState::from_bool(mask.contains(index)))?;
        }
        Ok(())
    }

    /// Switch every load off
    pub fn clear(&mut self) -> Result<(), MatrixError> {
        self.apply_mask(LoadMask::NONE)
    }

    /// Aggregate mask of loads currently on
    pub fn mask(&self) -> LoadMask {
        self.relays
            .iter()
            .enumerate()
            .fold(LoadMask::NONE, |mask, (index, relay)| {
                mask.with(index, relay.state().is_on())
            })
    }

    /// Mask with one bit per populated load
    pub fn exists_mask(&self) -> LoadMask {
        LoadMask::all(self.relays.len())
    }
}

impl std::fmt::Debug for LoadBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBank")
            .field("bus", &self.bus)
            .field("alias", &self.alias)
            .field("num_loads", &self.relays.len())
            .field("mask", &self.mask())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use din_sim::{Fault, SimRack};

    const IP: &str = "10.20.0.10";

    fn bank(rack: &SimRack, num_loads: usize) -> LoadBank {
        LoadBank::new(BusId(0), "dinloadbank0", IP, num_loads, rack).unwrap()
    }

    #[test]
    fn test_new_bank_writes_all_off() {
        let rack = SimRack::new();
        let bank = bank(&rack, 8);

        assert_eq!(bank.num_loads(), 8);
        assert_eq!(rack.journal().len(), 8);
        assert!(rack.on_relays().is_empty());
        assert_eq!(bank.mask(), LoadMask::NONE);
        assert_eq!(bank.exists_mask(), LoadMask(0xFF));
    }

    #[test]
    fn test_apply_mask_replaces_state() {
        let rack = SimRack::new();
        let mut bank = bank(&rack, 8);

        bank.apply_mask(LoadMask(0x83)).unwrap();
        assert_eq!(bank.mask(), LoadMask(0x83));

        bank.apply_mask(LoadMask(0x04)).unwrap();
        assert_eq!(bank.mask(), LoadMask(0x04));
        assert_eq!(rack.on_relays(), vec![RelayAddress::new(IP, 2)]);
    }

    #[test]
    fn test_apply_mask_rejects_missing_loads() {
        let rack = SimRack::new();
        let mut bank = bank(&rack, 4);
        bank.apply_mask(LoadMask(0x03)).unwrap();
        let mark = rack.next_seq();

        assert!(matches!(
            bank.apply_mask(LoadMask(0xF1)),
            Err(MatrixError::UnknownLoad { load: 4, num_loads: 4, .. })
        ));
        assert!(rack.journal_since(mark).is_empty());
        assert_eq!(bank.mask(), LoadMask(0x03));
    }

    #[test]
    fn test_full_width_bank_accepts_every_bit() {
        let rack = SimRack::new();
        let mut bank = bank(&rack, 32);
        bank.apply_mask(LoadMask(u32::MAX)).unwrap();
        assert_eq!(bank.mask(), LoadMask(u32::MAX));
    }

    #[test]
    fn test_single_load_switching() {
        let rack = SimRack::new();
        let mut bank = bank(&rack, 4);

        bank.set_load_state(3, RelayState::On).unwrap();
        assert_eq!(bank.get_load_state(3).unwrap(), RelayState::On);
        assert_eq!(bank.mask(), LoadMask(0x08));

        bank.set_load_state(3, RelayState::Off).unwrap();
        assert_eq!(bank.mask(), LoadMask::NONE);
    }

    #[test]
    fn test_out_of_range_load() {
        let rack = SimRack::new();
        let mut bank = bank(&rack, 4);

        assert!(matches!(
            bank.set_load_state(4, RelayState::On),
            Err(MatrixError::UnknownLoad { load: 4, num_loads: 4, .. })
        ));
        assert!(bank.get_load_state(9).is_err());
    }

    #[test]
    fn test_bank_size_limits() {
        let rack = SimRack::new();
        assert!(LoadBank::new(BusId(0), "empty", IP, 0, &rack).is_err());
        assert!(LoadBank::new(BusId(0), "huge", IP, 33, &rack).is_err());
        assert!(LoadBank::new(BusId(0), "max", IP, 32, &rack).is_ok());
    }

    #[test]
    fn test_hardware_failure_propagates() {
        let rack = SimRack::new();
        let mut bank = bank(&rack, 4);
        rack.inject_fault(RelayAddress::new(IP, 1), Fault::Always);

        let err = bank.apply_mask(LoadMask(0x0F)).unwrap_err();
        assert!(matches!(err, MatrixError::Hardware(_)));
        // Load 0 was written before the failure
        assert_eq!(bank.mask(), LoadMask(0x01));
    }
}
