//! Matrix engine
//!
//! Turns path requests into bus and load bank operations while keeping the
//! active path table in step with the hardware.

use std::collections::BTreeMap;
use std::sync::Arc;

use din_relay::{RelayFactory, RelayState};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::{DeviceRecord, FailurePolicy, RackConfig};
use crate::error::MatrixError;
use crate::events::MatrixEvent;
use crate::paths::{classify, ActivePath, ActivePaths, PathChange};
use crate::state::{BusId, DutChannel, LoadMask, LoadReport, LoadType, Status};

/// The DIN-rail relay matrix
///
/// Every operation takes one lock for its whole duration, covering
/// classification, the path table, bus status and all relay writes. Relay
/// writes are blocking, so a slow relay delays every other caller.
pub struct Matrix {
    factory: Arc<dyn RelayFactory>,
    inner: Mutex<MatrixInner>,
}

struct MatrixInner {
    policy: FailurePolicy,
    devices: BTreeMap<DutChannel, DeviceRecord>,
    buses: BTreeMap<BusId, Bus>,
    paths: ActivePaths,
    events: Vec<MatrixEvent>,
}

impl Matrix {
    /// Create an unconfigured matrix that opens relays through `factory`
    pub fn new(factory: Arc<dyn RelayFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(MatrixInner {
                policy: FailurePolicy::default(),
                devices: BTreeMap::new(),
                buses: BTreeMap::new(),
                paths: ActivePaths::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Create and configure in one step
    pub fn from_config(
        config: &RackConfig,
        factory: Arc<dyn RelayFactory>,
    ) -> Result<Self, MatrixError> {
        let matrix = Self::new(factory);
        matrix.configure(config)?;
        Ok(matrix)
    }

    /// Replace the device registry
    ///
    /// Opens every existing bus and clears its loads, forgets all paths, then
    /// builds the new buses with every relay written off.
    pub fn configure(&self, config: &RackConfig) -> Result<(), MatrixError> {
        config.validate()?;

        let mut inner = self.inner.lock();
        for bus in inner.buses.values_mut() {
            bus.disable()?;
            bus.load_bank_mut().clear()?;
        }
        inner.paths.clear();
        inner.buses.clear();
        inner.devices.clear();

        let mut buses = BTreeMap::new();
        for record in &config.buses {
            let bus = Bus::new(record, &config.devices, self.factory.as_ref())?;
            buses.insert(record.id, bus);
        }

        inner.devices = config
            .devices
            .iter()
            .map(|d| (d.channel, d.clone()))
            .collect();
        inner.buses = buses;
        inner.policy = config.failure_policy;

        info!(
            "Configured matrix instance {}: {} DUT channels, {} buses",
            config.instance,
            inner.devices.len(),
            inner.buses.len()
        );
        let event = MatrixEvent::Configured {
            channels: inner.devices.len(),
            buses: inner.buses.len(),
        };
        inner.events.push(event);
        Ok(())
    }

    /// Route `channel` through `bus` with `mask` selecting the loads
    ///
    /// A zero mask tears the request down instead: the channel ends up
    /// unrouted and the bus open. Returns the resulting path status.
    pub fn set_matrix_path(
        &self,
        channel: DutChannel,
        bus: BusId,
        mask: LoadMask,
    ) -> Result<Status, MatrixError> {
        self.inner.lock().set_path(ActivePath { channel, bus }, mask)
    }

    /// Route `channel` through `bus` (alias of [`Matrix::set_matrix_path`])
    pub fn set_path(
        &self,
        channel: DutChannel,
        bus: BusId,
        mask: LoadMask,
    ) -> Result<Status, MatrixError> {
        self.set_matrix_path(channel, bus, mask)
    }

    /// Bus and load mask of the channel's active path
    pub fn get_path(&self, channel: DutChannel) -> Option<(BusId, LoadMask)> {
        self.inner.lock().path_of(channel)
    }

    /// Active path of `channel` as `"BB MM"` hex, or empty when unrouted
    pub fn get_matrix_path(&self, channel: DutChannel) -> String {
        self.get_path(channel)
            .map(|(bus, mask)| format_path(bus, mask))
            .unwrap_or_default()
    }

    /// Active paths of every registered channel, space separated
    pub fn get_all_matrix_paths(&self) -> String {
        let inner = self.inner.lock();
        inner
            .devices
            .keys()
            .filter_map(|&channel| inner.path_of(channel))
            .map(|(bus, mask)| format_path(bus, mask))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Replace the load mask of a bus without touching the path table
    pub fn set_bus_loads(&self, bus: BusId, mask: LoadMask) -> Result<(), MatrixError> {
        self.inner.lock().apply_loads(bus, mask)
    }

    /// Populated and energized loads of a bus
    pub fn get_bus_loads(&self, bus: BusId) -> Result<LoadReport, MatrixError> {
        let inner = self.inner.lock();
        let bus = inner.bus(bus)?;
        Ok(load_report(bus))
    }

    /// Load reports for every bus in id order
    pub fn get_all_bus_loads(&self) -> Vec<LoadReport> {
        self.inner.lock().buses.values().map(load_report).collect()
    }

    /// State of one load relay
    pub fn get_load_state(&self, bus: BusId, load: usize) -> Result<RelayState, MatrixError> {
        self.inner.lock().bus(bus)?.load_bank().get_load_state(load)
    }

    /// Status of a bus
    pub fn bus_status(&self, bus: BusId) -> Result<Status, MatrixError> {
        Ok(self.inner.lock().bus(bus)?.get_state())
    }

    /// Load type wired to a bus
    pub fn load_type(&self, bus: BusId) -> Result<LoadType, MatrixError> {
        Ok(self.inner.lock().bus(bus)?.load_type())
    }

    /// Snapshot of the active paths in channel order
    pub fn active_paths(&self) -> Vec<ActivePath> {
        self.inner.lock().paths.iter().collect()
    }

    /// Registered DUT channels
    pub fn channels(&self) -> Vec<DutChannel> {
        self.inner.lock().devices.keys().copied().collect()
    }

    /// Configured bus ids
    pub fn bus_ids(&self) -> Vec<BusId> {
        self.inner.lock().buses.keys().copied().collect()
    }

    /// Check whether every registered channel is routed
    ///
    /// Counts paths against matrix devices, which only makes sense while
    /// channels and buses pair up 1:1.
    pub fn is_full(&self) -> bool {
        self.inner.lock().is_full()
    }

    /// Current failure policy
    pub fn failure_policy(&self) -> FailurePolicy {
        self.inner.lock().policy
    }

    /// Change the failure policy
    pub fn set_failure_policy(&self, policy: FailurePolicy) {
        self.inner.lock().policy = policy;
    }

    /// Tear down every active path
    pub fn reset(&self) -> Result<(), MatrixError> {
        let mut inner = self.inner.lock();
        let paths: Vec<ActivePath> = inner.paths.iter().collect();
        for path in paths {
            inner.retire(path)?;
        }
        Ok(())
    }

    /// Verify the path table against the buses
    ///
    /// Both directions of the table must agree, and a bus must be on exactly
    /// when a path references it, carrying that path's channel.
    pub fn check_invariants(&self) -> Result<(), MatrixError> {
        let inner = self.inner.lock();
        inner.paths.check_consistency()?;
        for (id, bus) in &inner.buses {
            let holder = inner.paths.channel_on(*id);
            if bus.get_state().is_on() != holder.is_some() || bus.routed_channel() != holder {
                return Err(MatrixError::Consistency(format!(
                    "{id} is {} routing {:?} but the path table says {:?}",
                    bus.get_state(),
                    bus.routed_channel(),
                    holder
                )));
            }
        }
        Ok(())
    }

    /// Drain pending events
    pub fn drain_events(&self) -> Vec<MatrixEvent> {
        std::mem::take(&mut self.inner.lock().events)
    }
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Matrix")
            .field("policy", &inner.policy)
            .field("devices", &inner.devices.len())
            .field("buses", &inner.buses)
            .field("paths", &inner.paths)
            .finish()
    }
}

fn format_path(bus: BusId, mask: LoadMask) -> String {
    format!("{:02X} {}", bus.0, mask)
}

fn load_report(bus: &Bus) -> LoadReport {
    LoadReport {
        bus: bus.id(),
        exists: bus.load_bank().exists_mask(),
        state: bus.load_bank().mask(),
    }
}

/// Close the bus for `channel`, then energize the loads
fn route(bus: &mut Bus, channel: DutChannel, mask: LoadMask) -> Result<(), MatrixError> {
    bus.enable(channel)?;
    bus.load_bank_mut().apply_mask(mask)
}

impl MatrixInner {
    fn bus(&self, id: BusId) -> Result<&Bus, MatrixError> {
        self.buses.get(&id).ok_or(MatrixError::UnknownBus(id))
    }

    fn bus_mut(&mut self, id: BusId) -> Result<&mut Bus, MatrixError> {
        self.buses.get_mut(&id).ok_or(MatrixError::UnknownBus(id))
    }

    fn is_full(&self) -> bool {
        self.paths.len() == self.devices.len()
    }

    fn path_of(&self, channel: DutChannel) -> Option<(BusId, LoadMask)> {
        let bus = self.paths.bus_for(channel)?;
        let mask = self.buses.get(&bus)?.load_bank().mask();
        Some((bus, mask))
    }

    fn set_path(&mut self, request: ActivePath, mask: LoadMask) -> Result<Status, MatrixError> {
        // Reject unknown ids and loads before anything is touched
        let bus = self.bus(request.bus)?;
        if !bus.has_channel(request.channel) {
            return Err(MatrixError::UnknownChannel {
                bus: request.bus,
                channel: request.channel,
            });
        }
        bus.load_bank().check_mask(mask)?;

        let change = classify(&self.paths, request)?;
        let full = self.is_full();
        debug!(
            channel = %request.channel,
            bus = %request.bus,
            %mask,
            full,
            "classified path request as {}",
            change.name()
        );
        if matches!(change, PathChange::BothChange { .. }) && !full {
            warn!(
                "{} and {} are both in use on a matrix that is not full; retiring both paths",
                request.channel, request.bus
            );
        }
        self.events.push(MatrixEvent::PathRequested {
            path: request,
            mask,
            change,
        });

        if mask.is_empty() {
            for stale in change.stale_paths(request) {
                self.retire(stale)?;
            }
            if change == PathChange::NoChange {
                self.retire(request)?;
            }
            return Ok(Status::Off);
        }

        if change == PathChange::NoChange {
            self.apply_loads(request.bus, mask)?;
            return Ok(Status::On);
        }

        for stale in change.stale_paths(request) {
            self.retire(stale)?;
        }
        self.install(request, mask)?;
        Ok(Status::On)
    }

    /// Open a path's bus, clear its loads and remove the path
    ///
    /// The path stays in the table while its selector could not be opened.
    fn retire(&mut self, path: ActivePath) -> Result<(), MatrixError> {
        let bus = self.bus_mut(path.bus)?;
        let result = match bus.disable() {
            Ok(_) => bus.load_bank_mut().clear(),
            Err(e) => Err(e),
        };
        if bus.routed_channel() != Some(path.channel) {
            self.paths.remove(path);
        }
        if let Err(e) = result {
            self.record_fault(&e, false);
            return Err(e);
        }

        info!(channel = %path.channel, bus = %path.bus, "path retired");
        self.events.push(MatrixEvent::PathRetired { path });
        Ok(())
    }

    /// Record a path, close its bus and apply the mask
    fn install(&mut self, path: ActivePath, mask: LoadMask) -> Result<(), MatrixError> {
        self.paths.insert(path)?;
        let bus = self.bus_mut(path.bus)?;
        if let Err(e) = route(bus, path.channel, mask) {
            return Err(self.handle_install_fault(path, e));
        }

        info!(channel = %path.channel, bus = %path.bus, %mask, "path established");
        self.events.push(MatrixEvent::PathEstablished { path, mask });
        self.events.push(MatrixEvent::LoadsApplied {
            bus: path.bus,
            mask,
        });
        Ok(())
    }

    fn handle_install_fault(&mut self, path: ActivePath, err: MatrixError) -> MatrixError {
        match self.policy {
            FailurePolicy::LeaveAsIs => {
                warn!("Installing {} failed, leaving relays as written: {}", path, err);
                self.record_fault(&err, false);
            }
            FailurePolicy::Compensate => {
                warn!("Installing {} failed, opening {}: {}", path, path.bus, err);
                let mut still_routed = false;
                if let Ok(bus) = self.bus_mut(path.bus) {
                    if let Err(e) = bus.disable() {
                        warn!("Compensating disable of {} failed: {}", path.bus, e);
                    }
                    if let Err(e) = bus.load_bank_mut().clear() {
                        warn!("Compensating load clear of {} failed: {}", path.bus, e);
                    }
                    still_routed = bus.routed_channel() == Some(path.channel);
                }
                if !still_routed {
                    self.paths.remove(path);
                }
                self.record_fault(&err, true);
            }
        }
        err
    }

    fn apply_loads(&mut self, id: BusId, mask: LoadMask) -> Result<(), MatrixError> {
        let bus = self.bus_mut(id)?;
        bus.load_bank().check_mask(mask)?;
        if let Err(e) = bus.load_bank_mut().apply_mask(mask) {
            self.record_fault(&e, false);
            return Err(e);
        }
        debug!(bus = %id, %mask, "loads applied");
        self.events.push(MatrixEvent::LoadsApplied { bus: id, mask });
        Ok(())
    }

    fn record_fault(&mut self, err: &MatrixError, compensated: bool) {
        let address = match err {
            MatrixError::Hardware(e) => Some(e.address().clone()),
            _ => None,
        };
        self.events.push(MatrixEvent::HardwareFault {
            address,
            message: err.to_string(),
            compensated,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use din_relay::RelayAddress;
    use din_sim::{Fault, SimRack};

    fn matrix(n: u8) -> (Matrix, SimRack) {
        let rack = SimRack::new();
        let matrix = Matrix::from_config(&RackConfig::square(n, 8), Arc::new(rack.clone())).unwrap();
        (matrix, rack)
    }

    fn set(m: &Matrix, c: u8, b: u8, mask: u32) -> Status {
        m.set_matrix_path(DutChannel(c), BusId(b), LoadMask(mask))
            .unwrap()
    }

    #[test]
    fn test_configure_builds_buses_all_off() {
        let (m, rack) = matrix(3);
        assert_eq!(m.channels().len(), 3);
        assert_eq!(m.bus_ids(), vec![BusId(0), BusId(1), BusId(2)]);
        assert!(rack.on_relays().is_empty());
        assert!(m.active_paths().is_empty());
        assert!(matches!(
            m.drain_events().as_slice(),
            [MatrixEvent::Configured { channels: 3, buses: 3 }]
        ));
    }

    #[test]
    fn test_new_path_and_lookup() {
        let (m, _rack) = matrix(2);
        assert_eq!(set(&m, 0, 1, 0x05), Status::On);
        assert_eq!(m.get_path(DutChannel(0)), Some((BusId(1), LoadMask(0x05))));
        assert_eq!(m.get_matrix_path(DutChannel(0)), "01 05");
        assert_eq!(m.get_matrix_path(DutChannel(1)), "");
        assert_eq!(m.bus_status(BusId(1)).unwrap(), Status::On);
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_zero_mask_tears_down_path() {
        let (m, rack) = matrix(2);
        set(&m, 0, 0, 0x01);
        assert_eq!(set(&m, 0, 0, 0), Status::Off);
        assert_eq!(m.get_path(DutChannel(0)), None);
        assert_eq!(m.bus_status(BusId(0)).unwrap(), Status::Off);
        assert!(rack.on_relays().is_empty());
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_zero_mask_on_idle_path_is_off() {
        let (m, rack) = matrix(2);
        let mark = rack.next_seq();
        assert_eq!(set(&m, 1, 1, 0), Status::Off);
        assert!(rack.journal_since(mark).is_empty());
        assert!(m.active_paths().is_empty());
    }

    #[test]
    fn test_zero_mask_unroutes_channel_held_elsewhere() {
        let (m, _rack) = matrix(3);
        set(&m, 0, 2, 0x03);
        assert_eq!(set(&m, 0, 1, 0), Status::Off);
        assert_eq!(m.get_matrix_path(DutChannel(0)), "");
        assert_eq!(m.bus_status(BusId(2)).unwrap(), Status::Off);
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_no_change_only_reapplies_mask() {
        let (m, rack) = matrix(2);
        set(&m, 1, 0, 0x01);
        let mark = rack.next_seq();
        set(&m, 1, 0, 0x06);

        let writes = rack.journal_since(mark);
        // Only the eight load relays of bus 0 are written
        assert_eq!(writes.len(), 8);
        assert!(writes
            .iter()
            .all(|w| w.address.bus_address == "192.168.11.10"));
        assert_eq!(m.get_path(DutChannel(1)), Some((BusId(0), LoadMask(0x06))));
    }

    #[test]
    fn test_input_change_swaps_channel() {
        let (m, _rack) = matrix(3);
        set(&m, 0, 1, 0x01);
        set(&m, 2, 1, 0x02);

        assert_eq!(m.get_path(DutChannel(0)), None);
        assert_eq!(m.get_path(DutChannel(2)), Some((BusId(1), LoadMask(0x02))));
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_load_bank_change_moves_channel() {
        let (m, _rack) = matrix(3);
        set(&m, 0, 0, 0x0F);
        set(&m, 0, 2, 0x01);

        assert_eq!(m.get_path(DutChannel(0)), Some((BusId(2), LoadMask(0x01))));
        assert_eq!(m.bus_status(BusId(0)).unwrap(), Status::Off);
        assert_eq!(m.get_bus_loads(BusId(0)).unwrap().state, LoadMask::NONE);
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_unknown_ids_leave_state_alone() {
        let (m, rack) = matrix(2);
        set(&m, 0, 0, 0x01);
        let mark = rack.next_seq();

        assert!(matches!(
            m.set_matrix_path(DutChannel(0), BusId(9), LoadMask(1)),
            Err(MatrixError::UnknownBus(BusId(9)))
        ));
        assert!(matches!(
            m.set_matrix_path(DutChannel(5), BusId(1), LoadMask(1)),
            Err(MatrixError::UnknownChannel { .. })
        ));
        assert!(rack.journal_since(mark).is_empty());
        assert_eq!(m.active_paths().len(), 1);
    }

    #[test]
    fn test_mask_beyond_bank_is_rejected() {
        let (m, rack) = matrix(2);
        set(&m, 1, 0, 0x01);
        let mark = rack.next_seq();

        let err = m
            .set_matrix_path(DutChannel(0), BusId(1), LoadMask(0x100))
            .unwrap_err();
        assert!(matches!(
            err,
            MatrixError::UnknownLoad {
                bus: BusId(1),
                load: 8,
                num_loads: 8
            }
        ));
        assert!(rack.journal_since(mark).is_empty());
        assert_eq!(m.get_path(DutChannel(0)), None);
        assert_eq!(m.active_paths().len(), 1);
        assert!(m.set_bus_loads(BusId(0), LoadMask(0x1FF)).is_err());
        assert_eq!(m.get_path(DutChannel(1)), Some((BusId(0), LoadMask(0x01))));
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_set_bus_loads_and_report() {
        let (m, _rack) = matrix(2);
        m.set_bus_loads(BusId(1), LoadMask(0x83)).unwrap();

        let report = m.get_bus_loads(BusId(1)).unwrap();
        assert_eq!(report.to_string(), "FF 83");
        assert_eq!(m.get_load_state(BusId(1), 7).unwrap(), RelayState::On);
        assert!(m.active_paths().is_empty());
        assert!(m.set_bus_loads(BusId(4), LoadMask(1)).is_err());
    }

    #[test]
    fn test_all_paths_listing() {
        let (m, _rack) = matrix(3);
        set(&m, 0, 2, 0x01);
        set(&m, 2, 0, 0x80);
        assert_eq!(m.get_all_matrix_paths(), "02 01 00 80");
        assert_eq!(m.get_all_bus_loads().len(), 3);
    }

    #[test]
    fn test_reset_retires_everything() {
        let (m, rack) = matrix(2);
        set(&m, 0, 0, 0x01);
        set(&m, 1, 1, 0x01);
        m.reset().unwrap();
        assert!(m.active_paths().is_empty());
        assert!(rack.on_relays().is_empty());
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_leave_as_is_keeps_path_on_fault() {
        let (m, rack) = matrix(2);
        rack.inject_fault(RelayAddress::new("192.168.11.11", 3), Fault::Once);

        let err = m
            .set_matrix_path(DutChannel(0), BusId(1), LoadMask(0x0F))
            .unwrap_err();
        assert!(matches!(err, MatrixError::Hardware(_)));
        assert_eq!(m.active_paths().len(), 1);
        // Loads 0..3 were written before the failure
        assert_eq!(m.get_path(DutChannel(0)), Some((BusId(1), LoadMask(0x07))));
        assert!(m.drain_events().iter().any(|e| matches!(
            e,
            MatrixEvent::HardwareFault {
                compensated: false,
                ..
            }
        )));
    }

    #[test]
    fn test_failed_teardown_keeps_path_recorded() {
        let (m, rack) = matrix(2);
        set(&m, 0, 0, 0x01);
        rack.inject_fault(RelayAddress::new("192.168.10.10", 0), Fault::Always);

        assert!(m
            .set_matrix_path(DutChannel(0), BusId(0), LoadMask::NONE)
            .is_err());
        assert_eq!(m.active_paths().len(), 1);
        assert_eq!(m.bus_status(BusId(0)).unwrap(), Status::On);
        m.check_invariants().unwrap();

        rack.clear_faults();
        assert_eq!(set(&m, 0, 0, 0), Status::Off);
        assert!(m.active_paths().is_empty());
        assert!(rack.on_relays().is_empty());
    }

    #[test]
    fn test_compensate_opens_bus_on_fault() {
        let (m, rack) = matrix(2);
        m.set_failure_policy(FailurePolicy::Compensate);
        rack.inject_fault(RelayAddress::new("192.168.11.11", 3), Fault::Once);

        assert!(m
            .set_matrix_path(DutChannel(0), BusId(1), LoadMask(0x0F))
            .is_err());
        assert!(m.active_paths().is_empty());
        assert!(rack.on_relays().is_empty());
        m.check_invariants().unwrap();
    }

    #[test]
    fn test_reconfigure_drops_paths() {
        let (m, rack) = matrix(2);
        set(&m, 0, 0, 0x01);
        m.configure(&RackConfig::square(3, 4)).unwrap();

        assert!(m.active_paths().is_empty());
        assert_eq!(m.channels().len(), 3);
        assert!(rack.on_relays().is_empty());
        assert_eq!(m.get_bus_loads(BusId(2)).unwrap().exists, LoadMask(0x0F));
    }
}
