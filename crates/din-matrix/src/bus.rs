//! Load bus: selector relays plus a load bank
//!
//! A bus routes at most one DUT channel at a time. Each DUT channel has its
//! own selector relay on the bus; closing two of them at once would tie two
//! DUT outputs together, so every enable opens all selectors first.

use std::collections::BTreeMap;

use din_relay::{Relay, RelayAddress, RelayFactory};
use tracing::{debug, info};

use crate::config::{BusRecord, DeviceRecord};
use crate::error::MatrixError;
use crate::load_bank::LoadBank;
use crate::state::{BusId, DutChannel, LoadType, Status};

/// A switchable electrical path from one DUT channel to a load bank
pub struct Bus {
    id: BusId,
    alias: String,
    load_type: LoadType,
    selectors: BTreeMap<DutChannel, Box<dyn Relay>>,
    load_bank: LoadBank,
    status: Status,
    routed: Option<DutChannel>,
}

impl Bus {
    /// Build a bus and its load bank from the registry
    ///
    /// The selector for DUT channel `c` is output `id` of matrix device `c`:
    /// every matrix device contributes one relay per bus. All relays are
    /// written off.
    pub fn new<'a>(
        record: &BusRecord,
        devices: impl IntoIterator<Item = &'a DeviceRecord>,
        factory: &dyn RelayFactory,
    ) -> Result<Self, MatrixError> {
        let load_bank = LoadBank::new(
            record.id,
            format!("dinloadbank{}", record.id.0),
            &record.ip,
            record.num_loads,
            factory,
        )?;

        let mut selectors = BTreeMap::new();
        for device in devices {
            let mut relay = factory.create(RelayAddress::new(device.ip.clone(), record.id.0))?;
            relay.turn_off()?;
            selectors.insert(device.channel, relay);
        }

        info!(
            "Created {} ({}, {} loads, {} selectors)",
            record.alias,
            record.load_type,
            record.num_loads,
            selectors.len()
        );

        Ok(Self {
            id: record.id,
            alias: record.alias.clone(),
            load_type: record.load_type,
            selectors,
            load_bank,
            status: Status::Off,
            routed: None,
        })
    }

    /// Bus id
    pub fn id(&self) -> BusId {
        self.id
    }

    /// Display alias
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Load type wired to this bus
    pub fn load_type(&self) -> LoadType {
        self.load_type
    }

    /// Current status
    pub fn get_state(&self) -> Status {
        self.status
    }

    /// DUT channel currently routed through this bus
    pub fn routed_channel(&self) -> Option<DutChannel> {
        self.routed
    }

    /// Check whether `channel` has a selector on this bus
    pub fn has_channel(&self, channel: DutChannel) -> bool {
        self.selectors.contains_key(&channel)
    }

    /// Channels with a selector on this bus
    pub fn channels(&self) -> impl Iterator<Item = DutChannel> + '_ {
        self.selectors.keys().copied()
    }

    /// The bus's load bank
    pub fn load_bank(&self) -> &LoadBank {
        &self.load_bank
    }

    /// Mutable access to the bus's load bank
    pub fn load_bank_mut(&mut self) -> &mut LoadBank {
        &mut self.load_bank
    }

    /// Route `channel` through this bus
    ///
    /// Always opens every selector before closing the requested one, even
    /// when another channel is currently routed, so two channels are never
    /// connected at once.
    pub fn enable(&mut self, channel: DutChannel) -> Result<Status, MatrixError> {
        if !self.selectors.contains_key(&channel) {
            return Err(MatrixError::UnknownChannel {
                bus: self.id,
                channel,
            });
        }

        self.open_all()?;

        if let Some(relay) = self.selectors.get_mut(&channel) {
            relay.turn_on()?;
        }
        self.status = Status::On;
        self.routed = Some(channel);

        debug!(bus = %self.id, %channel, "bus enabled");
        Ok(Status::On)
    }

    /// Open every selector. Idempotent.
    pub fn disable(&mut self) -> Result<Status, MatrixError> {
        self.open_all()?;
        debug!(bus = %self.id, "bus disabled");
        Ok(Status::Off)
    }

    /// Open every selector in channel order
    ///
    /// The bus stays routed until the routed selector itself has been
    /// opened, so a failed write never reports a closed selector as off.
    fn open_all(&mut self) -> Result<(), MatrixError> {
        for (channel, relay) in self.selectors.iter_mut() {
            relay.turn_off()?;
            if self.routed == Some(*channel) {
                self.routed = None;
                self.status = Status::Off;
            }
        }
        self.routed = None;
        self.status = Status::Off;
        Ok(())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("load_type", &self.load_type)
            .field("status", &self.status)
            .field("routed", &self.routed)
            .field("load_bank", &self.load_bank)
            .finish()
    }
}
