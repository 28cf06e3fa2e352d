//! Per-sweep registry of transmitter addresses.
//!
//! Every accepted frame is folded into the registry: one record per source
//! address, holding the latest signal strength and channel plus a sticky
//! "seen as infrastructure" flag. At the end of a channel sweep the records
//! are counted into a [`SweepReport`] and discarded.
//!
//! # Example
//!
//! ```
//! use sniffer_census_esp32::registry::{MacAddress, MacRegistry, Observation};
//!
//! let mut registry = MacRegistry::new();
//! let ap = MacAddress::new([0x02, 0, 0, 0, 0, 1]);
//!
//! assert_eq!(registry.observe(ap, -60, 6, true), Observation::New);
//! assert_eq!(registry.observe(ap, -55, 7, false), Observation::Updated);
//!
//! let report = registry.reset_and_report();
//! assert_eq!(report.raw_infrastructure, 1);
//! assert!(registry.is_empty());
//! ```

use log::debug;
use std::fmt;

/// Sensor name reported in the sweep line. Part of the output format
/// consumed downstream; do not change.
pub const SENSOR_NAME: &str = "esp8266";

/// 6-byte link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Wrap raw address bytes.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw address bytes.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// One distinct transmitter seen during the current sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// Transmitter address (unique within the registry).
    pub address: MacAddress,
    /// Signal strength of the most recent observation.
    pub last_signal_strength: i8,
    /// Channel of the most recent observation.
    pub last_channel: u8,
    /// Set once a management/beacon frame is seen; never cleared in a sweep.
    pub is_infrastructure: bool,
}

impl fmt::Display for AddressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RSSI: {} Ch: {} Peer MAC: {}",
            self.last_signal_strength, self.last_channel, self.address
        )?;
        if self.is_infrastructure {
            write!(f, " Base Station")?;
        }
        Ok(())
    }
}

/// Outcome of [`MacRegistry::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First time this address was seen in the sweep.
    New,
    /// Existing record refreshed.
    Updated,
}

/// Counts extracted at the end of a sweep.
///
/// `devices` and `infrastructure` are the adjusted values that get reported;
/// the raw bucket sizes are kept alongside for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Reported device count: `max(raw_devices - 1, 0) / 2`.
    pub devices: u32,
    /// Reported infrastructure count: `raw_infrastructure / 2`.
    pub infrastructure: u32,
    /// Records without the infrastructure flag.
    pub raw_devices: u32,
    /// Records with the infrastructure flag.
    pub raw_infrastructure: u32,
}

impl SweepReport {
    /// Apply the reporting arithmetic to raw bucket sizes.
    ///
    /// The decrement and halving are part of the established output contract.
    pub fn from_raw(raw_devices: u32, raw_infrastructure: u32) -> Self {
        Self {
            devices: raw_devices.saturating_sub(1) / 2,
            infrastructure: raw_infrastructure / 2,
            raw_devices,
            raw_infrastructure,
        }
    }

    /// Human-readable summary line.
    pub fn summary_line(&self) -> String {
        format!(
            "Found {} devices and {} basestations",
            self.devices, self.infrastructure
        )
    }
}

/// The compatibility line: single-quoted, not valid JSON.
impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{'sensor': '{}', 'devs': {}, 'bss': {}}}",
            SENSOR_NAME, self.devices, self.infrastructure
        )
    }
}

/// Ordered, deduplicated store of the addresses seen in the current sweep.
#[derive(Debug, Default)]
pub struct MacRegistry {
    records: Vec<AddressRecord>,
}

impl MacRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the registry.
    ///
    /// Signal strength and channel are overwritten; the infrastructure flag is
    /// OR-ed in and never cleared.
    pub fn observe(
        &mut self,
        address: MacAddress,
        signal_strength: i8,
        channel: u8,
        is_infrastructure_signal: bool,
    ) -> Observation {
        if let Some(record) = self.records.iter_mut().find(|r| r.address == address) {
            record.last_signal_strength = signal_strength;
            record.last_channel = channel;
            record.is_infrastructure |= is_infrastructure_signal;
            return Observation::Updated;
        }

        self.records.push(AddressRecord {
            address,
            last_signal_strength: signal_strength,
            last_channel: channel,
            is_infrastructure: is_infrastructure_signal,
        });
        Observation::New
    }

    /// Count the records into infrastructure and device buckets, then discard
    /// them all.
    ///
    /// Callers must guarantee no `observe` runs concurrently; see
    /// [`crate::sniffer::ReceptionPause`].
    pub fn reset_and_report(&mut self) -> SweepReport {
        let mut raw_devices = 0u32;
        let mut raw_infrastructure = 0u32;

        for record in self.records.drain(..) {
            debug!("{}", record);
            if record.is_infrastructure {
                raw_infrastructure += 1;
            } else {
                raw_devices += 1;
            }
        }

        SweepReport::from_raw(raw_devices, raw_infrastructure)
    }

    /// Look up the record for an address.
    pub fn get(&self, address: &MacAddress) -> Option<&AddressRecord> {
        self.records.iter().find(|r| r.address == *address)
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[AddressRecord] {
        &self.records
    }

    /// Number of distinct addresses in the current sweep.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing has been observed since the last reset.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use sniffer_census_esp32_macros::tap_test;

    #[tap_test]
    fn registry_deduplicates() {
        let mut registry = MacRegistry::new();
        let addr = MacAddress::new([1, 2, 3, 4, 5, 6]);
        registry.observe(addr, -50, 1, false);
        registry.observe(addr, -51, 2, true);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&addr).unwrap().is_infrastructure);
    }

    #[tap_test]
    fn report_line_format() {
        let report = SweepReport::from_raw(4, 3);
        assert_eq!(
            report.to_string(),
            "{'sensor': 'esp8266', 'devs': 1, 'bss': 1}"
        );
    }

    #[tap_test]
    fn empty_sweep_reports_zero() {
        let report = MacRegistry::new().reset_and_report();
        assert_eq!((report.devices, report.infrastructure), (0, 0));
    }
}
