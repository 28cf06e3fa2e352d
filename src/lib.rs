//! Passive WiFi occupancy sensor for the ESP32.
//!
//! The radio hops over channels 1-13 in promiscuous mode, records the source
//! address of every management and data frame, and after each full sweep
//! prints how many distinct devices and base stations were heard. A DHT11
//! reading is printed every few seconds between sweeps.
//!
//! Everything except [`esp`] is platform-independent and runs on the host,
//! where [`sim`] stands in for the radio and the sensor.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as sniffer_census_esp32;

pub mod climate;
pub mod config;
#[cfg(feature = "esp32")]
pub mod esp;
pub mod frame;
pub mod radio;
pub mod registry;
pub mod scheduler;
#[cfg(not(feature = "esp32"))]
pub mod sim;
pub mod sniffer;
pub mod stats;
#[cfg(feature = "tap-tests")]
pub mod testing;

pub use climate::{poll_climate, ClimateReading, ClimateSensor, SensorError};
pub use config::{ConfigError, SnifferConfig};
pub use frame::{classify, Classification, ClassifiedFrame, FrameType, RxMetadata};
pub use radio::{deliver, FrameHandler, Radio, RadioError, TickHandler};
pub use registry::{AddressRecord, MacAddress, MacRegistry, SweepReport};
pub use scheduler::{ChannelScheduler, TickOutcome};
pub use sniffer::{ReceptionPause, Sniffer};
pub use stats::{SnifferStats, StatsServer};

#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;
