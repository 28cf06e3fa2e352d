//! Simulated radio and sensor for running the sniffer on the host.
//!
//! The simulated radio tracks the tuned channel and promiscuous state with
//! atomics. [`FrameGenerator`] plays the part of the air: a fixed population
//! of access points and stations, each parked on one channel, emitting
//! beacons, data frames and ACKs in the same buffer layout the ESP32 driver
//! delivers (metadata header followed by the frame).

use crate::climate::{ClimateReading, ClimateSensor};
use crate::config::{FIRST_CHANNEL, LAST_CHANNEL};
use crate::frame::RX_METADATA_LEN;
use crate::radio::{Radio, RadioError};
use crate::registry::MacAddress;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct RadioState {
    channel: AtomicU8,
    promiscuous: AtomicBool,
    available: AtomicBool,
}

/// Host stand-in for the WiFi radio. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    state: Arc<RadioState>,
}

impl SimulatedRadio {
    /// Create a radio on channel 1 with promiscuous delivery off.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RadioState {
                channel: AtomicU8::new(FIRST_CHANNEL),
                promiscuous: AtomicBool::new(false),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Currently tuned channel.
    pub fn channel(&self) -> u8 {
        self.state.channel.load(Ordering::Acquire)
    }

    /// True if frames should be delivered.
    pub fn is_promiscuous(&self) -> bool {
        self.state.promiscuous.load(Ordering::Acquire)
    }

    /// Turn the radio off; further control calls fail.
    pub fn shutdown(&self) {
        self.state.promiscuous.store(false, Ordering::Release);
        self.state.available.store(false, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), RadioError> {
        if self.state.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RadioError::Unavailable("radio shut down"))
        }
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimulatedRadio {
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        self.check_available()?;
        if !(FIRST_CHANNEL..=LAST_CHANNEL).contains(&channel) {
            return Err(RadioError::InvalidChannel(channel));
        }
        self.state.channel.store(channel, Ordering::Release);
        Ok(())
    }

    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.check_available()?;
        self.state.promiscuous.store(enabled, Ordering::Release);
        Ok(())
    }
}

/// Role of a simulated transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends beacons.
    AccessPoint,
    /// Sends data frames (and is ACKed).
    Station,
}

/// One simulated transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmitter {
    /// Source address.
    pub address: MacAddress,
    /// Channel it transmits on.
    pub channel: u8,
    /// Role.
    pub role: Role,
    /// Typical signal strength.
    pub rssi: i8,
}

/// Deterministic source of promiscuous buffers.
#[derive(Debug, Clone)]
pub struct FrameGenerator {
    population: Vec<Transmitter>,
    rng_state: u32,
}

impl FrameGenerator {
    /// Build a population of `access_points` and `stations` spread across
    /// channels 1-13.
    pub fn new(access_points: usize, stations: usize, seed: u32) -> Self {
        let mut generator = Self {
            population: Vec::with_capacity(access_points + stations),
            rng_state: if seed == 0 { 1 } else { seed },
        };

        for i in 0..access_points + stations {
            let role = if i < access_points {
                Role::AccessPoint
            } else {
                Role::Station
            };
            let index = i as u16;
            let address = MacAddress::new([
                0x02,
                0x5E,
                if role == Role::AccessPoint { 0xA0 } else { 0x5A },
                generator.next_random() as u8,
                (index >> 8) as u8,
                index as u8,
            ]);
            let channel = FIRST_CHANNEL + (generator.next_random() % u32::from(LAST_CHANNEL)) as u8;
            let rssi = -30 - (generator.next_random() % 60) as i8;
            generator.population.push(Transmitter {
                address,
                channel,
                role,
                rssi,
            });
        }

        generator
    }

    /// The simulated population.
    pub fn population(&self) -> &[Transmitter] {
        &self.population
    }

    /// Next buffer heard on `channel`, or `None` if the channel is silent.
    pub fn next_buffer(&mut self, channel: u8) -> Option<Vec<u8>> {
        let on_channel: Vec<Transmitter> = self
            .population
            .iter()
            .filter(|t| t.channel == channel)
            .copied()
            .collect();
        if on_channel.is_empty() {
            return None;
        }

        let pick = self.next_random() as usize % on_channel.len();
        let sender = on_channel[pick];
        let jitter = (self.next_random() % 7) as i8 - 3;
        let rssi = sender.rssi.saturating_add(jitter);

        let frame = match sender.role {
            Role::AccessPoint => beacon(sender.address),
            // One in four station transmissions is the ACK we see instead
            Role::Station if self.next_random() % 4 == 0 => ack(sender.address),
            Role::Station => data(sender.address),
        };

        Some(wrap(&frame, rssi, channel))
    }

    /// Linear congruential step (Numerical Recipes constants).
    ///
    /// Only the high 16 bits are returned; the low bits of an LCG cycle with
    /// short periods.
    fn next_random(&mut self) -> u32 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(1664525)
            .wrapping_add(1013904223);
        self.rng_state >> 16
    }
}

fn header_frame(fc: [u8; 2], source: MacAddress) -> Vec<u8> {
    let mut frame = vec![0u8; 24];
    frame[..2].copy_from_slice(&fc);
    frame[4..10].copy_from_slice(&[0xFF; 6]);
    frame[10..16].copy_from_slice(&source.octets());
    frame[16..22].copy_from_slice(&source.octets());
    frame
}

fn beacon(source: MacAddress) -> Vec<u8> {
    let mut frame = header_frame([0x80, 0x00], source);
    // Timestamp, interval, capabilities, empty SSID tag
    frame.extend_from_slice(&[0; 8]);
    frame.extend_from_slice(&[0x64, 0x00, 0x01, 0x04, 0x00, 0x00]);
    frame
}

fn data(source: MacAddress) -> Vec<u8> {
    let mut frame = header_frame([0x08, 0x01], source);
    frame.extend_from_slice(&[0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00]);
    frame
}

fn ack(receiver: MacAddress) -> Vec<u8> {
    let mut frame = vec![0xD4, 0x00, 0x00, 0x00];
    frame.extend_from_slice(&receiver.octets());
    frame
}

/// Prefix a frame with the radio metadata header.
pub fn wrap(frame: &[u8], rssi: i8, channel: u8) -> Vec<u8> {
    let mut buffer = vec![0u8; RX_METADATA_LEN];
    buffer[0] = rssi as u8;
    buffer[10] = channel & 0x0F;
    let len = (frame.len() as u32 & 0x0FFF).to_le_bytes();
    buffer[24..28].copy_from_slice(&len);
    buffer.extend_from_slice(frame);
    buffer
}

/// Climate sensor returning a slow drift, failing every `fail_every` reads.
#[derive(Debug, Clone)]
pub struct SimulatedClimate {
    reads: u32,
    fail_every: Option<u32>,
}

impl SimulatedClimate {
    /// Create a sensor. `fail_every = Some(n)` makes every n-th read fail.
    pub fn new(fail_every: Option<u32>) -> Self {
        Self {
            reads: 0,
            fail_every,
        }
    }
}

impl ClimateSensor for SimulatedClimate {
    fn read(&mut self) -> ClimateReading {
        self.reads += 1;
        if let Some(n) = self.fail_every {
            if n > 0 && self.reads % n == 0 {
                return ClimateReading::FAILED;
            }
        }
        let step = (self.reads % 20) as f32;
        ClimateReading {
            temperature: 21.0 + step * 0.1,
            humidity: 40.0 + step,
        }
    }
}
