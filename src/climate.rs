//! Temperature/humidity polling.
//!
//! The sensor read is bit-banged and timing sensitive, so reception is paused
//! for its duration using the same gate as the sweep transaction.

use crate::radio::Radio;
use crate::sniffer::Sniffer;
use log::{debug, warn};
use std::fmt;
use std::io::Write;

/// Sensor name reported in the climate line.
pub const CLIMATE_SENSOR_NAME: &str = "dht11";

/// One sensor sample. Either value is NaN when the sensor failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
}

impl ClimateReading {
    /// A failed read.
    pub const FAILED: Self = Self {
        temperature: f32::NAN,
        humidity: f32::NAN,
    };

    /// True if both values are usable.
    pub fn is_valid(&self) -> bool {
        !self.temperature.is_nan() && !self.humidity.is_nan()
    }
}

/// Serial line for a reading.
impl fmt::Display for ClimateReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "DHT11 not found!!!");
        }
        write!(
            f,
            "{{'sensor': '{}', 'humid': {:.6}, 'temp': {:.6}}}",
            CLIMATE_SENSOR_NAME, self.humidity, self.temperature
        )
    }
}

/// DHT11 read failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The line did not change level in time.
    Timeout,
    /// The data line could not be driven.
    Bus,
    /// Checksum byte did not match the data bytes.
    Checksum {
        /// Sum of the four data bytes.
        expected: u8,
        /// Checksum byte received.
        actual: u8,
    },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "sensor timed out"),
            Self::Bus => write!(f, "data line unavailable"),
            Self::Checksum { expected, actual } => write!(
                f,
                "checksum mismatch: expected {:#04x}, got {:#04x}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for SensorError {}

/// Decode the 5-byte DHT11 frame: humidity integral/decimal, temperature
/// integral/decimal (bit 7 is the sign), checksum.
pub fn decode_dht11(bytes: [u8; 5]) -> Result<ClimateReading, SensorError> {
    let [h_int, h_dec, t_int, t_dec, checksum] = bytes;
    let expected = h_int
        .wrapping_add(h_dec)
        .wrapping_add(t_int)
        .wrapping_add(t_dec);
    if expected != checksum {
        return Err(SensorError::Checksum {
            expected,
            actual: checksum,
        });
    }

    let humidity = f32::from(h_int) + f32::from(h_dec) * 0.1;
    let magnitude = f32::from(t_int) + f32::from(t_dec & 0x7F) * 0.1;
    let temperature = if t_dec & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };

    Ok(ClimateReading {
        temperature,
        humidity,
    })
}

/// Something that yields temperature and humidity.
pub trait ClimateSensor {
    /// Take one sample. Failures are reported as NaN values.
    fn read(&mut self) -> ClimateReading;
}

/// Pause reception, sample the sensor, write the line, resume reception.
pub fn poll_climate<R, S, W>(sniffer: &Sniffer, radio: &mut R, sensor: &mut S, out: &mut W)
where
    R: Radio,
    S: ClimateSensor + ?Sized,
    W: Write,
{
    let reading = {
        let _pause = sniffer.pause(radio);
        sensor.read()
    };
    debug!("Climate reading: {:?}", reading);

    let result = writeln!(out, "{}", reading).and_then(|_| out.flush());
    if let Err(e) = result {
        warn!("Failed to write climate reading: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::{RadioCall, RecordingRadio};
    use crate::stats::SnifferStats;
    use std::sync::Arc;

    struct FixedSensor(ClimateReading, Option<Arc<Sniffer>>);

    impl ClimateSensor for FixedSensor {
        fn read(&mut self) -> ClimateReading {
            if let Some(sniffer) = &self.1 {
                assert!(!sniffer.is_receiving(), "read while receiving");
            }
            self.0
        }
    }

    #[test]
    fn test_reading_line() {
        let reading = ClimateReading {
            temperature: 21.0,
            humidity: 45.0,
        };
        assert_eq!(
            reading.to_string(),
            "{'sensor': 'dht11', 'humid': 45.000000, 'temp': 21.000000}"
        );
    }

    #[test]
    fn test_nan_reading_line() {
        assert_eq!(ClimateReading::FAILED.to_string(), "DHT11 not found!!!");

        let half = ClimateReading {
            temperature: 20.0,
            humidity: f32::NAN,
        };
        assert!(!half.is_valid());
        assert_eq!(half.to_string(), "DHT11 not found!!!");
    }

    #[test]
    fn test_decode_dht11() {
        let reading = decode_dht11([45, 0, 23, 4, 72]).unwrap();
        assert_eq!(reading.humidity, 45.0);
        assert!((reading.temperature - 23.4).abs() < 1e-4);
    }

    #[test]
    fn test_decode_dht11_negative() {
        let reading = decode_dht11([30, 0, 2, 0x85, 0xA5]).unwrap();
        assert!((reading.temperature + 2.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_dht11_checksum() {
        assert_eq!(
            decode_dht11([45, 0, 23, 0, 0]),
            Err(SensorError::Checksum {
                expected: 68,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_dht11_checksum_wraps() {
        // 200 + 100 = 300, truncated to 44
        assert!(decode_dht11([200, 0, 100, 0, 44]).is_ok());
    }

    #[test]
    fn test_sensor_error_display() {
        assert_eq!(SensorError::Timeout.to_string(), "sensor timed out");
        assert_eq!(
            SensorError::Checksum {
                expected: 0x44,
                actual: 0x01
            }
            .to_string(),
            "checksum mismatch: expected 0x44, got 0x01"
        );
    }

    #[test]
    fn test_poll_pauses_reception() {
        let sniffer = Arc::new(Sniffer::new(Arc::new(SnifferStats::new())));
        let mut radio = RecordingRadio::new();
        let mut sensor = FixedSensor(
            ClimateReading {
                temperature: 19.5,
                humidity: 60.25,
            },
            Some(sniffer.clone()),
        );
        let mut out = Vec::new();

        poll_climate(&sniffer, &mut radio, &mut sensor, &mut out);

        assert!(sniffer.is_receiving());
        assert_eq!(
            radio.calls(),
            vec![RadioCall::Promiscuous(false), RadioCall::Promiscuous(true)]
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{'sensor': 'dht11', 'humid': 60.250000, 'temp': 19.500000}\n"
        );
    }
}
