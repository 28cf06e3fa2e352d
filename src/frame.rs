//! 802.11 frame classification and promiscuous-buffer metadata parsing.
//!
//! The radio hands us a buffer that starts with a fixed-size metadata header
//! (signal strength, channel, captured length) followed by the raw link-layer
//! frame. Both parts are decoded with explicit shifts and masks over a
//! little-endian byte layout. Nothing here depends on the in-memory layout of
//! a packed C struct.
//!
//! # Frame control layout
//!
//! | Bits (FC word) | Field    |
//! |----------------|----------|
//! | 0-1            | version  |
//! | 2-3            | type     |
//! | 4-7            | subtype  |
//! | 8-15           | flags    |
//!
//! # Example
//!
//! ```
//! use sniffer_census_esp32::frame::{classify, Classification, FrameType};
//!
//! // Beacon: FC = 0x0080, source address at offset 10
//! let mut beacon = [0u8; 24];
//! beacon[0] = 0x80;
//! beacon[10..16].copy_from_slice(&[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
//!
//! match classify(&beacon) {
//!     Classification::Frame(frame) => {
//!         assert_eq!(frame.frame_type, FrameType::Management);
//!         assert!(frame.is_infrastructure_signal());
//!     }
//!     Classification::Ignored(reason) => panic!("ignored: {:?}", reason),
//! }
//! ```

use crate::registry::MacAddress;

/// Subtype value of a beacon frame (binary 1000).
pub const SUBTYPE_BEACON: u8 = 0b1000;

/// Offset of the source address (Address 2) in management and data frames.
pub const SOURCE_ADDRESS_OFFSET: usize = 10;

/// Minimum frame length for a source address to be present.
pub const MIN_ADDRESSED_FRAME_LEN: usize = SOURCE_ADDRESS_OFFSET + 6;

/// Length of the per-packet metadata header preceding the frame (ESP32 layout).
pub const RX_METADATA_LEN: usize = 28;

/// 802.11 frame type (bits 2-3 of the frame control field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Management frames (beacons, probes, association...).
    Management,
    /// Control frames (ACK, RTS, CTS...).
    Control,
    /// Data frames.
    Data,
    /// Reserved type value 3.
    Reserved,
}

impl FrameType {
    /// Decode from the two-bit type field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Management,
            1 => Self::Control,
            2 => Self::Data,
            _ => Self::Reserved,
        }
    }
}

/// Why a buffer produced no classified frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Control frame; some (e.g. ACK) carry no source address.
    Control,
    /// Buffer too short to hold the fields we read.
    Truncated,
}

/// View of one captured frame. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedFrame {
    /// Frame type.
    pub frame_type: FrameType,
    /// 4-bit subtype.
    pub subtype: u8,
    /// Transmitter address (Address 2).
    pub source: MacAddress,
}

impl ClassifiedFrame {
    /// True for management frames and for any frame carrying the beacon
    /// subtype value.
    pub fn is_infrastructure_signal(&self) -> bool {
        self.frame_type == FrameType::Management || self.subtype == SUBTYPE_BEACON
    }
}

/// Result of classifying a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A non-control frame with a source address.
    Frame(ClassifiedFrame),
    /// Dropped without touching the registry.
    Ignored(IgnoreReason),
}

/// Read the 16-bit frame control field (byte 1 high, byte 0 low).
fn frame_control(frame: &[u8]) -> Option<u16> {
    match frame {
        [lo, hi, ..] => Some((u16::from(*hi) << 8) | u16::from(*lo)),
        _ => None,
    }
}

/// Classify a raw link-layer frame.
///
/// The source address is taken from a fixed offset. That is right for the
/// standard management and data layouts; other layouts are not validated.
pub fn classify(frame: &[u8]) -> Classification {
    let Some(fc) = frame_control(frame) else {
        return Classification::Ignored(IgnoreReason::Truncated);
    };

    let frame_type = FrameType::from_bits(((fc & 0b0000_0000_0000_1100) >> 2) as u8);
    let subtype = ((fc & 0b0000_0000_1111_0000) >> 4) as u8;

    if frame_type == FrameType::Control {
        return Classification::Ignored(IgnoreReason::Control);
    }

    let Some(bytes) = frame.get(SOURCE_ADDRESS_OFFSET..MIN_ADDRESSED_FRAME_LEN) else {
        return Classification::Ignored(IgnoreReason::Truncated);
    };
    let mut source = [0u8; 6];
    source.copy_from_slice(bytes);

    Classification::Frame(ClassifiedFrame {
        frame_type,
        subtype,
        source: MacAddress::new(source),
    })
}

/// Per-packet metadata reported by the radio.
///
/// # Byte layout (little-endian 32-bit words)
///
/// | Word | Bits  | Field                     |
/// |------|-------|---------------------------|
/// | 0    | 0-7   | RSSI (signed)             |
/// | 2    | 16-19 | channel                   |
/// | 6    | 0-11  | captured frame length     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMetadata {
    /// Signal strength in dBm.
    pub rssi: i8,
    /// Channel the frame was captured on.
    pub channel: u8,
    /// Length of the frame following the header.
    pub frame_len: u16,
}

impl RxMetadata {
    /// Parse the metadata header. Returns `None` if `header` is too short.
    pub fn parse(header: &[u8]) -> Option<Self> {
        if header.len() < RX_METADATA_LEN {
            return None;
        }
        let word = |index: usize| {
            let at = index * 4;
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };

        Some(Self {
            rssi: (word(0) & 0xFF) as u8 as i8,
            channel: ((word(2) >> 16) & 0x0F) as u8,
            frame_len: (word(6) & 0x0FFF) as u16,
        })
    }

    /// Split a full promiscuous buffer into metadata and frame.
    ///
    /// The frame slice is clamped to what the buffer actually holds.
    pub fn split(buffer: &[u8]) -> Option<(Self, &[u8])> {
        let meta = Self::parse(buffer)?;
        let body = &buffer[RX_METADATA_LEN..];
        let len = usize::from(meta.frame_len).min(body.len());
        Some((meta, &body[..len]))
    }
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use sniffer_census_esp32_macros::tap_test;

    #[tap_test]
    fn beacon_classifies_as_infrastructure() {
        let mut frame = [0u8; 24];
        frame[0] = 0x80;
        frame[10..16].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        match classify(&frame) {
            Classification::Frame(f) => {
                assert!(f.is_infrastructure_signal());
                assert_eq!(f.source.octets(), [1, 2, 3, 4, 5, 6]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tap_test]
    fn ack_is_ignored() {
        assert_eq!(
            classify(&[0xD4, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            Classification::Ignored(IgnoreReason::Control)
        );
    }

    #[tap_test]
    fn metadata_needs_full_header() {
        assert!(RxMetadata::parse(&[0u8; 4]).is_none());
    }
}
