//! Capability interfaces between the sniffer core and the radio driver.
//!
//! The core never talks to hardware directly. It consumes:
//! - [`Radio`]: set the channel, switch promiscuous delivery on and off
//!
//! and exposes two narrow handlers the platform wires to its callbacks:
//! - [`FrameHandler`]: receives each raw captured frame
//! - [`TickHandler`]: receives the periodic channel-hop tick

use crate::frame::{RxMetadata, RX_METADATA_LEN};
use log::error;
use std::fmt;

/// Radio control surface.
///
/// Implementations are cheap handles: the ESP32 driver is a zero-sized type
/// over global IDF calls, the host simulation shares atomics.
pub trait Radio: Send {
    /// Tune to a channel (1-13).
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError>;

    /// Enable or disable promiscuous frame delivery.
    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError>;
}

/// Receives raw frames from the radio's capture callback.
///
/// Called from the radio's callback context: must not block.
pub trait FrameHandler: Send + Sync {
    /// Handle one captured link-layer frame.
    fn on_frame(&self, frame: &[u8], rssi: i8, channel: u8);
}

/// Receives the periodic timer notification.
pub trait TickHandler: Send {
    /// Handle one tick.
    fn on_tick(&mut self);
}

/// Split a raw promiscuous buffer into metadata and frame and hand it on.
///
/// Returns `false` if the buffer is too short to carry the metadata header.
pub fn deliver<H: FrameHandler + ?Sized>(handler: &H, buffer: &[u8]) -> bool {
    match RxMetadata::split(buffer) {
        Some((meta, frame)) => {
            handler.on_frame(frame, meta.rssi, meta.channel);
            true
        }
        None => false,
    }
}

/// Check that the driver's RX header has the layout [`RxMetadata`] parses.
///
/// `header_len` is the size of the driver's metadata struct.
pub fn check_metadata_layout(header_len: usize) -> Result<(), RadioError> {
    if header_len == RX_METADATA_LEN {
        return Ok(());
    }
    error!(
        "RX metadata header is {} bytes, expected {}",
        header_len, RX_METADATA_LEN
    );
    Err(RadioError::Unavailable("unsupported RX metadata layout"))
}

/// Errors from radio control calls.
#[derive(Debug)]
pub enum RadioError {
    /// Channel outside 1-13.
    InvalidChannel(u8),
    /// Radio is not available (e.g. shut down).
    Unavailable(&'static str),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChannel(ch) => write!(f, "invalid channel: {}", ch),
            Self::Unavailable(why) => write!(f, "radio unavailable: {}", why),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for RadioError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for RadioError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording radio for tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    /// Everything the core asked the radio to do, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RadioCall {
        Channel(u8),
        Promiscuous(bool),
    }

    /// Radio double that logs calls into a shared list.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingRadio {
        pub calls: Arc<Mutex<Vec<RadioCall>>>,
        pub fail_channel: bool,
    }

    impl RecordingRadio {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<RadioCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn channels(&self) -> Vec<u8> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    RadioCall::Channel(ch) => Some(ch),
                    _ => None,
                })
                .collect()
        }
    }

    impl Radio for RecordingRadio {
        fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
            if self.fail_channel {
                return Err(RadioError::Unavailable("test failure"));
            }
            self.calls.lock().unwrap().push(RadioCall::Channel(channel));
            Ok(())
        }

        fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
            self.calls
                .lock()
                .unwrap()
                .push(RadioCall::Promiscuous(enabled));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Vec<u8>, i8, u8)>>);

    impl FrameHandler for Capture {
        fn on_frame(&self, frame: &[u8], rssi: i8, channel: u8) {
            self.0.lock().unwrap().push((frame.to_vec(), rssi, channel));
        }
    }

    #[test]
    fn test_deliver_splits_buffer() {
        let mut buffer = vec![0u8; RX_METADATA_LEN];
        buffer[0] = (-72i8) as u8;
        buffer[10] = 9; // channel, word 2 bits 16-19
        buffer[24] = 4; // frame length
        buffer.extend_from_slice(&[0x80, 0x00, 0xAA, 0xBB, 0xCC]);

        let capture = Capture::default();
        assert!(deliver(&capture, &buffer));

        let frames = capture.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], (vec![0x80, 0x00, 0xAA, 0xBB], -72, 9));
    }

    #[test]
    fn test_deliver_rejects_short_buffer() {
        let capture = Capture::default();
        assert!(!deliver(&capture, &[0u8; 8]));
        assert!(capture.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_metadata_layout_must_match() {
        assert!(check_metadata_layout(RX_METADATA_LEN).is_ok());
        assert!(matches!(
            check_metadata_layout(RX_METADATA_LEN - 4),
            Err(RadioError::Unavailable(_))
        ));
        assert!(check_metadata_layout(RX_METADATA_LEN + 4).is_err());
    }

    #[test]
    fn test_radio_error_display() {
        assert_eq!(
            RadioError::InvalidChannel(14).to_string(),
            "invalid channel: 14"
        );
        assert_eq!(
            RadioError::Unavailable("stopped").to_string(),
            "radio unavailable: stopped"
        );
    }
}
