//! Channel hopping and the sweep boundary.
//!
//! Each tick moves the radio to the next channel. The tick after channel 13
//! is the sweep boundary: reception is paused, the registry is counted and
//! cleared, the report is written to the serial output, the radio goes back
//! to channel 1 and reception resumes.
//!
//! # Example
//!
//! ```ignore
//! let mut scheduler = ChannelScheduler::new(radio, sniffer, std::io::stdout());
//! scheduler.start()?;
//! loop {
//!     std::thread::sleep(config.hop_interval);
//!     scheduler.on_tick();
//! }
//! ```

use crate::config::{FIRST_CHANNEL, LAST_CHANNEL};
use crate::radio::{Radio, RadioError, TickHandler};
use crate::registry::SweepReport;
use crate::sniffer::Sniffer;
use log::{debug, error, info, warn};
use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Moved to the given channel.
    Hopped(u8),
    /// Completed a sweep and returned to channel 1.
    Swept(SweepReport),
}

/// Periodic channel hopper driving the sweep reset/report transaction.
pub struct ChannelScheduler<R: Radio, W: Write> {
    radio: R,
    sniffer: Arc<Sniffer>,
    out: W,
    channel: u8,
}

impl<R: Radio, W: Write> ChannelScheduler<R, W> {
    /// Create a scheduler on channel 1. Reports are written to `out`.
    pub fn new(radio: R, sniffer: Arc<Sniffer>, out: W) -> Self {
        Self {
            radio,
            sniffer,
            out,
            channel: FIRST_CHANNEL,
        }
    }

    /// Tune to channel 1 and enable promiscuous delivery.
    pub fn start(&mut self) -> Result<(), RadioError> {
        self.channel = FIRST_CHANNEL;
        self.radio.set_channel(FIRST_CHANNEL)?;
        self.radio.set_promiscuous(true)?;
        self.publish_channel();
        info!("Channel hopping from {} to {}", FIRST_CHANNEL, LAST_CHANNEL);
        Ok(())
    }

    /// Current channel.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Advance one channel, running the sweep transaction on wrap.
    pub fn tick(&mut self) -> TickOutcome {
        let next = self.channel + 1;
        if next <= LAST_CHANNEL {
            if let Err(e) = self.radio.set_channel(next) {
                error!("Failed to set channel {}: {}", next, e);
            }
            self.channel = next;
            self.publish_channel();
            debug!("Hopped to channel {}", next);
            return TickOutcome::Hopped(next);
        }

        let report = {
            let mut pause = self.sniffer.pause(&mut self.radio);
            let report = pause.reset_and_report();
            emit_report(&mut self.out, &report);
            if let Err(e) = pause.radio().set_channel(FIRST_CHANNEL) {
                error!("Failed to set channel {}: {}", FIRST_CHANNEL, e);
            }
            report
        };

        self.channel = FIRST_CHANNEL;
        self.publish_channel();
        info!(
            "Sweep complete: {} devices, {} basestations ({} raw records)",
            report.devices,
            report.infrastructure,
            report.raw_devices + report.raw_infrastructure
        );
        TickOutcome::Swept(report)
    }

    /// Consume the scheduler, returning the report writer.
    pub fn into_output(self) -> W {
        self.out
    }

    fn publish_channel(&self) {
        self.sniffer
            .stats()
            .channel
            .store(self.channel, Ordering::Relaxed);
    }
}

impl<R: Radio, W: Write + Send> TickHandler for ChannelScheduler<R, W> {
    fn on_tick(&mut self) {
        self.tick();
    }
}

/// Write both report lines and flush.
fn emit_report<W: Write>(out: &mut W, report: &SweepReport) {
    let result = writeln!(out, "{}", report.summary_line())
        .and_then(|_| writeln!(out, "{}", report))
        .and_then(|_| out.flush());
    if let Err(e) = result {
        warn!("Failed to write sweep report: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::{RadioCall, RecordingRadio};
    use crate::radio::FrameHandler;
    use crate::stats::SnifferStats;

    fn setup() -> (ChannelScheduler<RecordingRadio, Vec<u8>>, RecordingRadio, Arc<Sniffer>) {
        let radio = RecordingRadio::new();
        let sniffer = Arc::new(Sniffer::new(Arc::new(SnifferStats::new())));
        let scheduler = ChannelScheduler::new(radio.clone(), sniffer.clone(), Vec::new());
        (scheduler, radio, sniffer)
    }

    fn frame(fc0: u8, last: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 24];
        frame[0] = fc0;
        frame[10..16].copy_from_slice(&[0x02, 0, 0, 0, 0, last]);
        frame
    }

    #[test]
    fn test_start_tunes_channel_one() {
        let (mut scheduler, radio, _) = setup();
        scheduler.start().unwrap();
        assert_eq!(scheduler.channel(), 1);
        assert_eq!(
            radio.calls(),
            vec![RadioCall::Channel(1), RadioCall::Promiscuous(true)]
        );
    }

    #[test]
    fn test_full_sweep_channel_sequence() {
        let (mut scheduler, radio, _) = setup();
        scheduler.start().unwrap();

        let mut visited = vec![scheduler.channel()];
        for _ in 0..12 {
            match scheduler.tick() {
                TickOutcome::Hopped(ch) => visited.push(ch),
                TickOutcome::Swept(_) => panic!("swept too early"),
            }
        }
        assert_eq!(visited, (1..=13).collect::<Vec<u8>>());

        assert!(matches!(scheduler.tick(), TickOutcome::Swept(_)));
        assert_eq!(scheduler.channel(), 1);

        let mut expected: Vec<u8> = (1..=13).collect();
        expected.push(1);
        assert_eq!(radio.channels(), expected);
    }

    #[test]
    fn test_exactly_one_report_per_sweep() {
        let (mut scheduler, _, sniffer) = setup();
        scheduler.start().unwrap();

        let sweeps = (0..39)
            .filter(|_| matches!(scheduler.tick(), TickOutcome::Swept(_)))
            .count();
        assert_eq!(sweeps, 3);
        assert_eq!(
            sniffer.stats().sweeps.completed.load(Ordering::Relaxed),
            3
        );

        let out = String::from_utf8(scheduler.into_output()).unwrap();
        assert_eq!(out.lines().count(), 6);
    }

    #[test]
    fn test_wrap_transaction_order() {
        let (mut scheduler, radio, _) = setup();
        for _ in 0..12 {
            scheduler.tick();
        }
        let before = radio.calls().len();

        scheduler.tick();
        assert_eq!(
            radio.calls()[before..],
            [
                RadioCall::Promiscuous(false),
                RadioCall::Channel(1),
                RadioCall::Promiscuous(true),
            ]
        );
    }

    #[test]
    fn test_sweep_report_output() {
        let (mut scheduler, _, sniffer) = setup();
        scheduler.start().unwrap();

        for last in 0..4 {
            sniffer.on_frame(&frame(0x08, last), -70, scheduler.channel());
        }
        for last in 10..13 {
            sniffer.on_frame(&frame(0x80, last), -55, scheduler.channel());
            // Repeated beacons from the same AP do not add records
            sniffer.on_frame(&frame(0x80, last), -54, scheduler.channel());
        }
        // ACKs never count
        sniffer.on_frame(&[0xD4, 0, 0, 0, 0, 0, 0, 0, 0, 0], -40, 1);

        let mut report = None;
        for _ in 0..13 {
            if let TickOutcome::Swept(r) = scheduler.tick() {
                report = Some(r);
            }
        }
        let report = report.unwrap();
        assert_eq!((report.devices, report.infrastructure), (1, 1));
        assert_eq!(sniffer.registry_len(), 0);

        let out = String::from_utf8(scheduler.into_output()).unwrap();
        assert_eq!(
            out,
            "Found 1 devices and 1 basestations\n{'sensor': 'esp8266', 'devs': 1, 'bss': 1}\n"
        );
    }

    #[test]
    fn test_empty_sweep_output() {
        let (mut scheduler, _, _) = setup();
        for _ in 0..13 {
            scheduler.on_tick();
        }
        let out = String::from_utf8(scheduler.into_output()).unwrap();
        assert!(out.ends_with("{'sensor': 'esp8266', 'devs': 0, 'bss': 0}\n"));
    }

    #[test]
    fn test_reception_resumes_after_sweep() {
        let (mut scheduler, _, sniffer) = setup();
        for _ in 0..13 {
            scheduler.tick();
        }
        assert!(sniffer.is_receiving());

        sniffer.on_frame(&frame(0x80, 1), -50, 1);
        assert_eq!(sniffer.registry_len(), 1);
    }

    #[test]
    fn test_channel_failure_still_advances() {
        let radio = RecordingRadio {
            fail_channel: true,
            ..Default::default()
        };
        let sniffer = Arc::new(Sniffer::new(Arc::new(SnifferStats::new())));
        let mut scheduler = ChannelScheduler::new(radio, sniffer.clone(), Vec::new());

        assert_eq!(scheduler.tick(), TickOutcome::Hopped(2));
        for _ in 0..12 {
            scheduler.tick();
        }
        assert_eq!(scheduler.channel(), 1);
        assert!(sniffer.is_receiving());
    }

    #[test]
    fn test_channel_published_to_stats() {
        let (mut scheduler, _, sniffer) = setup();
        scheduler.start().unwrap();
        scheduler.tick();
        scheduler.tick();
        assert_eq!(sniffer.stats().channel.load(Ordering::Relaxed), 3);
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::radio::{FrameHandler, RadioError};
    use crate::stats::SnifferStats;
    use sniffer_census_esp32_macros::tap_test;

    struct NullRadio;

    impl Radio for NullRadio {
        fn set_channel(&mut self, _channel: u8) -> Result<(), RadioError> {
            Ok(())
        }

        fn set_promiscuous(&mut self, _enabled: bool) -> Result<(), RadioError> {
            Ok(())
        }
    }

    #[tap_test]
    fn thirteenth_tick_sweeps() {
        let sniffer = Arc::new(Sniffer::new(Arc::new(SnifferStats::new())));
        let mut scheduler = ChannelScheduler::new(NullRadio, sniffer, Vec::new());
        for expected in 2..=13 {
            assert_eq!(scheduler.tick(), TickOutcome::Hopped(expected));
        }
        assert!(matches!(scheduler.tick(), TickOutcome::Swept(_)));
        assert_eq!(scheduler.channel(), 1);
    }

    #[tap_test]
    fn sweep_clears_registry() {
        let sniffer = Arc::new(Sniffer::new(Arc::new(SnifferStats::new())));
        let mut frame = [0u8; 24];
        frame[0] = 0x80;
        sniffer.on_frame(&frame, -50, 1);
        assert_eq!(sniffer.registry_len(), 1);

        let mut scheduler = ChannelScheduler::new(NullRadio, sniffer.clone(), Vec::new());
        for _ in 0..13 {
            scheduler.tick();
        }
        assert_eq!(sniffer.registry_len(), 0);
    }
}
