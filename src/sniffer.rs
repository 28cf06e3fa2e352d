//! Shared sniffer state and the reception gate.
//!
//! [`Sniffer`] is the one process-wide object shared between the radio's
//! frame callback, the channel-hop tick and the main loop. It owns the
//! [`MacRegistry`] and a pause counter that decides whether frames are
//! accepted at all.
//!
//! # Exclusion
//!
//! There is no lock on the frame path in the blocking sense. Instead:
//!
//! 1. [`Sniffer::pause`] closes the gate and disables promiscuous delivery.
//! 2. The returned [`ReceptionPause`] is the only way to reach
//!    [`ReceptionPause::reset_and_report`].
//! 3. Dropping the guard reopens the gate and re-enables delivery, after
//!    the registry has been cleared.
//!
//! The frame path only ever `try_lock`s the registry and re-checks the gate
//! once it holds it, so a frame that raced the pause is dropped instead of
//! landing in the middle of a reset.

use crate::frame::{classify, Classification, IgnoreReason};
use crate::radio::{FrameHandler, Radio};
use crate::registry::{MacRegistry, SweepReport};
use crate::stats::SnifferStats;
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Process-wide sniffer state.
#[derive(Debug)]
pub struct Sniffer {
    registry: Mutex<MacRegistry>,
    /// Number of outstanding pauses. Reception is enabled iff zero.
    pauses: AtomicUsize,
    /// Held while the pause count and the radio's promiscuous state change.
    toggle: Mutex<()>,
    stats: Arc<SnifferStats>,
}

impl Sniffer {
    /// Create an empty sniffer with reception enabled.
    pub fn new(stats: Arc<SnifferStats>) -> Self {
        Self {
            registry: Mutex::new(MacRegistry::new()),
            pauses: AtomicUsize::new(0),
            toggle: Mutex::new(()),
            stats,
        }
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<SnifferStats> {
        &self.stats
    }

    /// True when frames are being accepted.
    pub fn is_receiving(&self) -> bool {
        self.pauses.load(Ordering::SeqCst) == 0
    }

    /// Stop accepting frames until the returned guard is dropped.
    ///
    /// Pauses nest: reception resumes only when every guard is gone. A radio
    /// failure is logged but does not open the gate.
    pub fn pause<'a, R: Radio>(&'a self, radio: &'a mut R) -> ReceptionPause<'a, R> {
        {
            let _toggle = self.lock_toggle();
            self.pauses.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = radio.set_promiscuous(false) {
                warn!("Failed to disable promiscuous mode: {}", e);
            }
        }
        ReceptionPause {
            sniffer: self,
            radio,
        }
    }

    /// Number of distinct addresses recorded in the current sweep.
    pub fn registry_len(&self) -> usize {
        self.lock_registry().len()
    }

    fn lock_registry(&self) -> MutexGuard<'_, MacRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_toggle(&self) -> MutexGuard<'_, ()> {
        self.toggle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close one pause. The last one re-enables delivery before another
    /// pause can start, so the radio never ends up enabled behind a closed
    /// gate.
    fn resume<R: Radio>(&self, radio: &mut R) {
        let _toggle = self.lock_toggle();
        if self.pauses.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Err(e) = radio.set_promiscuous(true) {
                warn!("Failed to re-enable promiscuous mode: {}", e);
            }
        }
    }
}

impl FrameHandler for Sniffer {
    fn on_frame(&self, frame: &[u8], rssi: i8, channel: u8) {
        let counters = &self.stats.frames;
        counters.delivered.fetch_add(1, Ordering::Relaxed);

        if !self.is_receiving() {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let frame = match classify(frame) {
            Classification::Frame(frame) => frame,
            Classification::Ignored(IgnoreReason::Control) => {
                counters.control.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Classification::Ignored(IgnoreReason::Truncated) => {
                counters.truncated.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let mut registry = match self.registry.try_lock() {
            Ok(registry) => registry,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        // A pause may have started between the first check and the lock
        if !self.is_receiving() {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        registry.observe(
            frame.source,
            rssi,
            channel,
            frame.is_infrastructure_signal(),
        );
        counters.accepted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Guard returned by [`Sniffer::pause`]. Reception resumes on drop.
pub struct ReceptionPause<'a, R: Radio> {
    sniffer: &'a Sniffer,
    radio: &'a mut R,
}

impl<R: Radio> ReceptionPause<'_, R> {
    /// Count and clear the registry. Safe because reception is paused.
    pub fn reset_and_report(&mut self) -> SweepReport {
        let report = self.sniffer.lock_registry().reset_and_report();
        debug!(
            "Registry cleared ({} device, {} infrastructure records)",
            report.raw_devices, report.raw_infrastructure
        );
        self.sniffer.stats.record_sweep(&report);
        report
    }

    /// The radio, for work that must happen while paused.
    pub fn radio(&mut self) -> &mut R {
        &mut *self.radio
    }
}

impl<R: Radio> Drop for ReceptionPause<'_, R> {
    fn drop(&mut self) {
        self.sniffer.resume(&mut *self.radio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::{RadioCall, RecordingRadio};

    fn sniffer() -> Sniffer {
        Sniffer::new(Arc::new(SnifferStats::new()))
    }

    fn frame(fc0: u8, last: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 24];
        frame[0] = fc0;
        frame[10..16].copy_from_slice(&[0x02, 0, 0, 0, 0, last]);
        frame
    }

    #[test]
    fn test_frames_fill_registry() {
        let sniffer = sniffer();
        sniffer.on_frame(&frame(0x80, 1), -50, 1);
        sniffer.on_frame(&frame(0x08, 2), -60, 1);
        sniffer.on_frame(&frame(0x08, 2), -61, 2);

        assert_eq!(sniffer.registry_len(), 2);
        assert_eq!(sniffer.stats().frames.delivered.load(Ordering::Relaxed), 3);
        assert_eq!(sniffer.stats().frames.accepted.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_control_frames_never_recorded() {
        let sniffer = sniffer();
        for last in 0..10 {
            sniffer.on_frame(&frame(0xD4, last), -50, 1);
        }
        assert_eq!(sniffer.registry_len(), 0);
        assert_eq!(sniffer.stats().frames.control.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_control_frames_never_update() {
        let sniffer = sniffer();
        sniffer.on_frame(&frame(0x08, 7), -60, 3);
        sniffer.on_frame(&frame(0xD4, 7), -20, 11);
        sniffer.on_frame(&frame(0xC4, 7), -25, 9);

        let registry = sniffer.lock_registry();
        let record = &registry.records()[0];
        assert_eq!(registry.len(), 1);
        assert_eq!(record.last_signal_strength, -60);
        assert_eq!(record.last_channel, 3);
        assert!(!record.is_infrastructure);
    }

    #[test]
    fn test_truncated_frames_counted() {
        let sniffer = sniffer();
        sniffer.on_frame(&[0x80], -50, 1);
        sniffer.on_frame(&[0x80, 0x00, 0x00], -50, 1);
        assert_eq!(sniffer.registry_len(), 0);
        assert_eq!(sniffer.stats().frames.truncated.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_paused_sniffer_drops_frames() {
        let sniffer = sniffer();
        let mut radio = RecordingRadio::new();
        {
            let _pause = sniffer.pause(&mut radio);
            assert!(!sniffer.is_receiving());
            sniffer.on_frame(&frame(0x80, 1), -50, 1);
        }
        assert!(sniffer.is_receiving());
        assert_eq!(sniffer.registry_len(), 0);
        assert_eq!(sniffer.stats().frames.dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_pause_toggles_radio_around_reset() {
        let sniffer = sniffer();
        let mut radio = RecordingRadio::new();
        let calls = radio.clone();
        sniffer.on_frame(&frame(0x80, 1), -50, 1);

        {
            let mut pause = sniffer.pause(&mut radio);
            assert_eq!(calls.calls(), vec![RadioCall::Promiscuous(false)]);
            pause.reset_and_report();
            // Still disabled until the guard goes away
            assert_eq!(calls.calls().len(), 1);
        }

        assert_eq!(
            calls.calls(),
            vec![RadioCall::Promiscuous(false), RadioCall::Promiscuous(true)]
        );
    }

    #[test]
    fn test_nested_pauses() {
        let sniffer = sniffer();
        let mut outer_radio = RecordingRadio::new();
        let mut inner_radio = outer_radio.clone();

        let outer = sniffer.pause(&mut outer_radio);
        {
            let _inner = sniffer.pause(&mut inner_radio);
        }
        // Inner resume must not reopen the gate while outer is held
        assert!(!sniffer.is_receiving());
        drop(outer);
        assert!(sniffer.is_receiving());

        let enables = inner_radio
            .calls()
            .into_iter()
            .filter(|c| *c == RadioCall::Promiscuous(true))
            .count();
        assert_eq!(enables, 1);
    }

    /// Radio whose enable call is slow, exposing the state it ends up in.
    #[derive(Clone, Default)]
    struct SlowEnableRadio {
        promiscuous: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Radio for SlowEnableRadio {
        fn set_channel(&mut self, _channel: u8) -> Result<(), crate::radio::RadioError> {
            Ok(())
        }

        fn set_promiscuous(&mut self, enabled: bool) -> Result<(), crate::radio::RadioError> {
            if enabled {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            self.promiscuous.store(enabled, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_pause_during_slow_resume_leaves_radio_disabled() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let sniffer = Arc::new(sniffer());
        let radio = SlowEnableRadio::default();
        let (paused_tx, paused_rx) = mpsc::channel();

        let sweep = {
            let sniffer = sniffer.clone();
            let mut radio = radio.clone();
            thread::spawn(move || {
                let pause = sniffer.pause(&mut radio);
                paused_tx.send(()).unwrap();
                drop(pause);
            })
        };

        paused_rx.recv().unwrap();
        // Land inside the sweep's enable call
        thread::sleep(Duration::from_millis(20));
        let mut climate_radio = radio.clone();
        let climate = sniffer.pause(&mut climate_radio);
        sweep.join().unwrap();

        assert!(!sniffer.is_receiving());
        assert!(!radio.promiscuous.load(Ordering::SeqCst));

        drop(climate);
        assert!(sniffer.is_receiving());
        assert!(radio.promiscuous.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reset_starts_new_sweep() {
        let sniffer = sniffer();
        let mut radio = RecordingRadio::new();
        sniffer.on_frame(&frame(0x80, 1), -50, 1);
        sniffer.on_frame(&frame(0x80, 2), -50, 1);

        let report = sniffer.pause(&mut radio).reset_and_report();
        assert_eq!(report.raw_infrastructure, 2);
        assert_eq!(report.infrastructure, 1);
        assert_eq!(sniffer.registry_len(), 0);
        assert_eq!(
            sniffer.stats().sweeps.completed.load(Ordering::Relaxed),
            1
        );
        assert!(sniffer.is_receiving());
    }

    #[test]
    fn test_concurrent_frames_and_resets() {
        use std::thread;

        let sniffer = Arc::new(sniffer());
        let writers: Vec<_> = (0..4u8)
            .map(|t| {
                let sniffer = sniffer.clone();
                thread::spawn(move || {
                    for i in 0..500u16 {
                        let last = (i % 50) as u8;
                        sniffer.on_frame(&frame(0x08, last.wrapping_add(t * 50)), -70, 1);
                    }
                })
            })
            .collect();

        let mut radio = RecordingRadio::new();
        let mut total_records = 0;
        for _ in 0..20 {
            let report = sniffer.pause(&mut radio).reset_and_report();
            total_records += report.raw_devices + report.raw_infrastructure;
        }
        for w in writers {
            w.join().unwrap();
        }
        let report = sniffer.pause(&mut radio).reset_and_report();
        total_records += report.raw_devices;

        let stats = sniffer.stats();
        assert_eq!(stats.frames.delivered.load(Ordering::Relaxed), 2000);
        let accepted = stats.frames.accepted.load(Ordering::Relaxed);
        let dropped = stats.frames.dropped.load(Ordering::Relaxed);
        assert_eq!(accepted + dropped, 2000);
        // Every record comes from at least one accepted frame
        assert!(total_records as usize <= accepted);
        assert!(sniffer.is_receiving());
    }
}
