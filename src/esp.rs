//! ESP-IDF bindings for the sniffer.
//!
//! - [`EspRadio`]: channel and promiscuous control over the IDF WiFi driver
//! - [`register_frame_handler`]: routes the promiscuous RX callback into a
//!   [`FrameHandler`]
//! - [`start_hop_timer`]: drives a [`TickHandler`] from an `esp_timer`
//! - [`Dht11`]: single-wire temperature/humidity sensor
//!
//! # Pin Configuration
//!
//! | Signal    | GPIO | Notes                      |
//! |-----------|------|----------------------------|
//! | DHT11 DATA| 13   | Open drain, external pull-up |

use crate::climate::{decode_dht11, ClimateReading, ClimateSensor, SensorError};
use crate::frame::{RxMetadata, RX_METADATA_LEN};
use crate::radio::{check_metadata_layout, deliver, FrameHandler, Radio, RadioError, TickHandler};
use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
use esp_idf_svc::wifi::{ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::{self as sys, esp, EspError};
use log::{info, warn};
use std::ffi::c_void;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Handler behind the C callback, which carries no user pointer.
static FRAME_HANDLER: OnceLock<Arc<dyn FrameHandler>> = OnceLock::new();

/// WiFi radio controlled through the global IDF driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EspRadio;

impl Radio for EspRadio {
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        esp!(unsafe {
            sys::esp_wifi_set_channel(channel, sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE)
        })?;
        Ok(())
    }

    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), RadioError> {
        esp!(unsafe { sys::esp_wifi_set_promiscuous(enabled) })?;
        Ok(())
    }
}

/// Bring WiFi up in station mode without associating.
///
/// The returned driver must be kept alive for the radio to stay on.
pub fn start_station(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<EspWifi<'static>, EspError> {
    let mut wifi = EspWifi::new(modem, sysloop, Some(nvs))?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
    wifi.start()?;
    info!("WiFi started in station mode");
    Ok(wifi)
}

/// Install `handler` as the target of the promiscuous RX callback.
///
/// Fails without installing anything if the driver's RX header does not
/// match [`RX_METADATA_LEN`]. Can only be called once. Delivery stays off until
/// [`Radio::set_promiscuous`] is called.
pub fn register_frame_handler(handler: Arc<dyn FrameHandler>) -> Result<(), RadioError> {
    // The callback slices `RX_METADATA_LEN + sig_len` bytes out of the
    // driver buffer
    check_metadata_layout(std::mem::size_of::<sys::wifi_pkt_rx_ctrl_t>())?;

    FRAME_HANDLER
        .set(handler)
        .map_err(|_| RadioError::Unavailable("frame handler already registered"))?;

    let filter = sys::wifi_promiscuous_filter_t {
        filter_mask: sys::WIFI_PROMIS_FILTER_MASK_ALL,
    };
    esp!(unsafe { sys::esp_wifi_set_promiscuous_filter(&filter) })?;
    esp!(unsafe { sys::esp_wifi_set_promiscuous_rx_cb(Some(promiscuous_rx)) })?;
    info!("Promiscuous RX callback registered");
    Ok(())
}

extern "C" fn promiscuous_rx(buf: *mut c_void, _pkt_type: sys::wifi_promiscuous_pkt_type_t) {
    let Some(handler) = FRAME_HANDLER.get() else {
        return;
    };
    if buf.is_null() {
        return;
    }

    // SAFETY: the driver passes a wifi_promiscuous_pkt_t, valid for the
    // duration of this call: the metadata header, then `sig_len` bytes.
    let header = unsafe { std::slice::from_raw_parts(buf as *const u8, RX_METADATA_LEN) };
    let Some(meta) = RxMetadata::parse(header) else {
        return;
    };
    let len = RX_METADATA_LEN + usize::from(meta.frame_len);
    let buffer = unsafe { std::slice::from_raw_parts(buf as *const u8, len) };

    deliver(handler.as_ref(), buffer);
}

/// Periodic timer driving a tick handler. Stops when dropped.
pub struct HopTimer {
    _service: EspTaskTimerService,
    _timer: EspTimer<'static>,
}

/// Call `handler.on_tick()` every `interval` from the IDF timer task.
pub fn start_hop_timer<T>(mut handler: T, interval: Duration) -> Result<HopTimer, EspError>
where
    T: TickHandler + 'static,
{
    let service = EspTaskTimerService::new()?;
    let timer = service.timer(move || handler.on_tick())?;
    timer.every(interval)?;
    info!("Hop timer armed every {:?}", interval);
    Ok(HopTimer {
        _service: service,
        _timer: timer,
    })
}

/// Longest the line may stay at one level during a transfer (µs).
const DHT_LEVEL_TIMEOUT_US: i64 = 100;

/// High pulses longer than this are a `1` bit (µs).
const DHT_ONE_THRESHOLD_US: i64 = 40;

/// DHT11 on a single open-drain GPIO.
pub struct Dht11 {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
}

impl Dht11 {
    /// Take ownership of the data pin and idle it high.
    pub fn new(pin: AnyIOPin) -> Result<Self, EspError> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_high()?;
        Ok(Self { pin })
    }

    /// Run one transfer and decode it.
    pub fn try_read(&mut self) -> Result<ClimateReading, SensorError> {
        // Start signal: hold low >18 ms, release
        self.pin.set_low().map_err(|_| SensorError::Bus)?;
        FreeRtos::delay_ms(20);
        self.pin.set_high().map_err(|_| SensorError::Bus)?;
        Ets::delay_us(30);

        let bytes = esp_idf_hal::interrupt::free(|| self.read_frame())?;
        decode_dht11(bytes)
    }

    fn read_frame(&self) -> Result<[u8; 5], SensorError> {
        // Response: low 80 µs, high 80 µs
        self.wait_while(true)?;
        self.wait_while(false)?;
        self.wait_while(true)?;

        let mut bytes = [0u8; 5];
        for bit in 0..40 {
            self.wait_while(false)?;
            let high_us = self.wait_while(true)?;
            let byte = &mut bytes[bit / 8];
            *byte = (*byte << 1) | u8::from(high_us > DHT_ONE_THRESHOLD_US);
        }
        Ok(bytes)
    }

    /// Spin while the line is at `high`; returns how long that took.
    fn wait_while(&self, high: bool) -> Result<i64, SensorError> {
        let start = now_us();
        while self.pin.is_high() == high {
            if now_us() - start > DHT_LEVEL_TIMEOUT_US {
                return Err(SensorError::Timeout);
            }
        }
        Ok(now_us() - start)
    }
}

impl ClimateSensor for Dht11 {
    fn read(&mut self) -> ClimateReading {
        match self.try_read() {
            Ok(reading) => reading,
            Err(e) => {
                warn!("DHT11 read failed: {}", e);
                ClimateReading::FAILED
            }
        }
    }
}

fn now_us() -> i64 {
    unsafe { sys::esp_timer_get_time() }
}
