//! WiFi sniffer census binary.
//!
//! With the `esp32` feature this is the firmware: WiFi in station mode,
//! promiscuous capture, channel hopping on an `esp_timer`, DHT11 on GPIO13.
//!
//! Without it, the same core runs on the host against a simulated radio and
//! sensor, with the stats endpoint at http://localhost:8080/stats.
//!
//! ```bash
//! RUST_LOG=debug SNIFFER_HOP_MS=200 cargo run --bin sniffer
//! ```

#[cfg(feature = "esp32")]
fn main() {
    use log::info;
    use sniffer_census_esp32::esp::{self, Dht11, EspRadio};
    use sniffer_census_esp32::{
        poll_climate, ChannelScheduler, Sniffer, SnifferConfig, SnifferStats,
    };
    use std::sync::Arc;

    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("=== Sniffer census starting ===");

    let config = SnifferConfig::default();
    let peripherals =
        esp_idf_hal::peripherals::Peripherals::take().expect("Failed to take peripherals");
    let sysloop =
        esp_idf_svc::eventloop::EspSystemEventLoop::take().expect("Failed to take event loop");
    let nvs = esp_idf_svc::nvs::EspDefaultNvsPartition::take().expect("Failed to take NVS");

    let _wifi = esp::start_station(peripherals.modem, sysloop, nvs).expect("Failed to start WiFi");

    let stats = Arc::new(SnifferStats::new());
    let sniffer = Arc::new(Sniffer::new(stats));
    esp::register_frame_handler(sniffer.clone()).expect("Failed to register frame handler");

    let mut scheduler = ChannelScheduler::new(EspRadio, sniffer.clone(), std::io::stdout());
    scheduler
        .start()
        .expect("Failed to enable promiscuous mode");
    let _hop_timer =
        esp::start_hop_timer(scheduler, config.hop_interval).expect("Failed to arm hop timer");

    let mut sensor = Dht11::new(peripherals.pins.gpio13.into()).expect("Failed to claim GPIO13");
    let mut radio = EspRadio;
    let mut out = std::io::stdout();

    info!("Sniffing; climate every {:?}", config.sensor_interval);
    loop {
        std::thread::sleep(config.sensor_interval);
        poll_climate(&sniffer, &mut radio, &mut sensor, &mut out);
    }
}

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() {
    use log::{error, info, warn};
    use sniffer_census_esp32::sim::{FrameGenerator, SimulatedClimate, SimulatedRadio};
    use sniffer_census_esp32::{
        deliver, poll_climate, ChannelScheduler, Sniffer, SnifferConfig, SnifferStats,
        StatsServer,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::MissedTickBehavior;
    use tokio_util::sync::CancellationToken;

    /// Simulated air: access points and stations spread over all channels.
    const SIM_ACCESS_POINTS: usize = 6;
    const SIM_STATIONS: usize = 24;
    const SIM_FRAME_INTERVAL: Duration = Duration::from_millis(5);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== Sniffer census (host simulation) starting ===");

    let config = match SnifferConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let stats = Arc::new(SnifferStats::new());

    // Kept alive for Drop
    let _stats_server = match StatsServer::start(None, config.stats_port, stats.clone()) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            warn!("Continuing without stats server");
            None
        }
    };

    let sniffer = Arc::new(Sniffer::new(stats));
    let radio = SimulatedRadio::new();

    let mut scheduler = ChannelScheduler::new(radio.clone(), sniffer.clone(), std::io::stdout());
    if let Err(e) = scheduler.start() {
        error!("Failed to start channel hopping: {}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();

    let hop_cancel = cancel.clone();
    let hop_interval = config.hop_interval;
    let hop_task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(hop_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // First tick is immediate

        loop {
            tokio::select! {
                _ = hop_cancel.cancelled() => break,
                _ = timer.tick() => {
                    scheduler.tick();
                }
            }
        }
    });

    let air_cancel = cancel.clone();
    let air_radio = radio.clone();
    let air_sniffer = sniffer.clone();
    let air_task = tokio::spawn(async move {
        let mut generator =
            FrameGenerator::new(SIM_ACCESS_POINTS, SIM_STATIONS, std::process::id());
        let mut timer = tokio::time::interval(SIM_FRAME_INTERVAL);

        loop {
            tokio::select! {
                _ = air_cancel.cancelled() => break,
                _ = timer.tick() => {
                    if !air_radio.is_promiscuous() {
                        continue;
                    }
                    if let Some(buffer) = generator.next_buffer(air_radio.channel()) {
                        deliver(air_sniffer.as_ref(), &buffer);
                    }
                }
            }
        }
    });

    let climate_cancel = cancel.clone();
    let mut climate_radio = radio.clone();
    let climate_sniffer = sniffer.clone();
    let sensor_interval = config.sensor_interval;
    let climate_task = tokio::spawn(async move {
        let mut sensor = SimulatedClimate::new(Some(7));
        let mut out = std::io::stdout();
        let mut timer = tokio::time::interval(sensor_interval);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = climate_cancel.cancelled() => break,
                _ = timer.tick() => {
                    poll_climate(&climate_sniffer, &mut climate_radio, &mut sensor, &mut out);
                }
            }
        }
    });

    info!(
        "Sniffing {} simulated transmitters (Ctrl+C to exit)",
        SIM_ACCESS_POINTS + SIM_STATIONS
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Shutting down...");
    cancel.cancel();

    for (name, task) in [
        ("hop", hop_task),
        ("air", air_task),
        ("climate", climate_task),
    ] {
        if let Err(e) = task.await {
            error!("{} task error: {}", name, e);
        }
    }
    radio.shutdown();

    info!(
        "Stopped after {} sweeps",
        sniffer
            .stats()
            .sweeps
            .completed
            .load(std::sync::atomic::Ordering::Relaxed)
    );
}
