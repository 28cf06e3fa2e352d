//! TAP test runner.
//!
//! Runs every `#[tap_test]` in the library and prints TAP on the console.
//!
//! ```bash
//! # Host
//! cargo run --bin device-tests --no-default-features --features tap-tests
//!
//! # Board
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```
//!
//! `TAP_FILTER=<substring>` limits the run to matching test names.

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

#[cfg(feature = "tap-tests")]
fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }

    let filter = std::env::var("TAP_FILTER").ok();
    let success = sniffer_census_esp32::testing::run_all_tests(filter.as_deref());

    #[cfg(feature = "esp32")]
    {
        log::info!("Tests complete (success: {}). Halting.", success);
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}

#[cfg(not(feature = "tap-tests"))]
fn main() {
    eprintln!("device-tests requires the 'tap-tests' feature");
    std::process::exit(2);
}
