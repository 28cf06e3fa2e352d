fn main() {
    // ESP-IDF link arguments are only needed for firmware builds; host builds
    // (tests, the simulation binary) skip the IDF environment entirely.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "espidf" {
        embuild::espidf::sysenv::output();
    }
}
