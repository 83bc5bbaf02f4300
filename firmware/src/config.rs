//! Build-time settings, exported by `build.rs` from `.env` and the environment.

use core::str::FromStr;
use core::time::Duration;

use log::warn;
use wakecam::config::Preset;
use wakecam::{Credentials, CycleConfig, DeviceIdentity, Telemetry};

pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");
pub const UPLOAD_URL: &str = env!("UPLOAD_URL");
pub const DEVICE_ID: &str = env!("DEVICE_ID");

const CYCLE_PRESET: &str = env!("CYCLE_PRESET");
const WAKE_POLICY: &str = env!("WAKE_POLICY");
const UPLOAD_MODE: &str = env!("UPLOAD_MODE");
const CAPTURE_COUNT: &str = env!("CAPTURE_COUNT");
const CAPTURE_INTERVAL_SECS: &str = env!("CAPTURE_INTERVAL_SECS");
const LINK_DEADLINE_SECS: &str = env!("LINK_DEADLINE_SECS");
const TELEMETRY_TEMP_C: &str = env!("TELEMETRY_TEMP_C");
const TELEMETRY_VOLTS: &str = env!("TELEMETRY_VOLTS");

/// The preset named by `CYCLE_PRESET` with any per-field overrides applied.
pub fn cycle_config() -> CycleConfig {
    let preset = CYCLE_PRESET.parse().unwrap_or(Preset::SingleShot);
    let mut config = CycleConfig::preset(
        preset,
        Credentials::new(WIFI_SSID, WIFI_PASSWORD),
        UPLOAD_URL,
        DeviceIdentity::new(DEVICE_ID),
    );

    if let Some(policy) = setting("WAKE_POLICY", WAKE_POLICY) {
        config.wake_policy = policy;
    }
    if let Some(mode) = setting("UPLOAD_MODE", UPLOAD_MODE) {
        config.upload_mode = mode;
    }
    if let Some(count) = setting("CAPTURE_COUNT", CAPTURE_COUNT) {
        config.capture_count = count;
    }
    if let Some(secs) = setting("CAPTURE_INTERVAL_SECS", CAPTURE_INTERVAL_SECS) {
        config.capture_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = setting("LINK_DEADLINE_SECS", LINK_DEADLINE_SECS) {
        config.link.deadline = Duration::from_secs(secs);
    }
    config.telemetry = Telemetry {
        temperature_c: setting("TELEMETRY_TEMP_C", TELEMETRY_TEMP_C)
            .unwrap_or(Telemetry::PLACEHOLDER.temperature_c),
        volts: setting("TELEMETRY_VOLTS", TELEMETRY_VOLTS).unwrap_or(Telemetry::PLACEHOLDER.volts),
    };
    config
}

/// Empty means unset. `build.rs` has already rejected malformed values.
fn setting<T: FromStr>(name: &str, value: &str) -> Option<T> {
    if value.is_empty() {
        return None;
    }
    let parsed = value.parse().ok();
    if parsed.is_none() {
        warn!("[CONFIG] ignoring {}={}", name, value);
    }
    parsed
}
