//! Cycle configuration
//!
//! All per-deployment values live in one [`CycleConfig`] handed to the
//! controller. The firmware fills it from build-time environment; the string
//! forms parsed here are the ones `firmware/build.rs` accepts.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use crate::board::WakeCause;
use crate::camera::{CaptureProfile, SensorTuning};
use crate::network::{Credentials, LinkTiming};
use crate::package::{DeviceIdentity, Telemetry};

/// Whether a boot that was not caused by the wake button runs a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    /// Run on any boot; the wake cause is only logged.
    AlwaysRun,
    /// Run only after a wake-button wakeup; any other boot goes straight
    /// back to deep sleep.
    RunOnlyOnTrigger,
}

impl WakePolicy {
    /// Whether a boot with `cause` runs the capture cycle.
    pub fn admits(self, cause: WakeCause) -> bool {
        match self {
            WakePolicy::AlwaysRun => true,
            WakePolicy::RunOnlyOnTrigger => cause.is_external_pin(),
        }
    }
}

/// What the POST body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// The JPEG bytes as-is, `Content-Type: image/jpeg`.
    RawJpeg,
    /// Metadata header followed by the JPEG bytes,
    /// `Content-Type: application/octet-stream`.
    Packaged,
}

impl UploadMode {
    pub const fn content_type(self) -> &'static str {
        match self {
            UploadMode::RawJpeg => "image/jpeg",
            UploadMode::Packaged => "application/octet-stream",
        }
    }
}

/// A string value that does not name any variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownVariant;

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown variant")
    }
}

impl FromStr for WakePolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "always" | "always-run" => Ok(WakePolicy::AlwaysRun),
            "trigger" | "run-only-on-trigger" => Ok(WakePolicy::RunOnlyOnTrigger),
            _ => Err(UnknownVariant),
        }
    }
}

impl FromStr for UploadMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "raw" | "raw-jpeg" => Ok(UploadMode::RawJpeg),
            "packaged" => Ok(UploadMode::Packaged),
            _ => Err(UnknownVariant),
        }
    }
}

/// The two shipped program variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// One raw JPEG per boot, runs on any wake cause.
    SingleShot,
    /// Up to 30 packaged frames 15 s apart, only after a button wakeup.
    Burst,
}

impl FromStr for Preset {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single-shot" | "single" => Ok(Preset::SingleShot),
            "burst" => Ok(Preset::Burst),
            _ => Err(UnknownVariant),
        }
    }
}

/// Input to [`crate::cycle::CycleController`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleConfig {
    pub credentials: Credentials,
    /// `http://host[:port]/path`
    pub endpoint: &'static str,
    pub identity: DeviceIdentity,
    pub wake_policy: WakePolicy,
    pub upload_mode: UploadMode,
    /// Upper bound on capture/upload iterations per boot.
    pub capture_count: u16,
    /// Pause between iterations. Not applied after the last one.
    pub capture_interval: Duration,
    pub upload_timeout: Duration,
    pub link: LinkTiming,
    pub profile: CaptureProfile,
    /// Applied right after camera init when set.
    pub tuning: Option<SensorTuning>,
    /// Keep the status LED lit while a frame is being captured.
    pub flash_during_capture: bool,
    /// Values reported when the board has no real sensors.
    pub telemetry: Telemetry,
}

impl CycleConfig {
    pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn preset(
        preset: Preset,
        credentials: Credentials,
        endpoint: &'static str,
        identity: DeviceIdentity,
    ) -> Self {
        match preset {
            Preset::SingleShot => Self::single_shot(credentials, endpoint, identity),
            Preset::Burst => Self::burst(credentials, endpoint, identity),
        }
    }

    pub fn single_shot(
        credentials: Credentials,
        endpoint: &'static str,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            credentials,
            endpoint,
            identity,
            wake_policy: WakePolicy::AlwaysRun,
            upload_mode: UploadMode::RawJpeg,
            capture_count: 1,
            capture_interval: Duration::ZERO,
            upload_timeout: Self::UPLOAD_TIMEOUT,
            link: LinkTiming::default(),
            profile: CaptureProfile::standard(),
            tuning: None,
            flash_during_capture: false,
            telemetry: Telemetry::PLACEHOLDER,
        }
    }

    pub fn burst(
        credentials: Credentials,
        endpoint: &'static str,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            credentials,
            endpoint,
            identity,
            wake_policy: WakePolicy::RunOnlyOnTrigger,
            upload_mode: UploadMode::Packaged,
            capture_count: 30,
            capture_interval: Duration::from_secs(15),
            upload_timeout: Self::UPLOAD_TIMEOUT,
            link: LinkTiming::default(),
            profile: CaptureProfile::standard(),
            tuning: Some(SensorTuning::low_light()),
            flash_during_capture: true,
            telemetry: Telemetry::PLACEHOLDER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("lab", "hunter22")
    }

    #[test]
    fn parses_policy_and_mode_strings() {
        assert_eq!("always".parse::<WakePolicy>(), Ok(WakePolicy::AlwaysRun));
        assert_eq!(" trigger ".parse::<WakePolicy>(), Ok(WakePolicy::RunOnlyOnTrigger));
        assert_eq!("raw-jpeg".parse::<UploadMode>(), Ok(UploadMode::RawJpeg));
        assert_eq!("packaged".parse::<UploadMode>(), Ok(UploadMode::Packaged));
        assert_eq!("burst".parse::<Preset>(), Ok(Preset::Burst));
        assert_eq!("sometimes".parse::<WakePolicy>(), Err(UnknownVariant));
    }

    #[test]
    fn trigger_policy_only_admits_the_wake_pin() {
        assert!(WakePolicy::RunOnlyOnTrigger.admits(WakeCause::ExternalPin));
        assert!(!WakePolicy::RunOnlyOnTrigger.admits(WakeCause::Other(0)));
        assert!(WakePolicy::AlwaysRun.admits(WakeCause::Other(5)));
    }

    #[test]
    fn presets_match_the_two_variants() {
        let id = DeviceIdentity::new("cam-01");
        let single = CycleConfig::single_shot(creds(), "http://10.0.0.2:3000/pic", id);
        assert_eq!(single.capture_count, 1);
        assert_eq!(single.wake_policy, WakePolicy::AlwaysRun);
        assert_eq!(single.upload_mode.content_type(), "image/jpeg");

        let burst = CycleConfig::preset(Preset::Burst, creds(), "http://10.0.0.2:3000/pic", id);
        assert_eq!(burst.capture_count, 30);
        assert_eq!(burst.capture_interval, Duration::from_secs(15));
        assert_eq!(burst.wake_policy, WakePolicy::RunOnlyOnTrigger);
        assert_eq!(burst.upload_mode.content_type(), "application/octet-stream");
        assert_eq!(burst.upload_timeout, Duration::from_secs(20));
    }
}
