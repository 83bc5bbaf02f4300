#![cfg_attr(not(test), no_std)]

//! Deep-sleep camera cycle library
//!
//! Everything the camera module does between two deep sleeps, written against
//! small hardware traits so the same logic runs on the ESP32-S3 firmware and in
//! host tests: pin setup and wake-cause gating, camera session and frame
//! ownership, station link tracking, payload packaging, the HTTP upload, and the
//! cycle controller that sequences them.

extern crate alloc;

pub mod board;
pub mod camera;
pub mod config;
pub mod cycle;
pub mod http;
pub mod network;
pub mod package;
pub mod sensor;
pub mod timestamp;
pub mod upload;

pub use board::{Board, LedPattern, WakeCause};
pub use camera::{CameraDriver, CameraError, CameraSession, CaptureProfile, Frame, SensorTuning};
pub use config::{CycleConfig, UploadMode, WakePolicy};
pub use cycle::{CycleController, CycleOutcome, CyclePhase, CycleReport, Hardware};
pub use network::{
    Credentials, LinkEvent, LinkMonitor, LinkState, NetworkError, NetworkSession, RaisedEvents,
};
pub use package::{DeviceIdentity, PackageError, Payload, Telemetry, TelemetrySource};
pub use timestamp::{Clock, Timestamp};
pub use upload::{HttpClient, StatusCode, UploadError, Uploader};

/// Project version information
pub const VERSION: &str = "0.1.0-dev";
