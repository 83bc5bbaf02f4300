//! Cycle controller
//!
//! One boot's worth of work, from pin setup to the point where the firmware
//! puts the chip into deep sleep:
//!
//! ```text
//! Boot -> PinInit -> LedSignal -> WakeCheck -+-> NetAndCamInit -> AwaitLink
//!                                            |     -> CaptureLoop -> FinalLedSignal -> DeepSleep
//!                                            +-> DeepSleep
//! ```
//!
//! Camera init failure and link timeout abort the cycle. Capture, packaging
//! and upload failures are counted and the loop moves on to the next frame.

use core::fmt;

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::board::{Board, LedPattern, WakeCause, signal};
use crate::camera::{CameraDriver, CameraError, CameraSession, FrameStats};
use crate::config::{CycleConfig, UploadMode};
use crate::network::{self, LinkMonitor, NetworkError};
use crate::package::{self, PackageError, TelemetrySource};
use crate::timestamp::Clock;
use crate::upload::{HttpClient, StatusCode, UploadError, Uploader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Boot,
    PinInit,
    LedSignal,
    WakeCheck,
    NetAndCamInit,
    AwaitLink,
    CaptureLoop,
    FinalLedSignal,
    DeepSleep,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Boot => "boot",
            CyclePhase::PinInit => "pin-init",
            CyclePhase::LedSignal => "led-signal",
            CyclePhase::WakeCheck => "wake-check",
            CyclePhase::NetAndCamInit => "net-and-cam-init",
            CyclePhase::AwaitLink => "await-link",
            CyclePhase::CaptureLoop => "capture-loop",
            CyclePhase::FinalLedSignal => "final-led-signal",
            CyclePhase::DeepSleep => "deep-sleep",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The capture loop ran to its bound.
    Completed,
    /// The wake policy sent the boot straight back to sleep.
    SkippedByWakePolicy,
    CameraInitFailed(CameraError),
    LinkTimeout,
}

/// Why one capture-loop iteration did not upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    Link(NetworkError),
    Camera(CameraError),
    Package(PackageError),
    Upload(UploadError),
}

impl From<NetworkError> for StepError {
    fn from(e: NetworkError) -> Self {
        StepError::Link(e)
    }
}

impl From<CameraError> for StepError {
    fn from(e: CameraError) -> Self {
        StepError::Camera(e)
    }
}

impl From<PackageError> for StepError {
    fn from(e: PackageError) -> Self {
        StepError::Package(e)
    }
}

impl From<UploadError> for StepError {
    fn from(e: UploadError) -> Self {
        StepError::Upload(e)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Link(e) => write!(f, "link: {}", e),
            StepError::Camera(e) => write!(f, "camera: {}", e),
            StepError::Package(e) => write!(f, "package: {}", e),
            StepError::Upload(e) => write!(f, "upload: {}", e),
        }
    }
}

const MAX_TRACE: usize = 12;

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub wake_cause: Option<WakeCause>,
    pub outcome: CycleOutcome,
    /// Capture-loop iterations started.
    pub attempts: u16,
    /// Exchanges answered with 2xx.
    pub uploaded: u16,
    /// Exchanges answered with anything else.
    pub rejected: u16,
    /// Iterations that never completed an exchange.
    pub failed: u16,
    pub frames: FrameStats,
    /// Phases in the order they were entered.
    pub trace: Vec<CyclePhase, MAX_TRACE>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            wake_cause: None,
            outcome: CycleOutcome::Completed,
            attempts: 0,
            uploaded: 0,
            rejected: 0,
            failed: 0,
            frames: FrameStats::default(),
            trace: Vec::new(),
        }
    }

    pub fn phase(&self) -> Option<CyclePhase> {
        self.trace.last().copied()
    }

    pub fn reached(&self, phase: CyclePhase) -> bool {
        self.trace.contains(&phase)
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!("[CYCLE] -> {}", phase.as_str());
        // Each phase is entered at most once, MAX_TRACE covers all of them.
        let _ = self.trace.push(phase);
    }
}

/// The collaborators a cycle drives.
pub struct Hardware<B, C, H, D, K, T> {
    pub board: B,
    pub camera: C,
    pub http: H,
    pub delay: D,
    pub clock: K,
    pub telemetry: T,
}

pub struct CycleController<'m, B, C, H, D, K, T> {
    config: CycleConfig,
    link: &'m LinkMonitor,
    hw: Hardware<B, C, H, D, K, T>,
}

impl<'m, B, C, H, D, K, T> CycleController<'m, B, C, H, D, K, T>
where
    B: Board,
    C: CameraDriver,
    H: HttpClient,
    D: DelayNs,
    K: Clock,
    T: TelemetrySource,
{
    pub fn new(config: CycleConfig, link: &'m LinkMonitor, hw: Hardware<B, C, H, D, K, T>) -> Self {
        Self { config, link, hw }
    }

    /// Run the cycle up to, not including, deep sleep entry.
    pub async fn run(self) -> CycleReport {
        let Self { config, link, hw } = self;
        let Hardware {
            mut board,
            mut camera,
            http,
            mut delay,
            clock,
            mut telemetry,
        } = hw;
        let mut report = CycleReport::new();

        report.enter(CyclePhase::Boot);
        info!(
            "[CYCLE] boot: {} x {} ({:?})",
            config.capture_count,
            config.upload_mode.content_type(),
            config.wake_policy
        );

        report.enter(CyclePhase::PinInit);
        board.configure();

        report.enter(CyclePhase::LedSignal);
        signal(&mut board, &mut delay, LedPattern::Boot).await;

        report.enter(CyclePhase::WakeCheck);
        let cause = board.wake_cause();
        report.wake_cause = Some(cause);
        info!("[CYCLE] wake cause: {:?}", cause);
        if !config.wake_policy.admits(cause) {
            info!("[CYCLE] not a trigger wakeup, back to sleep");
            report.outcome = CycleOutcome::SkippedByWakePolicy;
            report.enter(CyclePhase::DeepSleep);
            return report;
        }

        report.enter(CyclePhase::NetAndCamInit);
        link.request_start(config.credentials);
        let mut session = match CameraSession::initialize(&mut camera, config.profile) {
            Ok(session) => session,
            Err((e, _)) => {
                error!("[CYCLE] camera init failed, aborting: {}", e);
                report.outcome = CycleOutcome::CameraInitFailed(e);
                return finish(report, &mut board, &mut delay).await;
            }
        };
        if let Some(tuning) = &config.tuning {
            if let Err(e) = session.tune(tuning) {
                warn!("[CAM] tuning failed, keeping defaults: {}", e);
            }
        }

        report.enter(CyclePhase::AwaitLink);
        match link.await_ready(&mut delay, config.link).await {
            Ok(ip) => info!("[CYCLE] link up at {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]),
            Err(e) => {
                error!("[CYCLE] {}, aborting", e);
                report.outcome = CycleOutcome::LinkTimeout;
                report.frames = session.stats();
                return finish(report, &mut board, &mut delay).await;
            }
        }

        report.enter(CyclePhase::CaptureLoop);
        let mut uploader = Uploader::new(http, config.endpoint, config.upload_timeout);
        for n in 1..=config.capture_count {
            report.attempts += 1;
            let step = async {
                link.await_ready(&mut delay, config.link).await?;

                if config.flash_during_capture {
                    board.set_status_led(true);
                }
                let captured = session.capture(clock.now());
                if config.flash_during_capture {
                    board.set_status_led(false);
                }
                let frame = captured?;
                info!("[CYCLE] frame {}/{}: {} bytes", n, config.capture_count, frame.len());

                let status = match config.upload_mode {
                    UploadMode::RawJpeg => uploader.send(&frame, UploadMode::RawJpeg).await?,
                    UploadMode::Packaged => {
                        let payload = package::build(
                            &frame,
                            frame.captured_at(),
                            &config.identity,
                            &telemetry.sample(),
                        )?;
                        uploader
                            .send(payload.as_bytes(), UploadMode::Packaged)
                            .await?
                    }
                };
                frame.release();
                Ok::<StatusCode, StepError>(status)
            };
            match step.await {
                Ok(status) if status.is_success() => report.uploaded += 1,
                Ok(_) => report.rejected += 1,
                Err(e) => {
                    warn!("[CYCLE] frame {} dropped: {}", n, e);
                    report.failed += 1;
                }
            }

            if n < config.capture_count {
                delay
                    .delay_ms(network::millis(config.capture_interval))
                    .await;
            }
        }
        report.frames = session.stats();

        finish(report, &mut board, &mut delay).await
    }
}

async fn finish<B: Board, D: DelayNs>(
    mut report: CycleReport,
    board: &mut B,
    delay: &mut D,
) -> CycleReport {
    report.enter(CyclePhase::FinalLedSignal);
    signal(board, delay, LedPattern::Shutdown).await;
    report.enter(CyclePhase::DeepSleep);
    info!(
        "[CYCLE] done ({:?}): {} attempted, {} uploaded, {} rejected, {} failed",
        report.outcome, report.attempts, report.uploaded, report.rejected, report.failed
    );
    report
}
