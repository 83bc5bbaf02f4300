//! Camera session
//!
//! Wraps a [`CameraDriver`] with the fixed capture profile and enforces the
//! frame-buffer discipline: a [`Frame`] mutably borrows its session and hands
//! its buffer back to the driver exactly once, when it is released or dropped.
//! The pool holds a single buffer, so "acquire, use, release before the next
//! acquire" is checked by the borrow checker instead of by convention.

use core::fmt;
use core::ops::Deref;

use log::{debug, error, info};

use crate::timestamp::Timestamp;

/// Camera failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraError {
    /// The sensor did not answer on the control bus.
    SensorNotFound,
    /// The sensor answered with an unexpected product id.
    UnsupportedSensor(u8),
    /// Control bus transfer failed after the sensor was detected.
    Bus,
    /// Frame buffers could not be allocated.
    BufferAllocation,
    /// The capture DMA failed or returned no data.
    Capture,
    /// The profile asks for something the driver cannot do.
    Config,
    /// `capture` before a successful `initialize`.
    NotInitialized,
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::SensorNotFound => f.write_str("sensor not responding"),
            CameraError::UnsupportedSensor(pid) => write!(f, "unsupported sensor pid 0x{pid:02x}"),
            CameraError::Bus => f.write_str("sensor control bus error"),
            CameraError::BufferAllocation => f.write_str("frame buffer allocation failed"),
            CameraError::Capture => f.write_str("frame capture failed"),
            CameraError::Config => f.write_str("unsupported capture profile"),
            CameraError::NotInitialized => f.write_str("camera not initialized"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// 320x240
    Qvga,
    /// 400x296
    Cif,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub const fn dimensions(self) -> (u16, u16) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLocation {
    Internal,
    /// PSRAM
    External,
}

/// What to hand out when the application asks for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabPolicy {
    /// Fill a buffer only when the pool has a free one; return the most
    /// recent frame.
    WhenEmpty,
    /// Keep overwriting and return the latest complete frame.
    Latest,
}

/// The fixed capture configuration handed to the driver at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    pub xclk_hz: u32,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    /// 0-63, lower is better quality and a bigger file.
    pub jpeg_quality: u8,
    pub buffer_count: u8,
    pub buffer_location: BufferLocation,
    pub grab_policy: GrabPolicy,
}

impl CaptureProfile {
    pub const MAX_JPEG_QUALITY: u8 = 63;

    /// VGA JPEG at quality 12 from a 10 MHz XCLK, one PSRAM buffer.
    pub const fn standard() -> Self {
        Self {
            xclk_hz: 10_000_000,
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Vga,
            jpeg_quality: 12,
            buffer_count: 1,
            buffer_location: BufferLocation::External,
            grab_policy: GrabPolicy::WhenEmpty,
        }
    }

    fn validate(&self) -> Result<(), CameraError> {
        if self.jpeg_quality > Self::MAX_JPEG_QUALITY || self.buffer_count == 0 {
            return Err(CameraError::Config);
        }
        Ok(())
    }
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// Sensor gain ceiling, as a multiple of unity gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainCeiling {
    X2,
    X4,
    X8,
    X16,
    X32,
    X64,
    X128,
}

/// Post-init image tuning. Fixed values, not adapted at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorTuning {
    pub auto_white_balance: bool,
    pub auto_gain: bool,
    pub auto_exposure: bool,
    /// -2..=2
    pub brightness: i8,
    /// -2..=2
    pub saturation: i8,
    pub gain_ceiling: GainCeiling,
}

impl SensorTuning {
    /// Auto everything, brightness up one step, saturation down one step,
    /// gain ceiling raised to 8x. Leans towards dim scenes.
    pub const fn low_light() -> Self {
        Self {
            auto_white_balance: true,
            auto_gain: true,
            auto_exposure: true,
            brightness: 1,
            saturation: -1,
            gain_ceiling: GainCeiling::X8,
        }
    }
}

/// The sensor + capture peripheral, as the platform provides it.
pub trait CameraDriver {
    /// One filled frame buffer from the driver's pool.
    type Buffer: AsRef<[u8]>;

    fn initialize(&mut self, profile: &CaptureProfile) -> Result<(), CameraError>;

    fn tune(&mut self, tuning: &SensorTuning) -> Result<(), CameraError>;

    /// Blocks until one frame is available per the grab policy.
    fn acquire(&mut self) -> Result<Self::Buffer, CameraError>;

    /// Give a buffer back to the pool.
    fn release(&mut self, buffer: Self::Buffer);
}

impl<T: CameraDriver + ?Sized> CameraDriver for &mut T {
    type Buffer = T::Buffer;

    fn initialize(&mut self, profile: &CaptureProfile) -> Result<(), CameraError> {
        (**self).initialize(profile)
    }

    fn tune(&mut self, tuning: &SensorTuning) -> Result<(), CameraError> {
        (**self).tune(tuning)
    }

    fn acquire(&mut self) -> Result<Self::Buffer, CameraError> {
        (**self).acquire()
    }

    fn release(&mut self, buffer: Self::Buffer) {
        (**self).release(buffer)
    }
}

/// Acquire/release bookkeeping of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub acquired: u32,
    pub released: u32,
}

impl FrameStats {
    pub fn outstanding(&self) -> u32 {
        self.acquired - self.released
    }
}

/// An initialized camera.
pub struct CameraSession<D: CameraDriver> {
    driver: D,
    profile: CaptureProfile,
    stats: FrameStats,
}

impl<D: CameraDriver> CameraSession<D> {
    /// Bring the sensor up with `profile`. On failure the driver is handed
    /// back along with the error.
    pub fn initialize(mut driver: D, profile: CaptureProfile) -> Result<Self, (CameraError, D)> {
        if let Err(e) = profile.validate().and_then(|_| driver.initialize(&profile)) {
            error!("[CAM] init failed: {}", e);
            return Err((e, driver));
        }
        let (w, h) = profile.frame_size.dimensions();
        info!("[CAM] ready: {}x{} jpeg q{}", w, h, profile.jpeg_quality);
        Ok(Self {
            driver,
            profile,
            stats: FrameStats::default(),
        })
    }

    pub fn tune(&mut self, tuning: &SensorTuning) -> Result<(), CameraError> {
        self.driver.tune(tuning)
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Take one frame. The returned [`Frame`] owns the pool's buffer until
    /// it is released or dropped.
    pub fn capture(&mut self, captured_at: Timestamp) -> Result<Frame<'_, D>, CameraError> {
        let format = self.profile.pixel_format;
        let buffer = self.driver.acquire()?;
        self.stats.acquired += 1;
        debug!("[CAM] frame {} acquired", self.stats.acquired);
        Ok(Frame {
            session: self,
            buffer: Some(buffer),
            format,
            captured_at,
        })
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    fn give_back(&mut self, buffer: D::Buffer) {
        self.driver.release(buffer);
        self.stats.released += 1;
    }
}

/// A captured frame on loan from a [`CameraSession`].
pub struct Frame<'s, D: CameraDriver> {
    session: &'s mut CameraSession<D>,
    buffer: Option<D::Buffer>,
    format: PixelFormat,
    captured_at: Timestamp,
}

impl<D: CameraDriver> Frame<'_, D> {
    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => buffer.as_ref(),
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    /// Hand the buffer back now. Dropping the frame does the same.
    pub fn release(self) {}
}

impl<D: CameraDriver> Deref for Frame<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl<D: CameraDriver> Drop for Frame<'_, D> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.session.give_back(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    #[derive(Debug, Default)]
    struct PoolOfOne {
        free: bool,
        fail_init: bool,
        released: u32,
    }

    impl CameraDriver for PoolOfOne {
        type Buffer = Vec<u8>;

        fn initialize(&mut self, _profile: &CaptureProfile) -> Result<(), CameraError> {
            if self.fail_init {
                return Err(CameraError::SensorNotFound);
            }
            self.free = true;
            Ok(())
        }

        fn tune(&mut self, _tuning: &SensorTuning) -> Result<(), CameraError> {
            Ok(())
        }

        fn acquire(&mut self) -> Result<Vec<u8>, CameraError> {
            if !self.free {
                return Err(CameraError::Capture);
            }
            self.free = false;
            Ok(vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9])
        }

        fn release(&mut self, _buffer: Vec<u8>) {
            assert!(!self.free, "double release");
            self.free = true;
            self.released += 1;
        }
    }

    #[test]
    fn dropping_a_frame_returns_its_buffer() {
        let mut session =
            CameraSession::initialize(PoolOfOne::default(), CaptureProfile::standard()).unwrap();
        for _ in 0..3 {
            let frame = session.capture(Timestamp::from_unix_secs(10)).unwrap();
            assert_eq!(frame.len(), 5);
            assert_eq!(frame.format(), PixelFormat::Jpeg);
            assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        }
        let stats = session.stats();
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.released, 3);
        assert_eq!(session.into_driver().released, 3);
    }

    #[test]
    fn explicit_release_counts_once() {
        let mut session =
            CameraSession::initialize(PoolOfOne::default(), CaptureProfile::standard()).unwrap();
        let frame = session.capture(Timestamp::from_unix_secs(0)).unwrap();
        frame.release();
        assert_eq!(session.stats().outstanding(), 0);
        assert_eq!(session.stats().released, 1);
    }

    #[test]
    fn init_failure_hands_the_driver_back() {
        let driver = PoolOfOne {
            fail_init: true,
            ..Default::default()
        };
        let (err, driver) =
            match CameraSession::initialize(driver, CaptureProfile::standard()) {
                Err(failed) => failed,
                Ok(_) => panic!("init should fail"),
            };
        assert_eq!(err, CameraError::SensorNotFound);
        assert!(!driver.free);
    }

    #[test]
    fn out_of_range_quality_is_rejected_before_the_driver_runs() {
        let profile = CaptureProfile {
            jpeg_quality: 64,
            ..CaptureProfile::standard()
        };
        let (err, driver) = match CameraSession::initialize(PoolOfOne::default(), profile) {
            Err(failed) => failed,
            Ok(_) => panic!("init should fail"),
        };
        assert_eq!(err, CameraError::Config);
        assert!(!driver.free);
    }
}
