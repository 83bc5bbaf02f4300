//! OV2640 on the Sense expansion board, read through the LCD_CAM peripheral.
//!
//! The sensor is programmed over I²C by [`wakecam::sensor::ov2640`]; pixel
//! data arrives by DMA into one static frame buffer in internal RAM. The
//! XCLK is generated by LEDC in `main` before the first register access.

use core::sync::atomic::{AtomicBool, Ordering};

use esp_hal::Blocking;
use esp_hal::delay::Delay;
use esp_hal::dma::{DmaDescriptor, DmaRxBuf};
use esp_hal::i2c::master::I2c;
use esp_hal::lcd_cam::cam::Camera;
use log::{debug, info, warn};
use wakecam::camera::BufferLocation;
use wakecam::sensor::ov2640::Ov2640;
use wakecam::{CameraDriver, CameraError, CaptureProfile, SensorTuning};

/// Enough for VGA at quality 10 and up.
const FRAME_SIZE: usize = 64 * 1024;
/// One descriptor moves at most 4092 bytes.
const DESC_COUNT: usize = FRAME_SIZE.div_ceil(4092);

static mut FRAME_BUFFER: [u8; FRAME_SIZE] = [0u8; FRAME_SIZE];

#[unsafe(link_section = ".dram2_uninit")]
static mut DMA_DESCRIPTORS: [DmaDescriptor; DESC_COUNT] = [DmaDescriptor::EMPTY; DESC_COUNT];

static DMA_BUFFER_TAKEN: AtomicBool = AtomicBool::new(false);

fn take_dma_buffer() -> Result<DmaRxBuf, CameraError> {
    if DMA_BUFFER_TAKEN.swap(true, Ordering::AcqRel) {
        return Err(CameraError::BufferAllocation);
    }
    // SAFETY: the flag above hands the statics out exactly once.
    let buf = unsafe {
        DmaRxBuf::new(
            &mut *core::ptr::addr_of_mut!(DMA_DESCRIPTORS),
            &mut *core::ptr::addr_of_mut!(FRAME_BUFFER),
        )
    };
    buf.map_err(|e| {
        warn!("[CAM] dma buffer rejected: {:?}", e);
        CameraError::BufferAllocation
    })
}

/// A filled DMA buffer, trimmed to the JPEG it holds.
pub struct JpegBuffer {
    rx: DmaRxBuf,
    len: usize,
}

impl AsRef<[u8]> for JpegBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.rx.as_slice()[..self.len]
    }
}

pub struct EspCamera<'d> {
    sensor: Ov2640<I2c<'d, Blocking>, Delay>,
    camera: Option<Camera<'d>>,
    rx: Option<DmaRxBuf>,
}

impl<'d> EspCamera<'d> {
    pub fn new(i2c: I2c<'d, Blocking>, camera: Camera<'d>) -> Self {
        Self {
            sensor: Ov2640::new(i2c, Delay::new()),
            camera: Some(camera),
            rx: None,
        }
    }
}

impl CameraDriver for EspCamera<'_> {
    type Buffer = JpegBuffer;

    fn initialize(&mut self, profile: &CaptureProfile) -> Result<(), CameraError> {
        if profile.buffer_count != 1 {
            return Err(CameraError::Config);
        }
        if profile.buffer_location == BufferLocation::External {
            debug!("[CAM] psram buffer requested, using internal RAM");
        }
        self.sensor.init(profile)?;
        if self.rx.is_none() {
            self.rx = Some(take_dma_buffer()?);
        }
        info!("[CAM] ov2640 ready, {} byte frame buffer", FRAME_SIZE);
        Ok(())
    }

    fn tune(&mut self, tuning: &SensorTuning) -> Result<(), CameraError> {
        self.sensor.apply_tuning(tuning)?;
        Ok(())
    }

    fn acquire(&mut self) -> Result<JpegBuffer, CameraError> {
        let Some(rx) = self.rx.take() else {
            return Err(CameraError::Capture);
        };
        let Some(camera) = self.camera.take() else {
            self.rx = Some(rx);
            return Err(CameraError::NotInitialized);
        };

        let transfer = match camera.receive(rx) {
            Ok(transfer) => transfer,
            Err((e, camera, rx)) => {
                warn!("[CAM] dma start failed: {:?}", e);
                self.camera = Some(camera);
                self.rx = Some(rx);
                return Err(CameraError::Capture);
            }
        };
        let (result, camera, rx) = transfer.wait();
        self.camera = Some(camera);
        if let Err(e) = result {
            warn!("[CAM] dma transfer failed: {:?}", e);
            self.rx = Some(rx);
            return Err(CameraError::Capture);
        }

        match jpeg_len(rx.as_slice()) {
            Some(len) => Ok(JpegBuffer { rx, len }),
            None => {
                warn!("[CAM] no complete jpeg in frame buffer");
                self.rx = Some(rx);
                Err(CameraError::Capture)
            }
        }
    }

    fn release(&mut self, buffer: JpegBuffer) {
        self.rx = Some(buffer.rx);
    }
}

/// Length up to and including the first EOI marker, if the data starts
/// with SOI. Entropy-coded data never contains a bare `FF D9`.
fn jpeg_len(data: &[u8]) -> Option<usize> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    data.windows(2)
        .position(|w| w == [0xFF, 0xD9])
        .map(|i| i + 2)
}
