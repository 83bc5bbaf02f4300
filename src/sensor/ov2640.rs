//! # OV2640 driver
//!
//! Register-level bring-up of the OmniVision OV2640 over SCCB (I²C
//! compatible): reset, product-id probe, JPEG output at a chosen output size
//! and quality, and the handful of image controls [`SensorTuning`] exposes.
//!
//! The chip has two register banks selected through `0xFF`. Every operation
//! selects its bank first, so the driver keeps no bank state between calls.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::camera::{CameraError, CaptureProfile, FrameSize, GainCeiling, PixelFormat, SensorTuning};

/// Fixed SCCB address.
pub const ADDRESS: u8 = 0x30;

/// High byte of the product id.
pub const PID: u8 = 0x26;

const BANK_SEL: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bank {
    Dsp = 0x00,
    Sensor = 0x01,
}

// Sensor bank.
const REG04: u8 = 0x04;
const COM2: u8 = 0x09;
const PIDH: u8 = 0x0A;
const CLKRC: u8 = 0x11;
const COM7: u8 = 0x12;
const COM8: u8 = 0x13;
const COM9: u8 = 0x14;
const COM10: u8 = 0x15;
const HREFST: u8 = 0x17;
const HREFEND: u8 = 0x18;
const VSTRT: u8 = 0x19;
const VEND: u8 = 0x1A;
const AEW: u8 = 0x24;
const AEB: u8 = 0x25;
const VV: u8 = 0x26;
const REG32: u8 = 0x32;
const BD50: u8 = 0x4F;
const BD60: u8 = 0x50;

const COM7_SRST: u8 = 0x80;
const COM8_AGC_EN: u8 = 0x04;
const COM8_AEC_EN: u8 = 0x01;
const COM9_AGC_GAIN_MASK: u8 = 0xE0;

// DSP bank.
const R_BYPASS: u8 = 0x05;
const QS: u8 = 0x44;
const CTRLI: u8 = 0x50;
const HSIZE: u8 = 0x51;
const VSIZE: u8 = 0x52;
const XOFFL: u8 = 0x53;
const YOFFL: u8 = 0x54;
const VHYX: u8 = 0x55;
const TEST: u8 = 0x57;
const ZMOW: u8 = 0x5A;
const ZMOH: u8 = 0x5B;
const ZMHH: u8 = 0x5C;
const BPADDR: u8 = 0x7C;
const BPDATA: u8 = 0x7D;
const HSIZE8: u8 = 0xC0;
const VSIZE8: u8 = 0xC1;
const CTRL1: u8 = 0xC3;
const IMAGE_MODE: u8 = 0xDA;
const RESET: u8 = 0xE0;

const CTRL1_AWB: u8 = 0x08;
const R_BYPASS_DSP_BYPASS: u8 = 0x01;
const R_BYPASS_DSP_EN: u8 = 0x00;

/// Full-resolution (UXGA) sensor window with auto exposure, auto gain and
/// banding filter enabled.
const SENSOR_BASE: &[(u8, u8)] = &[
    (COM7, 0x00),
    (CLKRC, 0x01),
    (COM2, 0x02),
    (REG04, 0x28),
    (COM8, 0xE5),
    (COM9, 0x48),
    (COM10, 0x00),
    (HREFST, 0x11),
    (HREFEND, 0x75),
    (VSTRT, 0x01),
    (VEND, 0x97),
    (REG32, 0x36),
    (AEW, 0x40),
    (AEB, 0x38),
    (VV, 0x81),
    (BD50, 0xCA),
    (BD60, 0xA8),
];

/// DSP input sized to the 1600x1200 sensor window.
const DSP_BASE: &[(u8, u8)] = &[
    (R_BYPASS, R_BYPASS_DSP_BYPASS),
    (HSIZE8, 0xC8),
    (VSIZE8, 0x96),
    (CTRLI, 0x00),
    (HSIZE, 0x90),
    (VSIZE, 0x2C),
    (XOFFL, 0x00),
    (YOFFL, 0x00),
    (VHYX, 0x88),
    (TEST, 0x00),
    (R_BYPASS, R_BYPASS_DSP_EN),
];

/// Switch the DVP output to the JPEG encoder.
const DSP_JPEG: &[(u8, u8)] = &[
    (RESET, 0x14),
    (IMAGE_MODE, 0x18),
    (0xD7, 0x03),
    (0xE1, 0x77),
    (RESET, 0x00),
];

// Indexed SDE writes through BPADDR/BPDATA, steps -2..=2.
const BRIGHTNESS: [u8; 5] = [0x00, 0x10, 0x20, 0x30, 0x40];
const SATURATION: [u8; 5] = [0x28, 0x38, 0x48, 0x58, 0x68];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// No acknowledge on the id read.
    NotDetected,
    /// Something answered, but not an OV2640.
    UnexpectedPid(u8),
    /// Bus error after detection.
    I2c(E),
    /// A setting outside what the sensor supports.
    OutOfRange,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::I2c(e)
    }
}

impl<E> From<Error<E>> for CameraError {
    fn from(e: Error<E>) -> Self {
        match e {
            Error::NotDetected => CameraError::SensorNotFound,
            Error::UnexpectedPid(pid) => CameraError::UnsupportedSensor(pid),
            Error::I2c(_) => CameraError::Bus,
            Error::OutOfRange => CameraError::Config,
        }
    }
}

pub struct Ov2640<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, D> Ov2640<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Soft reset. Registers take a few ms to come back.
    pub fn reset(&mut self) -> Result<(), Error<I2C::Error>> {
        self.select(Bank::Sensor)?;
        self.write(COM7, COM7_SRST)?;
        self.delay.delay_ms(10);
        Ok(())
    }

    /// Read the product id and check it is an OV2640.
    pub fn probe(&mut self) -> Result<u8, Error<I2C::Error>> {
        self.select(Bank::Sensor).map_err(|_| Error::NotDetected)?;
        let pid = self.read(PIDH).map_err(|_| Error::NotDetected)?;
        if pid != PID {
            return Err(Error::UnexpectedPid(pid));
        }
        Ok(pid)
    }

    /// Reset, probe, then configure JPEG output per `profile`.
    pub fn init(&mut self, profile: &CaptureProfile) -> Result<(), Error<I2C::Error>> {
        if profile.pixel_format != PixelFormat::Jpeg {
            return Err(Error::OutOfRange);
        }
        self.probe()?;
        self.reset()?;
        self.select(Bank::Sensor)?;
        self.write_table(SENSOR_BASE)?;
        self.select(Bank::Dsp)?;
        self.write_table(DSP_BASE)?;
        self.write_table(DSP_JPEG)?;
        self.set_frame_size(profile.frame_size)?;
        self.set_quality(profile.jpeg_quality)
    }

    /// Scale the DSP output to `size`.
    pub fn set_frame_size(&mut self, size: FrameSize) -> Result<(), Error<I2C::Error>> {
        let (w, h) = size.dimensions();
        self.select(Bank::Dsp)?;
        self.write_table(&[
            (R_BYPASS, R_BYPASS_DSP_BYPASS),
            (ZMOW, ((w >> 2) & 0xFF) as u8),
            (ZMOH, ((h >> 2) & 0xFF) as u8),
            (ZMHH, (((h >> 8) & 0x04) | ((w >> 10) & 0x03)) as u8),
            (R_BYPASS, R_BYPASS_DSP_EN),
        ])
    }

    /// JPEG quantizer scale, 0-63. Lower is better.
    pub fn set_quality(&mut self, quality: u8) -> Result<(), Error<I2C::Error>> {
        if quality > CaptureProfile::MAX_JPEG_QUALITY {
            return Err(Error::OutOfRange);
        }
        self.select(Bank::Dsp)?;
        self.write(QS, quality)
    }

    pub fn apply_tuning(&mut self, tuning: &SensorTuning) -> Result<(), Error<I2C::Error>> {
        let brightness = step(tuning.brightness)?;
        let saturation = step(tuning.saturation)?;

        self.select(Bank::Dsp)?;
        self.update(CTRL1, CTRL1_AWB, flag(tuning.auto_white_balance, CTRL1_AWB))?;
        self.write_table(&[
            (BPADDR, 0x00),
            (BPDATA, 0x04),
            (BPADDR, 0x09),
            (BPDATA, BRIGHTNESS[brightness]),
            (BPDATA, 0x00),
        ])?;
        self.write_table(&[
            (BPADDR, 0x00),
            (BPDATA, 0x02),
            (BPADDR, 0x03),
            (BPDATA, SATURATION[saturation]),
            (BPDATA, SATURATION[saturation]),
        ])?;

        self.select(Bank::Sensor)?;
        let com8 = flag(tuning.auto_gain, COM8_AGC_EN) | flag(tuning.auto_exposure, COM8_AEC_EN);
        self.update(COM8, COM8_AGC_EN | COM8_AEC_EN, com8)?;
        self.update(COM9, COM9_AGC_GAIN_MASK, gain_ceiling_bits(tuning.gain_ceiling))
    }

    fn select(&mut self, bank: Bank) -> Result<(), I2C::Error> {
        self.i2c.write(ADDRESS, &[BANK_SEL, bank as u8])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Error<I2C::Error>> {
        self.i2c.write(ADDRESS, &[reg, value])?;
        Ok(())
    }

    fn read(&mut self, reg: u8) -> Result<u8, I2C::Error> {
        let mut value = [0u8];
        self.i2c.write_read(ADDRESS, &[reg], &mut value)?;
        Ok(value[0])
    }

    fn update(&mut self, reg: u8, mask: u8, bits: u8) -> Result<(), Error<I2C::Error>> {
        let current = self.read(reg)?;
        self.write(reg, (current & !mask) | (bits & mask))
    }

    fn write_table(&mut self, table: &[(u8, u8)]) -> Result<(), Error<I2C::Error>> {
        for &(reg, value) in table {
            self.write(reg, value)?;
        }
        Ok(())
    }
}

fn flag(on: bool, bit: u8) -> u8 {
    if on { bit } else { 0 }
}

/// -2..=2 to a table index.
fn step<E>(level: i8) -> Result<usize, Error<E>> {
    match level {
        -2..=2 => Ok((level + 2) as usize),
        _ => Err(Error::OutOfRange),
    }
}

fn gain_ceiling_bits(ceiling: GainCeiling) -> u8 {
    let index = match ceiling {
        GainCeiling::X2 => 0,
        GainCeiling::X4 => 1,
        GainCeiling::X8 => 2,
        GainCeiling::X16 => 3,
        GainCeiling::X32 => 4,
        GainCeiling::X64 => 5,
        GainCeiling::X128 => 6,
    };
    index << 5
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::vec;
    use std::vec::Vec;

    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    fn bank(bank: Bank) -> I2cTransaction {
        I2cTransaction::write(ADDRESS, vec![BANK_SEL, bank as u8])
    }

    fn writes(table: &[(u8, u8)]) -> Vec<I2cTransaction> {
        table
            .iter()
            .map(|&(reg, value)| I2cTransaction::write(ADDRESS, vec![reg, value]))
            .collect()
    }

    #[test]
    fn probe_accepts_the_ov2640_pid() {
        let expectations = [
            bank(Bank::Sensor),
            I2cTransaction::write_read(ADDRESS, vec![PIDH], vec![0x26]),
        ];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        assert_eq!(sensor.probe(), Ok(PID));

        i2c.done();
    }

    #[test]
    fn probe_reports_a_silent_bus_as_not_detected() {
        let expectations = [bank(Bank::Sensor).with_error(ErrorKind::Other)];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        let err = sensor.probe().unwrap_err();
        assert_eq!(err, Error::NotDetected);
        assert_eq!(CameraError::from(err), CameraError::SensorNotFound);

        i2c.done();
    }

    #[test]
    fn other_sensors_are_rejected_before_any_configuration() {
        let expectations = [
            bank(Bank::Sensor),
            I2cTransaction::write_read(ADDRESS, vec![PIDH], vec![0x36]),
        ];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        let err = sensor.init(&CaptureProfile::standard()).unwrap_err();
        assert_eq!(CameraError::from(err), CameraError::UnsupportedSensor(0x36));

        i2c.done();
    }

    #[test]
    fn init_programs_jpeg_vga_at_the_profile_quality() {
        let mut expectations = vec![
            bank(Bank::Sensor),
            I2cTransaction::write_read(ADDRESS, vec![PIDH], vec![PID]),
            bank(Bank::Sensor),
            I2cTransaction::write(ADDRESS, vec![COM7, COM7_SRST]),
            bank(Bank::Sensor),
        ];
        expectations.extend(writes(SENSOR_BASE));
        expectations.push(bank(Bank::Dsp));
        expectations.extend(writes(DSP_BASE));
        expectations.extend(writes(DSP_JPEG));
        expectations.push(bank(Bank::Dsp));
        // 640x480 -> 160x120 in zoom units
        expectations.extend(writes(&[
            (R_BYPASS, 0x01),
            (ZMOW, 0xA0),
            (ZMOH, 0x78),
            (ZMHH, 0x00),
            (R_BYPASS, 0x00),
        ]));
        expectations.push(bank(Bank::Dsp));
        expectations.push(I2cTransaction::write(ADDRESS, vec![QS, 12]));

        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        sensor.init(&CaptureProfile::standard()).unwrap();

        i2c.done();
    }

    #[test]
    fn uxga_sets_the_high_zoom_bits() {
        let mut expectations = vec![bank(Bank::Dsp)];
        // 1600x1200 -> 400x300, both past 8 bits
        expectations.extend(writes(&[
            (R_BYPASS, 0x01),
            (ZMOW, 0x90),
            (ZMOH, 0x2C),
            (ZMHH, 0x05),
            (R_BYPASS, 0x00),
        ]));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        sensor.set_frame_size(FrameSize::Uxga).unwrap();

        i2c.done();
    }

    #[test]
    fn low_light_tuning() {
        let mut expectations = vec![
            bank(Bank::Dsp),
            I2cTransaction::write_read(ADDRESS, vec![CTRL1], vec![0xF7]),
            I2cTransaction::write(ADDRESS, vec![CTRL1, 0xFF]),
        ];
        expectations.extend(writes(&[
            (BPADDR, 0x00),
            (BPDATA, 0x04),
            (BPADDR, 0x09),
            (BPDATA, 0x30),
            (BPDATA, 0x00),
            (BPADDR, 0x00),
            (BPDATA, 0x02),
            (BPADDR, 0x03),
            (BPDATA, 0x38),
            (BPDATA, 0x38),
        ]));
        expectations.extend([
            bank(Bank::Sensor),
            I2cTransaction::write_read(ADDRESS, vec![COM8], vec![0xE0]),
            I2cTransaction::write(ADDRESS, vec![COM8, 0xE5]),
            I2cTransaction::write_read(ADDRESS, vec![COM9], vec![0x08]),
            I2cTransaction::write(ADDRESS, vec![COM9, 0x48]),
        ]);
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        sensor.apply_tuning(&SensorTuning::low_light()).unwrap();

        i2c.done();
    }

    #[test]
    fn out_of_range_settings_touch_nothing() {
        let expectations: [I2cTransaction; 0] = [];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Ov2640::new(&mut i2c, NoopDelay::new());

        assert_eq!(sensor.set_quality(64), Err(Error::OutOfRange));
        let tuning = SensorTuning {
            brightness: 3,
            ..SensorTuning::low_light()
        };
        assert_eq!(sensor.apply_tuning(&tuning), Err(Error::OutOfRange));

        i2c.done();
    }
}
