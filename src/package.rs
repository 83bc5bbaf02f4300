//! Upload payload assembly
//!
//! A packaged upload is a one-line text header followed directly by the JPEG
//! bytes. There is no framing: the receiver finds the image right after the
//! literal `image:` and reads it to the end of the body.

use alloc::vec::Vec;
use core::fmt::{self, Write};

use heapless::String;

use crate::timestamp::Timestamp;

/// Upper bound for the rendered header.
pub const HEADER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageError {
    /// The header does not fit in [`HEADER_CAPACITY`] bytes.
    HeaderTooLong,
    /// The capture time has no calendar date.
    InvalidTimestamp,
    /// The payload buffer could not be allocated.
    OutOfMemory,
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageError::HeaderTooLong => {
                write!(f, "header exceeds {} bytes", HEADER_CAPACITY)
            }
            PackageError::InvalidTimestamp => f.write_str("capture time out of range"),
            PackageError::OutOfMemory => f.write_str("payload allocation failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: &'static str,
}

impl DeviceIdentity {
    pub const fn new(id: &'static str) -> Self {
        Self { id }
    }

    pub fn as_str(&self) -> &'static str {
        self.id
    }
}

/// Board readings carried in the header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub temperature_c: f32,
    pub volts: f32,
}

impl Telemetry {
    /// Reported while the board has no temperature or supply sensing.
    pub const PLACEHOLDER: Telemetry = Telemetry {
        temperature_c: 25.0,
        volts: 3.3,
    };
}

pub trait TelemetrySource {
    fn sample(&mut self) -> Telemetry;
}

/// A fixed reading.
impl TelemetrySource for Telemetry {
    fn sample(&mut self) -> Telemetry {
        *self
    }
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for &mut T {
    fn sample(&mut self) -> Telemetry {
        (**self).sample()
    }
}

/// Header text + image bytes in one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    header_len: usize,
}

impl Payload {
    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }

    pub fn image(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// `id:<id>,date:<iso8601>,temp:<t>,volts:<v>,image:`
pub fn render_header(
    identity: &DeviceIdentity,
    captured_at: Timestamp,
    telemetry: &Telemetry,
) -> Result<String<HEADER_CAPACITY>, PackageError> {
    if captured_at.to_datetime().is_none() {
        return Err(PackageError::InvalidTimestamp);
    }
    let mut header = String::new();
    write!(
        header,
        "id:{},date:{},temp:{:.1},volts:{:.4},image:",
        identity.as_str(),
        captured_at,
        telemetry.temperature_c,
        telemetry.volts
    )
    .map_err(|_| PackageError::HeaderTooLong)?;
    Ok(header)
}

/// Render the header and copy it and `image` into a fresh buffer.
pub fn build(
    image: &[u8],
    captured_at: Timestamp,
    identity: &DeviceIdentity,
    telemetry: &Telemetry,
) -> Result<Payload, PackageError> {
    let header = render_header(identity, captured_at, telemetry)?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(header.len() + image.len())
        .map_err(|_| PackageError::OutOfMemory)?;
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(image);
    Ok(Payload {
        bytes,
        header_len: header.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: [u8; 6] = [0xFF, 0xD8, 0x00, 0x2C, 0xFF, 0xD9];

    #[test]
    fn header_then_image_bytes() {
        let telemetry = Telemetry {
            temperature_c: 21.46,
            volts: 3.71234,
        };
        let payload = build(
            &JPEG,
            Timestamp::from_unix_secs(1_700_000_000),
            &DeviceIdentity::new("cam-01"),
            &telemetry,
        )
        .unwrap();

        let expected = b"id:cam-01,date:2023-11-14T22:13:20Z,temp:21.5,volts:3.7123,image:";
        assert_eq!(payload.header(), &expected[..]);
        assert_eq!(payload.image(), &JPEG);
        assert_eq!(payload.len(), expected.len() + JPEG.len());
        assert!(payload.as_bytes().starts_with(expected));
    }

    #[test]
    fn empty_image_still_carries_a_header() {
        let payload = build(
            &[],
            Timestamp::from_unix_secs(0),
            &DeviceIdentity::new("x"),
            &Telemetry::PLACEHOLDER,
        )
        .unwrap();
        assert!(payload.image().is_empty());
        assert_eq!(
            payload.as_bytes(),
            b"id:x,date:1970-01-01T00:00:00Z,temp:25.0,volts:3.3000,image:"
        );
    }

    #[test]
    fn oversized_header_is_an_error_not_a_truncation() {
        static LONG_ID: [u8; 600] = [b'a'; 600];
        let id = core::str::from_utf8(&LONG_ID).unwrap();
        let err = build(
            &JPEG,
            Timestamp::from_unix_secs(0),
            &DeviceIdentity::new(id),
            &Telemetry::PLACEHOLDER,
        )
        .unwrap_err();
        assert_eq!(err, PackageError::HeaderTooLong);
    }

    /// An id that pads the epoch-0, placeholder-telemetry header to `len` bytes.
    fn id_for_header_len(len: usize) -> &'static str {
        static PADDING: [u8; HEADER_CAPACITY] = [b'c'; HEADER_CAPACITY];
        let fixed = "id:,date:1970-01-01T00:00:00Z,temp:25.0,volts:3.3000,image:".len();
        core::str::from_utf8(&PADDING[..len - fixed]).unwrap()
    }

    #[test]
    fn header_of_exactly_capacity_fits() {
        let payload = build(
            &JPEG,
            Timestamp::from_unix_secs(0),
            &DeviceIdentity::new(id_for_header_len(HEADER_CAPACITY)),
            &Telemetry::PLACEHOLDER,
        )
        .unwrap();
        assert_eq!(payload.header().len(), HEADER_CAPACITY);
        assert_eq!(payload.len(), HEADER_CAPACITY + JPEG.len());
        assert_eq!(payload.image(), &JPEG);
    }

    #[test]
    fn one_byte_over_capacity_is_rejected() {
        let err = build(
            &JPEG,
            Timestamp::from_unix_secs(0),
            &DeviceIdentity::new(id_for_header_len(HEADER_CAPACITY + 1)),
            &Telemetry::PLACEHOLDER,
        )
        .unwrap_err();
        assert_eq!(err, PackageError::HeaderTooLong);
    }

    #[test]
    fn out_of_range_capture_time_is_not_reported_as_too_long() {
        let err = render_header(
            &DeviceIdentity::new("cam-01"),
            Timestamp::from_unix_secs(u64::MAX),
            &Telemetry::PLACEHOLDER,
        )
        .unwrap_err();
        assert_eq!(err, PackageError::InvalidTimestamp);
    }

    #[test]
    fn fixed_telemetry_source_repeats_itself() {
        let mut source = Telemetry::PLACEHOLDER;
        assert_eq!(source.sample(), Telemetry::PLACEHOLDER);
    }
}
