//! Image sensor control-bus drivers.
//!
//! These only program the sensor over I²C. Pixel data arrives through the
//! platform's camera peripheral, which the firmware pairs with a driver from
//! here to implement [`crate::camera::CameraDriver`].

pub mod ov2640;
