//! Opaque camera and grabber device seam.
//!
//! These traits mirror the PCO SDK surface used by the controller: the
//! `CPco_com` camera side and the `CPco_grab_clhs` frame grabber side of a
//! CameraLink HS link. Every operation reports a 32-bit PCO error code on
//! failure, translated to text via [`pco_error_text`].
//!
//! The real SDK wrapper plugs in behind [`PcoDeviceFactory`]; the simulated
//! implementation lives in [`crate::camera::sim`].

use std::sync::Arc;

use thiserror::Error;

pub const PCO_NOERROR: u32 = 0;

pub const PCO_ERROR_TIMEOUT: u32 = 0x8000_2001;
pub const PCO_ERROR_NOT_OPEN: u32 = 0x8000_2002;
pub const PCO_ERROR_BUSY: u32 = 0x8000_2003;
pub const PCO_ERROR_INVALID_VALUE: u32 = 0x8000_2004;
pub const PCO_ERROR_DRIVER: u32 = 0x8000_2005;

/// Translate a PCO error code to descriptive text.
pub fn pco_error_text(code: u32) -> &'static str {
    match code {
        PCO_NOERROR => "no error",
        PCO_ERROR_TIMEOUT => "image wait timed out",
        PCO_ERROR_NOT_OPEN => "device not open",
        PCO_ERROR_BUSY => "device busy",
        PCO_ERROR_INVALID_VALUE => "invalid parameter value",
        PCO_ERROR_DRIVER => "internal driver error",
        _ => "unrecognised PCO error",
    }
}

/// A non-zero status code returned by the camera or grabber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("PCO error 0x{code:08X}: {message}")]
pub struct PcoError {
    pub code: u32,
    pub message: String,
}

impl PcoError {
    pub fn from_code(code: u32) -> Self {
        Self {
            code,
            message: pco_error_text(code).to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code == PCO_ERROR_TIMEOUT
    }
}

/// Static camera description reported after opening.
#[derive(Debug, Clone, Copy)]
pub struct CameraDescription {
    /// Per-pixel bit depth.
    pub dynamic_resolution: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl CameraDescription {
    /// Bytes per pixel implied by the dynamic resolution.
    pub fn pixel_bytes(&self) -> u32 {
        (self.dynamic_resolution - 1) / 8 + 1
    }
}

/// Camera communication side of the CameraLink pair.
pub trait PcoCamera: Send + Sync {
    fn open(&self, camera_num: u32) -> Result<(), PcoError>;
    fn close(&self) -> Result<(), PcoError>;

    /// Camera hardware type code and serial number.
    fn camera_type(&self) -> Result<(u32, u64), PcoError>;
    fn description(&self) -> Result<CameraDescription, PcoError>;
    fn info(&self) -> Result<String, PcoError>;

    /// Commit pending settings to the camera.
    fn arm(&self) -> Result<(), PcoError>;

    /// Current (delay, exposure) register counts.
    fn delay_exposure(&self) -> Result<(u32, u32), PcoError>;
    fn set_delay_exposure(&self, delay: u32, exposure: u32) -> Result<(), PcoError>;

    /// Current (delay, exposure) timebase register encodings.
    fn timebase(&self) -> Result<(u16, u16), PcoError>;
    fn set_timebase(&self, delay_timebase: u16, exposure_timebase: u16) -> Result<(), PcoError>;

    fn set_timestamp_mode(&self, mode: u16) -> Result<(), PcoError>;

    fn recording_state(&self) -> Result<bool, PcoError>;
    fn set_recording_state(&self, running: bool) -> Result<(), PcoError>;
}

/// Frame grabber side of the CameraLink pair.
pub trait PcoGrabber: Send + Sync {
    fn open(&self, camera_num: u32) -> Result<(), PcoError>;
    fn close(&self) -> Result<(), PcoError>;

    fn set_timeout(&self, timeout_ms: u32) -> Result<(), PcoError>;

    /// Commit pending settings to the grabber after the camera is armed.
    fn post_arm(&self) -> Result<(), PcoError>;

    /// Actual image size delivered by the link.
    fn actual_size(&self) -> Result<(u32, u32), PcoError>;

    fn start_acquire(&self) -> Result<(), PcoError>;
    fn stop_acquire(&self) -> Result<(), PcoError>;

    /// Block until the next image is delivered into `image`, bounded by
    /// `timeout_ms`.
    fn wait_for_next_image(&self, image: &mut [u8], timeout_ms: u32) -> Result<(), PcoError>;
}

/// Factory creating a linked camera/grabber pair.
pub trait PcoDeviceFactory: Send + Sync {
    fn create(&self) -> (Arc<dyn PcoCamera>, Arc<dyn PcoGrabber>);
}
