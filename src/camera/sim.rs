//! Simulated camera and grabber pair.
//!
//! A software stand-in for the PCO SDK used by the tests and by the daemon
//! when no hardware is present. The simulation models the open/arm/record
//! lifecycle, delay and exposure registers, grabber timeouts and image
//! delivery, and stamps each synthetic image with the camera's BCD image
//! number in the first four pixels, like the real camera's binary timestamp
//! mode.
//!
//! Tests drive failure injection and inspect device registers through a
//! [`SimHandle`] cloned from the factory before it is handed to the
//! controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::device::{
    CameraDescription, PcoCamera, PcoDeviceFactory, PcoError, PcoGrabber, PCO_ERROR_BUSY,
    PCO_ERROR_DRIVER, PCO_ERROR_INVALID_VALUE, PCO_ERROR_NOT_OPEN, PCO_ERROR_TIMEOUT,
};

/// Static properties of the simulated camera.
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub width: u32,
    pub height: u32,
    pub dynamic_resolution: u32,
    pub camera_type: u32,
    pub serial: u64,
    pub info: String,
    /// Time between simulated frames while recording.
    pub frame_interval: Duration,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            dynamic_resolution: 16,
            camera_type: 0x1340,
            serial: 100_251,
            info: "pco.sim cameralink".to_string(),
            frame_interval: Duration::from_millis(5),
        }
    }
}

impl SimSettings {
    pub fn image_bytes(&self) -> usize {
        let pixel_bytes = (self.dynamic_resolution - 1) / 8 + 1;
        (self.width * self.height * pixel_bytes) as usize
    }
}

/// Failure injection switches, one per device operation of interest.
#[derive(Debug, Default)]
pub struct SimFailures {
    pub open_camera: AtomicBool,
    pub open_grabber: AtomicBool,
    pub arm: AtomicBool,
    pub post_arm: AtomicBool,
    pub start_recording: AtomicBool,
}

#[derive(Debug)]
struct SimState {
    camera_open: bool,
    grabber_open: bool,
    recording: bool,
    acquiring: bool,
    delay_time: u32,
    exposure_time: u32,
    delay_timebase: u16,
    exposure_timebase: u16,
    timestamp_mode: u16,
    grabber_timeout_ms: u32,
    image_counter: u32,
    frames_remaining: Option<u32>,
}

impl Default for SimState {
    fn default() -> Self {
        // Power-on defaults: 10 ms exposure, 90 ms delay, both in ms (10 Hz).
        Self {
            camera_open: false,
            grabber_open: false,
            recording: false,
            acquiring: false,
            delay_time: 90,
            exposure_time: 10,
            delay_timebase: 2,
            exposure_timebase: 2,
            timestamp_mode: 1,
            grabber_timeout_ms: 10_000,
            image_counter: 0,
            frames_remaining: None,
        }
    }
}

struct SimShared {
    settings: SimSettings,
    failures: SimFailures,
    state: Mutex<SimState>,
}

impl SimShared {
    fn fail(&self, switch: &AtomicBool) -> Result<(), PcoError> {
        if switch.load(Ordering::SeqCst) {
            Err(PcoError::from_code(PCO_ERROR_DRIVER))
        } else {
            Ok(())
        }
    }
}

/// Test and inspection handle onto the simulated device pair.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<SimShared>,
}

impl SimHandle {
    pub fn settings(&self) -> &SimSettings {
        &self.shared.settings
    }

    pub fn failures(&self) -> &SimFailures {
        &self.shared.failures
    }

    /// Limit the number of frames the simulation will deliver; subsequent
    /// image waits time out.
    pub fn limit_frames(&self, count: u32) {
        self.shared.state.lock().unwrap().frames_remaining = Some(count);
    }

    /// Current (delay, exposure, delay_timebase, exposure_timebase) registers.
    pub fn delay_exposure_registers(&self) -> (u32, u32, u16, u16) {
        let state = self.shared.state.lock().unwrap();
        (
            state.delay_time,
            state.exposure_time,
            state.delay_timebase,
            state.exposure_timebase,
        )
    }

    pub fn timestamp_mode(&self) -> u16 {
        self.shared.state.lock().unwrap().timestamp_mode
    }

    pub fn is_recording(&self) -> bool {
        self.shared.state.lock().unwrap().recording
    }

    pub fn is_open(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.camera_open && state.grabber_open
    }

    pub fn is_camera_open(&self) -> bool {
        self.shared.state.lock().unwrap().camera_open
    }
}

/// Factory producing a linked simulated camera/grabber pair.
pub struct SimDeviceFactory {
    shared: Arc<SimShared>,
}

impl SimDeviceFactory {
    pub fn new(settings: SimSettings) -> Self {
        Self {
            shared: Arc::new(SimShared {
                settings,
                failures: SimFailures::default(),
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for SimDeviceFactory {
    fn default() -> Self {
        Self::new(SimSettings::default())
    }
}

impl PcoDeviceFactory for SimDeviceFactory {
    fn create(&self) -> (Arc<dyn PcoCamera>, Arc<dyn PcoGrabber>) {
        (
            Arc::new(SimCamera {
                shared: self.shared.clone(),
            }),
            Arc::new(SimGrabber {
                shared: self.shared.clone(),
            }),
        )
    }
}

pub struct SimCamera {
    shared: Arc<SimShared>,
}

impl SimCamera {
    fn with_open_state<T>(
        &self,
        op: impl FnOnce(&mut SimState) -> Result<T, PcoError>,
    ) -> Result<T, PcoError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.camera_open {
            return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
        }
        op(&mut state)
    }
}

impl PcoCamera for SimCamera {
    fn open(&self, _camera_num: u32) -> Result<(), PcoError> {
        self.shared.fail(&self.shared.failures.open_camera)?;
        self.shared.state.lock().unwrap().camera_open = true;
        Ok(())
    }

    fn close(&self) -> Result<(), PcoError> {
        let mut state = self.shared.state.lock().unwrap();
        state.camera_open = false;
        state.recording = false;
        Ok(())
    }

    fn camera_type(&self) -> Result<(u32, u64), PcoError> {
        self.with_open_state(|_| Ok((self.shared.settings.camera_type, self.shared.settings.serial)))
    }

    fn description(&self) -> Result<CameraDescription, PcoError> {
        self.with_open_state(|_| {
            Ok(CameraDescription {
                dynamic_resolution: self.shared.settings.dynamic_resolution,
                max_width: self.shared.settings.width,
                max_height: self.shared.settings.height,
            })
        })
    }

    fn info(&self) -> Result<String, PcoError> {
        self.with_open_state(|_| Ok(self.shared.settings.info.clone()))
    }

    fn arm(&self) -> Result<(), PcoError> {
        self.shared.fail(&self.shared.failures.arm)?;
        self.with_open_state(|state| {
            if state.recording {
                return Err(PcoError::from_code(PCO_ERROR_BUSY));
            }
            Ok(())
        })
    }

    fn delay_exposure(&self) -> Result<(u32, u32), PcoError> {
        self.with_open_state(|state| Ok((state.delay_time, state.exposure_time)))
    }

    fn set_delay_exposure(&self, delay: u32, exposure: u32) -> Result<(), PcoError> {
        self.with_open_state(|state| {
            state.delay_time = delay;
            state.exposure_time = exposure;
            Ok(())
        })
    }

    fn timebase(&self) -> Result<(u16, u16), PcoError> {
        self.with_open_state(|state| Ok((state.delay_timebase, state.exposure_timebase)))
    }

    fn set_timebase(&self, delay_timebase: u16, exposure_timebase: u16) -> Result<(), PcoError> {
        self.with_open_state(|state| {
            if delay_timebase > 2 || exposure_timebase > 2 {
                return Err(PcoError::from_code(PCO_ERROR_INVALID_VALUE));
            }
            state.delay_timebase = delay_timebase;
            state.exposure_timebase = exposure_timebase;
            Ok(())
        })
    }

    fn set_timestamp_mode(&self, mode: u16) -> Result<(), PcoError> {
        self.with_open_state(|state| {
            if mode > 2 {
                return Err(PcoError::from_code(PCO_ERROR_INVALID_VALUE));
            }
            state.timestamp_mode = mode;
            Ok(())
        })
    }

    fn recording_state(&self) -> Result<bool, PcoError> {
        self.with_open_state(|state| Ok(state.recording))
    }

    fn set_recording_state(&self, running: bool) -> Result<(), PcoError> {
        if running {
            self.shared.fail(&self.shared.failures.start_recording)?;
        }
        self.with_open_state(|state| {
            state.recording = running;
            Ok(())
        })
    }
}

pub struct SimGrabber {
    shared: Arc<SimShared>,
}

impl PcoGrabber for SimGrabber {
    fn open(&self, _camera_num: u32) -> Result<(), PcoError> {
        self.shared.fail(&self.shared.failures.open_grabber)?;
        let mut state = self.shared.state.lock().unwrap();
        if !state.camera_open {
            return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
        }
        state.grabber_open = true;
        Ok(())
    }

    fn close(&self) -> Result<(), PcoError> {
        let mut state = self.shared.state.lock().unwrap();
        state.grabber_open = false;
        state.acquiring = false;
        Ok(())
    }

    fn set_timeout(&self, timeout_ms: u32) -> Result<(), PcoError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.grabber_open {
            return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
        }
        state.grabber_timeout_ms = timeout_ms;
        Ok(())
    }

    fn post_arm(&self) -> Result<(), PcoError> {
        self.shared.fail(&self.shared.failures.post_arm)?;
        let state = self.shared.state.lock().unwrap();
        if !state.grabber_open {
            return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
        }
        Ok(())
    }

    fn actual_size(&self) -> Result<(u32, u32), PcoError> {
        let state = self.shared.state.lock().unwrap();
        if !state.grabber_open {
            return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
        }
        Ok((self.shared.settings.width, self.shared.settings.height))
    }

    fn start_acquire(&self) -> Result<(), PcoError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.grabber_open {
            return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
        }
        state.acquiring = true;
        Ok(())
    }

    fn stop_acquire(&self) -> Result<(), PcoError> {
        self.shared.state.lock().unwrap().acquiring = false;
        Ok(())
    }

    fn wait_for_next_image(&self, image: &mut [u8], timeout_ms: u32) -> Result<(), PcoError> {
        let interval = {
            let state = self.shared.state.lock().unwrap();
            if !state.grabber_open || !state.acquiring {
                return Err(PcoError::from_code(PCO_ERROR_NOT_OPEN));
            }
            let frames_exhausted = state.frames_remaining == Some(0);
            if !state.recording || frames_exhausted {
                drop(state);
                std::thread::sleep(Duration::from_millis(timeout_ms as u64));
                return Err(PcoError::from_code(PCO_ERROR_TIMEOUT));
            }
            self.shared.settings.frame_interval
        };

        // Simulated sensor readout.
        std::thread::sleep(interval);

        let image_nr = {
            let mut state = self.shared.state.lock().unwrap();
            if !state.grabber_open || !state.acquiring || !state.recording {
                return Err(PcoError::from_code(PCO_ERROR_TIMEOUT));
            }
            if let Some(remaining) = state.frames_remaining.as_mut() {
                *remaining -= 1;
            }
            state.image_counter += 1;
            state.image_counter
        };

        fill_image(image, image_nr);
        Ok(())
    }
}

/// Fill a simulated image with a moving gradient and stamp the BCD image
/// number into the first four pixels.
fn fill_image(image: &mut [u8], image_nr: u32) {
    for (index, pixel) in image.chunks_exact_mut(2).enumerate() {
        let value = ((index as u32 + image_nr) & 0x0FFF) as u16;
        pixel.copy_from_slice(&value.to_le_bytes());
    }
    stamp_bcd_image_nr(image, image_nr);
}

/// Encode `image_nr` as four BCD digit pairs in the first four pixels,
/// most significant pair first.
fn stamp_bcd_image_nr(image: &mut [u8], image_nr: u32) {
    let mut scale = 1_000_000u32;
    for pixel in image.chunks_exact_mut(2).take(4) {
        let pair = (image_nr / scale) % 100;
        let word = (((pair / 10) << 4) | (pair % 10)) as u16;
        pixel.copy_from_slice(&word.to_le_bytes());
        scale /= 100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_open_arm_record_deliver() {
        let factory = SimDeviceFactory::new(SimSettings {
            width: 8,
            height: 4,
            frame_interval: Duration::from_millis(1),
            ..SimSettings::default()
        });
        let (camera, grabber) = factory.create();

        camera.open(0).unwrap();
        grabber.open(0).unwrap();
        camera.arm().unwrap();
        grabber.post_arm().unwrap();
        camera.set_recording_state(true).unwrap();
        grabber.start_acquire().unwrap();

        let mut image = vec![0u8; factory.handle().settings().image_bytes()];
        grabber.wait_for_next_image(&mut image, 100).unwrap();
        grabber.wait_for_next_image(&mut image, 100).unwrap();

        // Second frame carries BCD image number 2.
        let word = u16::from_le_bytes([image[6], image[7]]);
        assert_eq!(word, 0x02);
    }

    #[test]
    fn operations_require_open_devices() {
        let factory = SimDeviceFactory::default();
        let (camera, grabber) = factory.create();

        assert_eq!(
            camera.arm().unwrap_err().code,
            PCO_ERROR_NOT_OPEN
        );
        assert_eq!(
            grabber.open(0).unwrap_err().code,
            PCO_ERROR_NOT_OPEN,
            "grabber requires the camera to be open"
        );
    }

    #[test]
    fn failure_injection_reports_driver_error() {
        let factory = SimDeviceFactory::default();
        let handle = factory.handle();
        let (camera, _grabber) = factory.create();

        camera.open(0).unwrap();
        handle.failures().arm.store(true, Ordering::SeqCst);
        assert_eq!(camera.arm().unwrap_err().code, PCO_ERROR_DRIVER);

        handle.failures().arm.store(false, Ordering::SeqCst);
        camera.arm().unwrap();
    }

    #[test]
    fn wait_times_out_when_not_recording() {
        let factory = SimDeviceFactory::default();
        let (camera, grabber) = factory.create();
        camera.open(0).unwrap();
        grabber.open(0).unwrap();
        grabber.start_acquire().unwrap();

        let mut image = vec![0u8; 16];
        let err = grabber.wait_for_next_image(&mut image, 5).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn frame_limit_exhausts_into_timeouts() {
        let factory = SimDeviceFactory::new(SimSettings {
            width: 4,
            height: 2,
            frame_interval: Duration::from_millis(1),
            ..SimSettings::default()
        });
        let handle = factory.handle();
        let (camera, grabber) = factory.create();
        camera.open(0).unwrap();
        grabber.open(0).unwrap();
        camera.set_recording_state(true).unwrap();
        grabber.start_acquire().unwrap();
        handle.limit_frames(1);

        let mut image = vec![0u8; 16];
        grabber.wait_for_next_image(&mut image, 50).unwrap();
        assert!(grabber
            .wait_for_next_image(&mut image, 5)
            .unwrap_err()
            .is_timeout());
    }

    #[test]
    fn bcd_stamp_encodes_digit_pairs() {
        let mut image = vec![0u8; 16];
        stamp_bcd_image_nr(&mut image, 1_234_567);
        let words: Vec<u16> = image
            .chunks_exact(2)
            .take(4)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect();
        // 01 23 45 67 as BCD pairs.
        assert_eq!(words, vec![0x01, 0x23, 0x45, 0x67]);
    }
}
