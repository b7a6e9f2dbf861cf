//! Camera controller and acquisition service loop.
//!
//! The controller owns the camera and grabber handles, the configuration
//! and status containers, the delay/exposure register state and the state
//! machine. Control-channel handlers call into it on the control thread;
//! the acquisition service runs on its own thread for the lifetime of the
//! decoder and shares only atomics with the control side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::buffer::FrameBufferPool;
use crate::error::{CameraStateError, ControllerError};
use crate::frame::{DataType, FrameHeader, FRAME_HEADER_SIZE};

use super::config::{PcoCameraConfiguration, PcoCameraStatus};
use super::delay_exposure::{DelayExposure, Timebase};
use super::device::{PcoCamera, PcoDeviceFactory, PcoError, PcoGrabber, PCO_ERROR_INVALID_VALUE};
use super::state::{CameraCommand, CameraOps, CameraStateType, PcoCameraState};

/// Consecutive empty-buffer misses tolerated before the retry path backs
/// off and escalates its log level.
const EMPTY_BUFFER_RETRY_BUDGET: u32 = 1000;

/// Image size and pixel format, fixed once the camera is armed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_bytes: u32,
    pub data_type: DataType,
}

impl ImageGeometry {
    pub fn image_bytes(&self) -> usize {
        (self.width * self.height * self.pixel_bytes) as usize
    }
}

struct DeviceHandles {
    camera: Arc<dyn PcoCamera>,
    grabber: Arc<dyn PcoGrabber>,
}

/// Controller for a PCO CameraLink camera/grabber pair.
pub struct PcoCameraLinkController {
    factory: Box<dyn PcoDeviceFactory>,
    pool: Arc<dyn FrameBufferPool>,
    devices: RwLock<Option<DeviceHandles>>,
    config: Mutex<PcoCameraConfiguration>,
    status: Mutex<PcoCameraStatus>,
    delay_exposure: Mutex<DelayExposure>,
    geometry: Mutex<ImageGeometry>,
    state: PcoCameraState,
    camera_recording: AtomicBool,
    acquiring: AtomicBool,
    frames_acquired: AtomicU64,
}

impl PcoCameraLinkController {
    pub fn new(
        factory: Box<dyn PcoDeviceFactory>,
        pool: Arc<dyn FrameBufferPool>,
        config: PcoCameraConfiguration,
    ) -> Self {
        Self {
            factory,
            pool,
            devices: RwLock::new(None),
            config: Mutex::new(config),
            status: Mutex::new(PcoCameraStatus::new()),
            delay_exposure: Mutex::new(DelayExposure::default()),
            geometry: Mutex::new(ImageGeometry::default()),
            state: PcoCameraState::new(),
            camera_recording: AtomicBool::new(false),
            acquiring: AtomicBool::new(false),
            frames_acquired: AtomicU64::new(0),
        }
    }

    /// Execute a named state machine command.
    pub fn execute_command(&self, command: &str) -> Result<(), CameraStateError> {
        self.state.execute_command_name(self, command)
    }

    /// Execute a state machine command.
    pub fn execute(&self, command: CameraCommand) -> Result<(), CameraStateError> {
        self.state.execute_command(self, command)
    }

    pub fn current_state(&self) -> CameraStateType {
        self.state.current_state()
    }

    pub fn current_state_name(&self) -> &'static str {
        self.state.current_state_name()
    }

    /// Mark the state machine as errored from a failed startup step that is
    /// not itself a transition.
    pub fn mark_error(&self) {
        self.state.set_error();
    }

    /// Apply a configuration document and push changed delay/exposure
    /// settings to the device.
    ///
    /// When the camera is not recording the new settings only take effect
    /// on the device at the next arm.
    pub fn update_configuration(&self, doc: &Value) -> Result<(), ControllerError> {
        let (exposure_s, frame_rate_hz) = {
            let mut config = self.config.lock().unwrap();
            config.update(doc)?;
            (config.exposure_time(), config.frame_rate())
        };

        let requested = DelayExposure::new(exposure_s, frame_rate_hz);
        let current = *self.delay_exposure.lock().unwrap();
        if requested != current {
            if let Some((camera, _grabber)) = self.device_handles() {
                log::info!(
                    "Setting camera exposure to {}{} and delay to {}{}",
                    requested.exposure_time,
                    requested.exposure_timebase.unit(),
                    requested.delay_time,
                    requested.delay_timebase.unit(),
                );
                self.check(
                    "Set delay and exposure timebases",
                    camera.set_timebase(
                        requested.delay_timebase.as_raw(),
                        requested.exposure_timebase.as_raw(),
                    ),
                )?;
                self.check(
                    "Set delay and exposure times",
                    camera.set_delay_exposure(requested.delay_time, requested.exposure_time),
                )?;
                if !self.camera_recording.load(Ordering::SeqCst) {
                    log::debug!("Camera not recording: new settings apply at next arm");
                }
            }
            *self.delay_exposure.lock().unwrap() = requested;
        }
        Ok(())
    }

    /// Merge the current configuration into `doc` under `prefix`.
    pub fn get_configuration(&self, doc: &mut Value, prefix: &str) {
        self.config.lock().unwrap().encode_into(doc, prefix);
    }

    /// Refresh the volatile status fields and merge the status container
    /// into `doc` under `prefix`.
    pub fn get_status(&self, doc: &mut Value, prefix: &str) {
        let state_name = self.state.current_state_name();
        let mut status = self.status.lock().unwrap();
        status.set_state_name(state_name);
        status.set_acquiring(self.acquiring.load(Ordering::SeqCst));
        status.set_frames_acquired(self.frames_acquired.load(Ordering::SeqCst));
        status.encode_into(doc, prefix);
    }

    pub fn image_width(&self) -> u32 {
        self.geometry.lock().unwrap().width
    }

    pub fn image_height(&self) -> u32 {
        self.geometry.lock().unwrap().height
    }

    pub fn image_data_type(&self) -> DataType {
        self.geometry.lock().unwrap().data_type
    }

    /// Image size in bytes, excluding the frame header.
    pub fn image_size(&self) -> usize {
        self.geometry.lock().unwrap().image_bytes()
    }

    /// Read the delivered image size from the grabber and grab a single
    /// verification image, logging its BCD image number.
    ///
    /// Called by the decoder facade during the startup sequence while the
    /// camera is recording.
    pub fn read_image_geometry(&self) -> Result<(), ControllerError> {
        let (_camera, grabber) = self
            .device_handles()
            .ok_or(ControllerError::NotConnected)?;

        let (width, height) = self.check("Get actual image size", grabber.actual_size())?;
        let image_bytes = {
            let mut geometry = self.geometry.lock().unwrap();
            geometry.width = width;
            geometry.height = height;
            geometry.image_bytes()
        };
        let timeout_ms = (self.config.lock().unwrap().image_timeout() * 1000.0).round() as u32;
        log::info!("Grabber reports actual size: width {width} height {height}");

        self.check("Start verification acquire", grabber.start_acquire())?;
        let mut image = vec![0u8; image_bytes];
        let wait = grabber.wait_for_next_image(&mut image, timeout_ms);
        if let Err(e) = grabber.stop_acquire() {
            log::warn!("Failed to stop verification acquire: {e}");
        }
        self.check("Acquire verification image", wait)?;

        let image_nr = image_nr_from_timestamp(&image);
        log::info!("Startup image acquisition completed OK with image number {image_nr}");
        Ok(())
    }

    fn device_handles(&self) -> Option<(Arc<dyn PcoCamera>, Arc<dyn PcoGrabber>)> {
        self.devices
            .read()
            .unwrap()
            .as_ref()
            .map(|handles| (handles.camera.clone(), handles.grabber.clone()))
    }

    /// Record a failed device operation in the status error fields and
    /// convert it into a controller error.
    fn check<T>(&self, what: &str, result: Result<T, PcoError>) -> Result<T, ControllerError> {
        result.map_err(|e| {
            log::error!("{what} failed with error code 0x{:08X}: {}", e.code, e.message);
            self.status
                .lock()
                .unwrap()
                .set_error(e.code as u64, format!("{what} failed: {}", e.message));
            ControllerError::Device(e)
        })
    }

    fn open_devices(
        &self,
        camera: &Arc<dyn PcoCamera>,
        grabber: &Arc<dyn PcoGrabber>,
        camera_num: u32,
        image_timeout_s: f64,
    ) -> Result<(), ControllerError> {
        self.check("Open PCO grabber", grabber.open(camera_num))?;

        let query = self.query_camera(camera, grabber, image_timeout_s);
        if query.is_err() {
            let _ = grabber.close();
        }
        query
    }

    fn query_camera(
        &self,
        camera: &Arc<dyn PcoCamera>,
        grabber: &Arc<dyn PcoGrabber>,
        image_timeout_s: f64,
    ) -> Result<(), ControllerError> {
        let timeout_ms = (image_timeout_s * 1000.0).round() as u32;
        self.check("Set grabber timeout", grabber.set_timeout(timeout_ms))?;

        let (camera_type, serial) = self.check("Get camera type", camera.camera_type())?;
        let description = self.check("Get camera descriptor", camera.description())?;
        let info = self.check("Get camera info", camera.info())?;

        let (delay_time, exposure_time) =
            self.check("Get delay and exposure times", camera.delay_exposure())?;
        let (delay_tb_raw, exposure_tb_raw) =
            self.check("Get delay and exposure timebases", camera.timebase())?;
        let delay_timebase = self.check(
            "Decode delay timebase",
            Timebase::from_raw(delay_tb_raw).ok_or(PcoError::from_code(PCO_ERROR_INVALID_VALUE)),
        )?;
        let exposure_timebase = self.check(
            "Decode exposure timebase",
            Timebase::from_raw(exposure_tb_raw)
                .ok_or(PcoError::from_code(PCO_ERROR_INVALID_VALUE)),
        )?;

        let settings =
            DelayExposure::from_parts(delay_time, exposure_time, delay_timebase, exposure_timebase);
        log::info!(
            "Camera reports exposure time {:.6}s frame rate {:.3}Hz",
            settings.exposure_time_seconds(),
            settings.frame_rate_hz()
        );
        *self.delay_exposure.lock().unwrap() = settings;
        {
            let mut config = self.config.lock().unwrap();
            config.set_exposure_time(settings.exposure_time_seconds());
            config.set_frame_rate(settings.frame_rate_hz());
        }
        {
            let mut geometry = self.geometry.lock().unwrap();
            geometry.pixel_bytes = description.pixel_bytes();
            geometry.data_type = DataType::from_pixel_bytes(description.pixel_bytes())
                .unwrap_or_default();
        }
        self.status
            .lock()
            .unwrap()
            .set_camera_info(&info, camera_type, serial);
        log::info!(
            "Connected to PCO camera with name '{info}' type 0x{camera_type:X} serial {serial}"
        );

        if self.check("Get recording state", camera.recording_state())? {
            log::info!("Camera is recording at connect, stopping it");
            self.check("Stop camera recording", camera.set_recording_state(false))?;
        }
        Ok(())
    }
}

impl Drop for PcoCameraLinkController {
    fn drop(&mut self) {
        // Device handles are exclusively owned: make sure both sides close
        // even on abnormal exit paths.
        if let Some(handles) = self.devices.write().unwrap().take() {
            let _ = handles.grabber.close();
            let _ = handles.camera.close();
        }
    }
}

impl CameraOps for PcoCameraLinkController {
    fn connect(&self) -> Result<(), ControllerError> {
        let (camera_num, image_timeout_s) = {
            let config = self.config.lock().unwrap();
            (config.camera_num(), config.image_timeout())
        };
        log::info!("Connecting to PCO camera {camera_num}");

        let (camera, grabber) = self.factory.create();
        self.check("Open PCO camera", camera.open(camera_num))?;

        if let Err(e) = self.open_devices(&camera, &grabber, camera_num, image_timeout_s) {
            let _ = camera.close();
            return Err(e);
        }

        *self.devices.write().unwrap() = Some(DeviceHandles { camera, grabber });
        Ok(())
    }

    fn disconnect(&self, reset_error: bool) -> Result<(), ControllerError> {
        log::info!("Disconnecting camera");
        if self.camera_recording.load(Ordering::SeqCst) {
            if let Err(e) = self.stop_recording() {
                log::warn!("Failed to stop recording during disconnect: {e}");
            }
        }

        if let Some(handles) = self.devices.write().unwrap().take() {
            if let Err(e) = handles.grabber.close() {
                log::warn!("Failed to close grabber: {e}");
            }
            if let Err(e) = handles.camera.close() {
                log::warn!("Failed to close camera: {e}");
            }
        }

        if reset_error {
            self.status.lock().unwrap().clear_error();
        }
        Ok(())
    }

    fn arm(&self) -> Result<(), ControllerError> {
        let (camera, grabber) = self
            .device_handles()
            .ok_or(ControllerError::NotConnected)?;
        let timestamp_mode = self.config.lock().unwrap().timestamp_mode();

        log::info!("Arming camera");
        self.check(
            "Set timestamp mode",
            camera.set_timestamp_mode(timestamp_mode as u16),
        )?;
        self.check("Arm camera", camera.arm())?;
        self.check("Post-arm grabber", grabber.post_arm())?;
        Ok(())
    }

    fn disarm(&self) -> Result<(), ControllerError> {
        // No device operation: disarming is controller-side bookkeeping.
        log::info!("Disarming camera");
        Ok(())
    }

    fn start_recording(&self) -> Result<(), ControllerError> {
        let (camera, _grabber) = self
            .device_handles()
            .ok_or(ControllerError::NotConnected)?;
        log::info!("Setting camera recording state to running");
        self.check("Start camera recording", camera.set_recording_state(true))?;
        self.camera_recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&self) -> Result<(), ControllerError> {
        log::info!("Stopping camera recording");

        // Clear the flag first so the acquisition loop leaves its inner
        // phase, then wait for it to report idle before touching the device.
        self.camera_recording.store(false, Ordering::SeqCst);
        let wait_ms = (self.config.lock().unwrap().image_timeout() * 2000.0) as u64;
        let deadline = Instant::now() + Duration::from_millis(wait_ms);
        while self.acquiring.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                log::warn!("Acquisition loop still active after {wait_ms}ms, stopping anyway");
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let (camera, _grabber) = self
            .device_handles()
            .ok_or(ControllerError::NotConnected)?;
        self.check("Stop camera recording", camera.set_recording_state(false))?;
        Ok(())
    }
}

/// Acquisition service loop.
///
/// Runs on a dedicated thread for the lifetime of the decoder. While the
/// camera is recording it borrows empty buffers from the pool, waits for
/// the next image directly into the buffer after the header region, fills
/// the header and marks the buffer ready. Frame numbers are dense and
/// restart at zero each time recording starts.
pub(crate) fn acquisition_service(
    controller: Arc<PcoCameraLinkController>,
    run_thread: Arc<AtomicBool>,
) {
    log::debug!("Acquisition service thread running");

    let mut was_acquiring = false;
    let mut frames_acquired: u32 = 0;
    let mut image_timeout_ms: u32 = 0;
    let mut empty_misses: u32 = 0;

    while run_thread.load(Ordering::SeqCst) {
        let Some((_camera, grabber)) = controller.device_handles() else {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        };

        if !controller.camera_recording.load(Ordering::SeqCst) {
            if was_acquiring {
                if let Err(e) = grabber.stop_acquire() {
                    log::warn!("Failed to stop grabber acquisition: {e}");
                }
                controller.acquiring.store(false, Ordering::SeqCst);
                was_acquiring = false;
                log::info!("Camera recording stopped after {frames_acquired} frames");
            }
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }

        if !was_acquiring {
            let (timeout_s, num_frames) = {
                let config = controller.config.lock().unwrap();
                (config.image_timeout(), config.num_frames())
            };
            image_timeout_ms = (timeout_s * 1000.0).round() as u32;
            if let Err(e) = grabber.start_acquire() {
                log::error!("Failed to start grabber acquisition: {e}");
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            was_acquiring = true;
            empty_misses = 0;
            frames_acquired = 0;
            controller.frames_acquired.store(0, Ordering::SeqCst);
            controller.acquiring.store(true, Ordering::SeqCst);
            if num_frames == 0 {
                log::info!("Starting acquisition of unlimited frames");
            } else {
                log::info!("Starting acquisition of {num_frames} frames");
            }
        }

        let Some(buffer) = controller.pool.get_empty_buffer() else {
            empty_misses += 1;
            if empty_misses < EMPTY_BUFFER_RETRY_BUDGET {
                log::warn!("Failed to get empty buffer from pool");
            } else {
                if empty_misses == EMPTY_BUFFER_RETRY_BUDGET {
                    log::error!(
                        "No empty buffer available after {empty_misses} attempts, backing off"
                    );
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            continue;
        };
        empty_misses = 0;

        let geometry = *controller.geometry.lock().unwrap();
        let image_bytes = geometry.image_bytes();
        let filled = {
            let mut data = buffer.lock();
            if data.len() < FRAME_HEADER_SIZE + image_bytes {
                log::error!(
                    "Pool buffer too small for image: {} < {}",
                    data.len(),
                    FRAME_HEADER_SIZE + image_bytes
                );
                false
            } else {
                let (header_region, image_region) = data.split_at_mut(FRAME_HEADER_SIZE);
                match grabber.wait_for_next_image(&mut image_region[..image_bytes], image_timeout_ms)
                {
                    Ok(()) => {
                        let header = FrameHeader {
                            frame_number: frames_acquired,
                            frame_width: geometry.width,
                            frame_height: geometry.height,
                            frame_data_type: geometry.data_type as u32,
                            frame_size: image_bytes as u32,
                        };
                        // Infallible: the header region is FRAME_HEADER_SIZE bytes.
                        let _ = header.write_to(header_region);
                        true
                    }
                    Err(e) if e.is_timeout() => {
                        log::warn!("Timed out waiting for image {frames_acquired}");
                        false
                    }
                    Err(e) => {
                        log::warn!("Image wait for frame {frames_acquired} failed: {e}");
                        false
                    }
                }
            }
        };

        if filled {
            controller.pool.notify_frame_ready(buffer, frames_acquired);
            frames_acquired += 1;
            controller
                .frames_acquired
                .store(frames_acquired as u64, Ordering::SeqCst);
        }

        let num_frames = controller.config.lock().unwrap().num_frames();
        if num_frames != 0 && frames_acquired >= num_frames {
            log::info!("Acquisition of {num_frames} frames completed");
            if let Err(e) = grabber.stop_acquire() {
                log::warn!("Failed to stop grabber acquisition: {e}");
            }
            was_acquiring = false;
            controller.acquiring.store(false, Ordering::SeqCst);
            if let Err(e) = controller
                .state
                .execute_command(&*controller, CameraCommand::StopRecording)
            {
                log::error!("Failed to stop recording after bounded acquisition: {e}");
            }
        }
    }

    if was_acquiring {
        if let Some((_camera, grabber)) = controller.device_handles() {
            let _ = grabber.stop_acquire();
        }
        controller.acquiring.store(false, Ordering::SeqCst);
    }
    log::debug!("Acquisition service thread exiting");
}

/// Decode the BCD image number stamped in the first four pixels of an
/// image: two decimal digits per 16-bit pixel, most significant first.
fn image_nr_from_timestamp(image: &[u8]) -> u32 {
    let mut image_nr = 0u32;
    let mut scale = 1_000_000u32;
    for pixel in image.chunks_exact(2).take(4) {
        let word = u16::from_le_bytes([pixel[0], pixel[1]]) as u32;
        image_nr += (((word & 0x00F0) >> 4) * 10 + (word & 0x000F)) * scale;
        scale /= 100;
    }
    image_nr
}
