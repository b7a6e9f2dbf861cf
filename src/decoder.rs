//! Frame decoder facade.
//!
//! [`PcoCameraLinkFrameDecoder`] ties the camera controller to the control
//! channel: it runs the startup sequence, owns the acquisition service
//! thread and dispatches control-channel envelopes (`configure`,
//! `request_configuration`, `status`) into the controller, turning errors
//! into `nack` replies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::json;

use crate::camera::controller::{acquisition_service, PcoCameraLinkController};
use crate::camera::state::{CameraCommand, CameraStateType};
use crate::error::DecoderError;
use crate::frame::FRAME_HEADER_SIZE;
use crate::ipc::IpcMessage;

const DECODER_NAME: &str = "PcoCameraLinkFrameDecoder";

pub struct PcoCameraLinkFrameDecoder {
    controller: Arc<PcoCameraLinkController>,
    run_thread: Arc<AtomicBool>,
    acquisition_thread: Mutex<Option<JoinHandle<()>>>,
}

impl PcoCameraLinkFrameDecoder {
    pub fn new(controller: PcoCameraLinkController) -> Self {
        Self {
            controller: Arc::new(controller),
            run_thread: Arc::new(AtomicBool::new(false)),
            acquisition_thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        DECODER_NAME
    }

    pub fn controller(&self) -> &PcoCameraLinkController {
        &self.controller
    }

    /// Run the camera startup sequence and start the acquisition service.
    ///
    /// The startup sequence drives the state machine through connect, arm
    /// and start, reads the image geometry from the grabber, then stops
    /// recording again so that buffer sizes can be queried before any
    /// client command arrives. The machine is left armed. Any failure
    /// leaves the machine in the error state and propagates.
    pub fn init(&self) -> Result<(), DecoderError> {
        log::info!("{DECODER_NAME} initialising camera");

        self.controller.execute(CameraCommand::Connect)?;
        self.controller.execute(CameraCommand::Arm)?;
        self.controller.execute(CameraCommand::StartRecording)?;
        if let Err(e) = self.controller.read_image_geometry() {
            self.controller.mark_error();
            return Err(DecoderError::Geometry(e));
        }
        self.controller.execute(CameraCommand::StopRecording)?;

        self.run_thread.store(true, Ordering::SeqCst);
        let controller = self.controller.clone();
        let run_thread = self.run_thread.clone();
        let handle = std::thread::Builder::new()
            .name("pco-acquisition".to_string())
            .spawn(move || acquisition_service(controller, run_thread))
            .map_err(|e| {
                self.controller.mark_error();
                DecoderError::Service(e.to_string())
            })?;
        *self.acquisition_thread.lock().unwrap() = Some(handle);

        log::info!(
            "{DECODER_NAME} ready: image {}x{} ({} bytes per frame)",
            self.controller.image_width(),
            self.controller.image_height(),
            self.get_frame_buffer_size()
        );
        Ok(())
    }

    /// Size of the frame header region at the start of each buffer.
    pub fn get_frame_header_size(&self) -> usize {
        FRAME_HEADER_SIZE
    }

    /// Total buffer size needed per frame: header plus image data.
    pub fn get_frame_buffer_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.controller.image_size()
    }

    /// Dispatch a control-channel request and produce the reply.
    pub fn handle_message(&self, request: &IpcMessage) -> IpcMessage {
        if !request.is_cmd() {
            return IpcMessage::nack_reply(
                request,
                format!("unexpected message type: {}", request.msg_type),
            );
        }
        log::debug!("Handling control message {} id {}", request.msg_val, request.id);
        match request.msg_val.as_str() {
            "configure" => self.configure(request),
            "request_configuration" => self.request_configuration(request),
            "status" => self.status(request),
            other => IpcMessage::nack_reply(request, format!("unsupported command: {other}")),
        }
    }

    /// Stop the acquisition service and shut the camera down.
    pub fn shutdown(&self) {
        log::info!("{DECODER_NAME} shutting down");
        self.run_thread.store(false, Ordering::SeqCst);
        if let Some(handle) = self.acquisition_thread.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("Acquisition thread panicked");
            }
        }

        // Walk the state machine back to disconnected.
        loop {
            let command = match self.controller.current_state() {
                CameraStateType::Recording => CameraCommand::StopRecording,
                CameraStateType::Armed => CameraCommand::Disarm,
                CameraStateType::Connected => CameraCommand::Disconnect,
                CameraStateType::Error => CameraCommand::Reset,
                CameraStateType::Disconnected => break,
            };
            if let Err(e) = self.controller.execute(command) {
                log::warn!("Shutdown command {} failed: {e}", command.name());
                break;
            }
        }
    }

    fn configure(&self, request: &IpcMessage) -> IpcMessage {
        let Some(params) = request.params.as_ref() else {
            return IpcMessage::ack_reply(request, None);
        };

        if let Some(camera_params) = params.get("camera") {
            if let Err(e) = self.controller.update_configuration(camera_params) {
                return IpcMessage::nack_reply(request, e.to_string());
            }
        }

        if let Some(command) = params.get("command") {
            let Some(command) = command.as_str() else {
                return IpcMessage::nack_reply(request, "command parameter must be a string");
            };
            if let Err(e) = self.controller.execute_command(command) {
                return IpcMessage::nack_reply(request, e.to_string());
            }
        }

        IpcMessage::ack_reply(request, None)
    }

    fn request_configuration(&self, request: &IpcMessage) -> IpcMessage {
        let mut doc = json!({});
        self.controller.get_configuration(&mut doc, "camera");
        IpcMessage::ack_reply(request, Some(doc))
    }

    fn status(&self, request: &IpcMessage) -> IpcMessage {
        let mut doc = json!({ "name": DECODER_NAME });
        self.controller.get_status(&mut doc, "");
        IpcMessage::ack_reply(request, Some(doc))
    }
}

impl Drop for PcoCameraLinkFrameDecoder {
    fn drop(&mut self) {
        self.run_thread.store(false, Ordering::SeqCst);
        if let Some(handle) = self.acquisition_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
