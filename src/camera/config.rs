//! Camera configuration and status parameter containers.

use serde_json::Value;

use crate::error::ParamError;
use crate::params::{ParamContainer, ParamValue};

/// Camera configuration parameters, bound at flat paths.
///
/// `num_frames` of 0 means unlimited: acquisition runs until stopped.
#[derive(Debug, Clone)]
pub struct PcoCameraConfiguration {
    params: ParamContainer,
}

impl Default for PcoCameraConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl PcoCameraConfiguration {
    pub fn new() -> Self {
        let mut params = ParamContainer::new();
        params.bind("camera_num", ParamValue::U32(0));
        params.bind("image_timeout", ParamValue::F64(10.0));
        params.bind("num_frames", ParamValue::U32(0));
        params.bind("timestamp_mode", ParamValue::U32(1));
        params.bind("exposure_time", ParamValue::F64(0.01));
        params.bind("frame_rate", ParamValue::F64(10.0));
        Self { params }
    }

    pub fn camera_num(&self) -> u32 {
        self.params.get_u32("camera_num")
    }

    /// Image wait timeout in seconds.
    pub fn image_timeout(&self) -> f64 {
        self.params.get_f64("image_timeout")
    }

    pub fn set_image_timeout(&mut self, timeout_s: f64) {
        self.params.set_f64("image_timeout", timeout_s);
    }

    pub fn num_frames(&self) -> u32 {
        self.params.get_u32("num_frames")
    }

    pub fn set_num_frames(&mut self, num_frames: u32) {
        self.params.set_u32("num_frames", num_frames);
    }

    pub fn timestamp_mode(&self) -> u32 {
        self.params.get_u32("timestamp_mode")
    }

    /// Exposure time in seconds.
    pub fn exposure_time(&self) -> f64 {
        self.params.get_f64("exposure_time")
    }

    pub fn set_exposure_time(&mut self, exposure_s: f64) {
        self.params.set_f64("exposure_time", exposure_s);
    }

    /// Frame rate in Hertz.
    pub fn frame_rate(&self) -> f64 {
        self.params.get_f64("frame_rate")
    }

    pub fn set_frame_rate(&mut self, frame_rate_hz: f64) {
        self.params.set_f64("frame_rate", frame_rate_hz);
    }

    pub fn update(&mut self, doc: &Value) -> Result<(), ParamError> {
        self.params.update_doc(doc)
    }

    pub fn encode_into(&self, doc: &mut Value, prefix: &str) {
        self.params.encode_into(doc, prefix);
    }
}

/// Camera status parameters, bound at nested paths.
#[derive(Debug, Clone)]
pub struct PcoCameraStatus {
    params: ParamContainer,
}

impl Default for PcoCameraStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PcoCameraStatus {
    pub fn new() -> Self {
        let mut params = ParamContainer::new();
        params.bind("camera/state", ParamValue::Str("unknown".to_string()));
        params.bind("acquisition/acquiring", ParamValue::Bool(false));
        params.bind("acquisition/frames_acquired", ParamValue::U64(0));
        params.bind("camera/error/code", ParamValue::U64(0));
        params.bind("camera/error/message", ParamValue::Str("no error".to_string()));
        params.bind("camera/info/name", ParamValue::Str(String::new()));
        params.bind("camera/info/type", ParamValue::U32(0));
        params.bind("camera/info/serial", ParamValue::U64(0));
        Self { params }
    }

    pub fn state_name(&self) -> &str {
        self.params.get_str("camera/state")
    }

    pub fn set_state_name(&mut self, name: &str) {
        self.params.set_str("camera/state", name);
    }

    pub fn acquiring(&self) -> bool {
        self.params.get_bool("acquisition/acquiring")
    }

    pub fn set_acquiring(&mut self, acquiring: bool) {
        self.params.set_bool("acquisition/acquiring", acquiring);
    }

    pub fn frames_acquired(&self) -> u64 {
        self.params.get_u64("acquisition/frames_acquired")
    }

    pub fn set_frames_acquired(&mut self, frames: u64) {
        self.params.set_u64("acquisition/frames_acquired", frames);
    }

    pub fn error_code(&self) -> u64 {
        self.params.get_u64("camera/error/code")
    }

    pub fn error_message(&self) -> &str {
        self.params.get_str("camera/error/message")
    }

    pub fn set_error(&mut self, code: u64, message: impl Into<String>) {
        self.params.set_u64("camera/error/code", code);
        self.params.set_str("camera/error/message", message.into());
    }

    pub fn clear_error(&mut self) {
        self.set_error(0, "no error");
    }

    pub fn set_camera_info(&mut self, name: &str, camera_type: u32, serial: u64) {
        self.params.set_str("camera/info/name", name);
        self.params.set_u32("camera/info/type", camera_type);
        self.params.set_u64("camera/info/serial", serial);
    }

    pub fn encode_into(&self, doc: &mut Value, prefix: &str) {
        self.params.encode_into(doc, prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn configuration_defaults() {
        let config = PcoCameraConfiguration::new();
        assert_eq!(config.camera_num(), 0);
        assert_eq!(config.image_timeout(), 10.0);
        assert_eq!(config.num_frames(), 0);
        assert_eq!(config.timestamp_mode(), 1);
        assert_eq!(config.exposure_time(), 0.01);
        assert_eq!(config.frame_rate(), 10.0);
    }

    #[test]
    fn partial_update_leaves_other_parameters_at_defaults() {
        let mut config = PcoCameraConfiguration::new();
        config.update(&json!({"num_frames": 42})).unwrap();

        assert_eq!(config.num_frames(), 42);
        assert_eq!(config.camera_num(), 0);
        assert_eq!(config.image_timeout(), 10.0);
        assert_eq!(config.timestamp_mode(), 1);
        assert_eq!(config.exposure_time(), 0.01);
        assert_eq!(config.frame_rate(), 10.0);
    }

    #[test]
    fn status_defaults_and_error_cycle() {
        let mut status = PcoCameraStatus::new();
        assert_eq!(status.state_name(), "unknown");
        assert!(!status.acquiring());
        assert_eq!(status.frames_acquired(), 0);
        assert_eq!(status.error_code(), 0);
        assert_eq!(status.error_message(), "no error");

        status.set_error(0x8000_2005, "arm failed: internal driver error");
        assert_ne!(status.error_code(), 0);
        status.clear_error();
        assert_eq!(status.error_code(), 0);
        assert_eq!(status.error_message(), "no error");
    }

    #[test]
    fn status_encodes_under_nested_paths() {
        let mut status = PcoCameraStatus::new();
        status.set_state_name("connected");
        status.set_camera_info("pco.sim", 0x1340, 100_251);

        let mut doc = json!({});
        status.encode_into(&mut doc, "");
        assert_eq!(doc["camera"]["state"], json!("connected"));
        assert_eq!(doc["camera"]["info"]["serial"], json!(100_251));
        assert_eq!(doc["acquisition"]["acquiring"], json!(false));
    }
}
