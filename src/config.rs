//! Daemon configuration.
//!
//! Settings are loaded from a TOML file via the `config` crate and validated
//! before the daemon starts, so a misconfigured endpoint or camera geometry
//! fails at startup rather than at first use. Every field has a default, so
//! an absent file yields a runnable simulated setup.

use anyhow::{bail, Context, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    /// TCP endpoint of the control channel.
    pub ctrl_endpoint: String,
    pub camera: CameraSettings,
    pub sim: SimCameraSettings,
    pub buffers: BufferSettings,
    pub processor: ProcessorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ctrl_endpoint: "127.0.0.1:5060".to_string(),
            camera: CameraSettings::default(),
            sim: SimCameraSettings::default(),
            buffers: BufferSettings::default(),
            processor: ProcessorSettings::default(),
        }
    }
}

/// Initial camera configuration, applied to the config container before the
/// camera is connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub camera_num: u32,
    /// Image wait timeout in seconds.
    pub image_timeout: f64,
    /// Frames per acquisition, 0 for unlimited.
    pub num_frames: u32,
    pub timestamp_mode: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            camera_num: 0,
            image_timeout: 10.0,
            num_frames: 0,
            timestamp_mode: 1,
        }
    }
}

/// Geometry and timing of the simulated camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCameraSettings {
    pub width: u32,
    pub height: u32,
    pub frame_interval_ms: u64,
}

impl Default for SimCameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Number of shared frame buffers in the pool.
    pub count: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self { count: 10 }
    }
}

/// Frame processor plugin configuration.
///
/// Field names match the plugin's bound parameter paths so the section can
/// be handed to the plugin as a JSON document unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub model_path: String,
    pub model_input_layer: String,
    pub model_output_layer: String,
    pub decode_header: bool,
    pub result_socket_addr: String,
    pub send_results: bool,
    pub send_image: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            model_path: "builtin:threshold".to_string(),
            model_input_layer: "serving_default_input".to_string(),
            model_output_layer: "StatefulPartitionedCall".to_string(),
            decode_header: true,
            result_socket_addr: "tcp://127.0.0.1:5061".to_string(),
            send_results: true,
            send_image: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `pco_camlink.toml` in the working
    /// directory when present, falling back to defaults.
    pub fn new(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("pco_camlink").required(false)),
        };
        let settings: Settings = builder
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!("log_level must be one of {LOG_LEVELS:?}");
        }
        self.ctrl_endpoint
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid ctrl_endpoint {:?}", self.ctrl_endpoint))?;
        if self.camera.image_timeout <= 0.0 {
            bail!("camera.image_timeout must be positive");
        }
        if self.camera.timestamp_mode > 2 {
            bail!("camera.timestamp_mode must be 0 (off), 1 (binary) or 2 (binary+ASCII)");
        }
        if self.sim.width == 0 || self.sim.height == 0 {
            bail!("sim camera dimensions must be non-zero");
        }
        if self.buffers.count < 2 {
            bail!("buffers.count must be at least 2");
        }
        let addr = &self.processor.result_socket_addr;
        if !addr.is_empty()
            && !["tcp://", "ipc://", "inproc://"]
                .iter()
                .any(|scheme| addr.starts_with(scheme))
        {
            bail!("processor.result_socket_addr must be a tcp://, ipc:// or inproc:// endpoint");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml = r#"
            log_level = "debug"
            ctrl_endpoint = "0.0.0.0:6000"

            [camera]
            num_frames = 100

            [sim]
            width = 64
            height = 48

            [processor]
            send_image = true
        "#;
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.camera.num_frames, 100);
        assert_eq!(settings.camera.image_timeout, 10.0);
        assert_eq!(settings.sim.width, 64);
        assert!(settings.processor.send_image);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let settings = Settings {
            ctrl_endpoint: "not-an-endpoint".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn processor_section_matches_plugin_parameter_paths() {
        let doc = serde_json::to_value(ProcessorSettings::default()).unwrap();
        for key in [
            "model_path",
            "model_input_layer",
            "model_output_layer",
            "decode_header",
            "result_socket_addr",
            "send_results",
            "send_image",
        ] {
            assert!(doc.get(key).is_some(), "missing key {key}");
        }
    }
}
