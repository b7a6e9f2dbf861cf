//! ML frame processor plugin.
//!
//! Decodes the binary frame header into frame metadata, runs the
//! classification model on the image portion and republishes per-frame
//! results on the result socket. Process-time statistics accumulate over
//! the plugin lifetime, or until `reset_statistics`.

use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};

use crate::error::ProcessorError;
use crate::frame::{DataType, FrameHeader, FRAME_HEADER_SIZE};
use crate::params::{ParamContainer, ParamValue};

use super::model::{ImageTensor, InferenceModel, ModelLoader, ThresholdModel, CLASS_LABELS};
use super::publisher::{FrameResult, ImageHeader, ResultPublisher};
use super::{Compression, Frame, FrameMetaData};

/// Dataset name stamped on decoded frames before classification.
const RAW_DATASET_NAME: &str = "inaira";

pub struct MlProcessPlugin {
    params: ParamContainer,
    model: Option<Box<dyn InferenceModel>>,
    model_loader: ModelLoader,
    loaded_model_path: String,
    publisher: ResultPublisher,
    frames_processed: u64,
    total_process_time_ms: f64,
}

impl Default for MlProcessPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl MlProcessPlugin {
    pub fn new() -> Self {
        Self::with_loader(ThresholdModel::loader())
    }

    pub fn with_loader(model_loader: ModelLoader) -> Self {
        let mut params = ParamContainer::new();
        params.bind("model_path", ParamValue::Str(String::new()));
        params.bind(
            "model_input_layer",
            ParamValue::Str("serving_default_input".to_string()),
        );
        params.bind(
            "model_output_layer",
            ParamValue::Str("StatefulPartitionedCall".to_string()),
        );
        params.bind("decode_header", ParamValue::Bool(true));
        params.bind("result_socket_addr", ParamValue::Str(String::new()));
        params.bind("send_results", ParamValue::Bool(false));
        params.bind("send_image", ParamValue::Bool(false));

        Self {
            params,
            model: None,
            model_loader,
            loaded_model_path: String::new(),
            publisher: ResultPublisher::new(),
            frames_processed: 0,
            total_process_time_ms: 0.0,
        }
    }

    /// Apply a configuration document, loading the model and binding the
    /// result socket as their parameters arrive.
    pub fn configure(&mut self, doc: &Value) -> Result<(), ProcessorError> {
        self.params.update_doc(doc)?;

        let model_path = self.params.get_str("model_path").to_string();
        if !model_path.is_empty() && model_path != self.loaded_model_path {
            log::info!("Loading model from {model_path}");
            self.model = Some((self.model_loader)(&model_path)?);
            self.loaded_model_path = model_path;
        }

        let socket_addr = self.params.get_str("result_socket_addr").to_string();
        if !socket_addr.is_empty() {
            self.publisher.bind(&socket_addr)?;
        }
        Ok(())
    }

    /// Merge the current configuration into `doc` under `prefix`.
    pub fn request_configuration(&self, doc: &mut Value, prefix: &str) {
        self.params.encode_into(doc, prefix);
    }

    /// Merge plugin status into `doc`.
    pub fn status(&self, doc: &mut Value) {
        doc["frames_processed"] = json!(self.frames_processed);
        doc["mean_process_time"] = json!(self.mean_process_time_ms());
        doc["model_loaded"] = json!(self.model.is_some());
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Arithmetic mean of the model run time in milliseconds.
    pub fn mean_process_time_ms(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.total_process_time_ms / self.frames_processed as f64
        }
    }

    pub fn reset_statistics(&mut self) -> bool {
        self.frames_processed = 0;
        self.total_process_time_ms = 0.0;
        true
    }

    /// Process one frame: decode the header, classify the image, rename the
    /// dataset after the winning class and publish the result.
    pub fn process_frame(&mut self, frame: &mut Frame) -> Result<(), ProcessorError> {
        let decode_header = self.params.get_bool("decode_header");
        let input_layer = self.params.get_str("model_input_layer").to_string();
        let output_layer = self.params.get_str("model_output_layer").to_string();
        let send_results = self.params.get_bool("send_results");
        let send_image = self.params.get_bool("send_image");

        if decode_header {
            let header = FrameHeader::read_from(frame.data())?;
            let data_type = DataType::from_u32(header.frame_data_type)?;
            log::debug!(
                "Got frame number {} width {} height {} type {} size {}",
                header.frame_number,
                header.frame_width,
                header.frame_height,
                header.frame_data_type,
                header.frame_size
            );
            let image_size =
                (header.frame_height * header.frame_width) as usize * data_type.pixel_bytes();
            frame.set_meta(FrameMetaData {
                dataset_name: RAW_DATASET_NAME.to_string(),
                data_type,
                frame_number: header.frame_number,
                dimensions: [header.frame_height, header.frame_width],
                compression: Compression::None,
            });
            frame.set_image_region(FRAME_HEADER_SIZE, image_size);
        }

        let meta = frame.meta().clone();
        let model = self.model.as_ref().ok_or(ProcessorError::NoModel)?;
        let tensor = ImageTensor {
            data: frame.image(),
            width: meta.dimensions[1],
            height: meta.dimensions[0],
            data_type: meta.data_type,
        };

        let started = Instant::now();
        let scores = model.run(&input_layer, &output_layer, &tensor)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.frames_processed += 1;
        self.total_process_time_ms += elapsed_ms;

        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(index, _)| index)
            .unwrap_or(0);
        let label = CLASS_LABELS.get(best).copied().unwrap_or("Bad");
        frame.set_dataset_name(if label == "Good" { "good" } else { "defective" });
        log::debug!(
            "Frame {} classified {} in {:.3}ms",
            meta.frame_number,
            label,
            elapsed_ms
        );

        if send_results {
            let result = FrameResult {
                frame_number: meta.frame_number,
                process_time: elapsed_ms.round() as u32,
                result: scores,
            };
            if send_image {
                let header = ImageHeader {
                    frame_number: meta.frame_number,
                    width: meta.dimensions[1],
                    height: meta.dimensions[0],
                    dtype: meta.data_type.name().to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                };
                self.publisher.publish(&result, Some((&header, frame.image())))?;
            } else {
                self.publisher.publish(&result, None)?;
            }
        }
        Ok(())
    }
}
