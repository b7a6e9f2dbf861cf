//! Inference model seam.
//!
//! The processor delegates tensor arithmetic to an external ML runtime.
//! [`InferenceModel`] is the boundary: load a model from a path, run it on
//! a typed image tensor with named input and output layers, get the class
//! scores back. [`ThresholdModel`] is a deterministic stand-in used by the
//! tests and the simulated daemon.

use crate::error::ProcessorError;
use crate::frame::DataType;

/// Class labels in model output order.
pub const CLASS_LABELS: [&str; 2] = ["Bad", "Good"];

/// A typed view of the image portion of a frame.
pub struct ImageTensor<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub data_type: DataType,
}

impl ImageTensor<'_> {
    /// Mean pixel intensity normalised to [0, 1].
    pub fn normalised_mean(&self) -> f64 {
        let (sum, count, full_scale) = match self.data_type {
            DataType::Raw8 => {
                let sum: f64 = self.data.iter().map(|&b| b as f64).sum();
                (sum, self.data.len(), u8::MAX as f64)
            }
            DataType::Raw16 => {
                let pixels = self.data.chunks_exact(2);
                let count = pixels.len();
                let sum: f64 = pixels
                    .map(|p| u16::from_le_bytes([p[0], p[1]]) as f64)
                    .sum();
                (sum, count, u16::MAX as f64)
            }
            DataType::Raw32 => {
                let pixels = self.data.chunks_exact(4);
                let count = pixels.len();
                let sum: f64 = pixels
                    .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as f64)
                    .sum();
                (sum, count, u32::MAX as f64)
            }
            DataType::Raw64 => {
                let pixels = self.data.chunks_exact(8);
                let count = pixels.len();
                let sum: f64 = pixels
                    .map(|p| {
                        u64::from_le_bytes([p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7]]) as f64
                    })
                    .sum();
                (sum, count, u64::MAX as f64)
            }
            DataType::Float32 => {
                let pixels = self.data.chunks_exact(4);
                let count = pixels.len();
                let sum: f64 = pixels
                    .map(|p| f32::from_le_bytes([p[0], p[1], p[2], p[3]]) as f64)
                    .sum();
                (sum, count, 1.0)
            }
        };
        if count == 0 {
            return 0.0;
        }
        sum / count as f64 / full_scale
    }
}

/// External inference runtime boundary.
pub trait InferenceModel: Send {
    /// Run the model on the image, returning one score per class.
    fn run(
        &self,
        input_layer: &str,
        output_layer: &str,
        image: &ImageTensor<'_>,
    ) -> Result<Vec<f32>, ProcessorError>;
}

/// Loader producing a model implementation from a configured path.
pub type ModelLoader = Box<dyn Fn(&str) -> Result<Box<dyn InferenceModel>, ProcessorError> + Send>;

/// Deterministic two-class model scoring on mean image intensity.
///
/// Images whose normalised mean intensity reaches the threshold score as
/// `Good`, darker images as `Bad`. The threshold can be supplied in the
/// model file as a single decimal number; a missing file or a `builtin:`
/// path keeps the default.
pub struct ThresholdModel {
    threshold: f64,
}

impl ThresholdModel {
    pub const DEFAULT_THRESHOLD: f64 = 0.25;

    pub fn load(path: &str) -> Result<Self, ProcessorError> {
        if path.starts_with("builtin:") {
            return Ok(Self {
                threshold: Self::DEFAULT_THRESHOLD,
            });
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let threshold = contents.trim().parse::<f64>().map_err(|e| {
                    ProcessorError::Model(format!("invalid threshold in {path}: {e}"))
                })?;
                Ok(Self { threshold })
            }
            Err(e) => {
                log::warn!("Model file {path} unreadable ({e}), using default threshold");
                Ok(Self {
                    threshold: Self::DEFAULT_THRESHOLD,
                })
            }
        }
    }

    pub fn loader() -> ModelLoader {
        Box::new(|path| Ok(Box::new(ThresholdModel::load(path)?) as Box<dyn InferenceModel>))
    }
}

impl InferenceModel for ThresholdModel {
    fn run(
        &self,
        input_layer: &str,
        output_layer: &str,
        image: &ImageTensor<'_>,
    ) -> Result<Vec<f32>, ProcessorError> {
        log::debug!(
            "Running threshold model {input_layer} -> {output_layer} on {}x{} image",
            image.width,
            image.height
        );
        let mean = image.normalised_mean();
        // Squash the distance from the threshold into (0, 1).
        let good = 1.0 / (1.0 + (-12.0 * (mean - self.threshold)).exp());
        Ok(vec![(1.0 - good) as f32, good as f32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tensor(data: &[u8], data_type: DataType) -> ImageTensor<'_> {
        ImageTensor {
            data,
            width: 2,
            height: 2,
            data_type,
        }
    }

    #[test]
    fn normalised_mean_per_data_type() {
        let raw8 = [0u8, 255, 0, 255];
        assert!((tensor(&raw8, DataType::Raw8).normalised_mean() - 0.5).abs() < 1.0e-9);

        let mut raw16 = Vec::new();
        for value in [0u16, u16::MAX, 0, u16::MAX] {
            raw16.extend_from_slice(&value.to_le_bytes());
        }
        assert!((tensor(&raw16, DataType::Raw16).normalised_mean() - 0.5).abs() < 1.0e-9);

        let mut float32 = Vec::new();
        for value in [0.25f32, 0.75, 0.25, 0.75] {
            float32.extend_from_slice(&value.to_le_bytes());
        }
        assert!((tensor(&float32, DataType::Float32).normalised_mean() - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn dark_image_scores_bad_bright_image_scores_good() {
        let model = ThresholdModel {
            threshold: ThresholdModel::DEFAULT_THRESHOLD,
        };

        let dark = vec![0u8; 32];
        let scores = model
            .run("input", "output", &tensor(&dark, DataType::Raw8))
            .unwrap();
        assert_eq!(scores.len(), CLASS_LABELS.len());
        assert!(scores[0] > scores[1], "dark image should score Bad");

        let bright = vec![0xFFu8; 32];
        let scores = model
            .run("input", "output", &tensor(&bright, DataType::Raw8))
            .unwrap();
        assert!(scores[1] > scores[0], "bright image should score Good");
    }

    #[test]
    fn threshold_loaded_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.75").unwrap();
        let model = ThresholdModel::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(model.threshold, 0.75);
    }

    #[test]
    fn builtin_path_uses_default_threshold() {
        let model = ThresholdModel::load("builtin:threshold").unwrap();
        assert_eq!(model.threshold, ThresholdModel::DEFAULT_THRESHOLD);
    }

    #[test]
    fn malformed_model_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a number").unwrap();
        assert!(ThresholdModel::load(file.path().to_str().unwrap()).is_err());
    }
}
