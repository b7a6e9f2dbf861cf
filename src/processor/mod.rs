//! Frame processor plugin.
//!
//! The processor consumes frames whose memory starts with a
//! [`crate::frame::FrameHeader`], decodes the header into frame metadata,
//! runs an image-classification model through the [`model::InferenceModel`]
//! seam and publishes per-frame results (and optionally the image itself)
//! on a ZeroMQ PUB socket.

pub mod model;
pub mod plugin;
pub mod publisher;

use crate::frame::DataType;

/// Compression applied to a frame's image data.
///
/// The receiver never compresses; the variant exists so the metadata can
/// say so explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
}

/// Metadata attached to a frame by the processor.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetaData {
    pub dataset_name: String,
    pub data_type: DataType,
    pub frame_number: u32,
    /// Image dimensions as {height, width}.
    pub dimensions: [u32; 2],
    pub compression: Compression,
}

impl Default for FrameMetaData {
    fn default() -> Self {
        Self {
            dataset_name: String::new(),
            data_type: DataType::Raw16,
            frame_number: 0,
            dimensions: [0, 0],
            compression: Compression::None,
        }
    }
}

/// A frame flowing through the processing pipeline.
///
/// The data region starts with the binary frame header; `image_offset` and
/// `image_size` select the image portion once the header is decoded.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    data: Vec<u8>,
    meta: FrameMetaData,
    image_offset: usize,
    image_size: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        let image_size = data.len();
        Self {
            data,
            meta: FrameMetaData::default(),
            image_offset: 0,
            image_size,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn meta(&self) -> &FrameMetaData {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: FrameMetaData) {
        self.meta = meta;
    }

    pub fn set_dataset_name(&mut self, name: impl Into<String>) {
        self.meta.dataset_name = name.into();
    }

    pub fn image_offset(&self) -> usize {
        self.image_offset
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn set_image_region(&mut self, offset: usize, size: usize) {
        self.image_offset = offset;
        self.image_size = size;
    }

    /// The image portion of the frame data.
    pub fn image(&self) -> &[u8] {
        let end = (self.image_offset + self.image_size).min(self.data.len());
        &self.data[self.image_offset.min(end)..end]
    }
}
