//! Frame header layout and pixel data types.
//!
//! Every image buffer handed to the downstream pipeline starts with a
//! [`FrameHeader`]: five consecutive little-endian 32-bit words, 20 bytes,
//! no padding. The image data follows immediately, `frame_size` bytes long.

use crate::error::FrameError;

/// Size of the binary frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 20;

/// Pixel data types carried in `frame_data_type`.
///
/// Raw 16-bit is the native PCO CameraLink format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    Raw8 = 1,
    #[default]
    Raw16 = 2,
    Raw32 = 3,
    Raw64 = 4,
    Float32 = 5,
}

impl DataType {
    pub fn from_u32(value: u32) -> Result<Self, FrameError> {
        match value {
            1 => Ok(DataType::Raw8),
            2 => Ok(DataType::Raw16),
            3 => Ok(DataType::Raw32),
            4 => Ok(DataType::Raw64),
            5 => Ok(DataType::Float32),
            other => Err(FrameError::UnknownDataType(other)),
        }
    }

    /// Pixel type matching a camera's per-pixel byte width.
    pub fn from_pixel_bytes(pixel_bytes: u32) -> Option<Self> {
        match pixel_bytes {
            1 => Some(DataType::Raw8),
            2 => Some(DataType::Raw16),
            4 => Some(DataType::Raw32),
            8 => Some(DataType::Raw64),
            _ => None,
        }
    }

    pub fn pixel_bytes(self) -> usize {
        match self {
            DataType::Raw8 => 1,
            DataType::Raw16 => 2,
            DataType::Raw32 | DataType::Float32 => 4,
            DataType::Raw64 => 8,
        }
    }

    /// Type name used in published image headers.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Raw8 => "uint8",
            DataType::Raw16 => "uint16",
            DataType::Raw32 => "uint32",
            DataType::Raw64 => "uint64",
            DataType::Float32 => "float32",
        }
    }
}

/// Fixed-layout header prepended to every image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub frame_number: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_data_type: u32,
    pub frame_size: u32,
}

impl FrameHeader {
    /// Serialise the header into the first [`FRAME_HEADER_SIZE`] bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Truncated { len: buf.len() });
        }
        buf[0..4].copy_from_slice(&self.frame_number.to_le_bytes());
        buf[4..8].copy_from_slice(&self.frame_width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.frame_height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.frame_data_type.to_le_bytes());
        buf[16..20].copy_from_slice(&self.frame_size.to_le_bytes());
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        // Infallible: the buffer is exactly FRAME_HEADER_SIZE bytes.
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn read_from(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Truncated { len: buf.len() });
        }
        let word = |offset: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[offset..offset + 4]);
            u32::from_le_bytes(bytes)
        };
        Ok(FrameHeader {
            frame_number: word(0),
            frame_width: word(4),
            frame_height: word(8),
            frame_data_type: word(12),
            frame_size: word(16),
        })
    }
}
