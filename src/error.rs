//! Custom error types for the crate.
//!
//! Errors are split by subsystem: parameter containers, the camera state
//! machine, the camera controller (wrapping device errors), the frame decoder
//! facade and the frame processor plugin. Control-channel handlers convert
//! these into `nack` replies rather than letting them escape.

use thiserror::Error;

use crate::camera::device::PcoError;

/// Errors raised by parameter containers while decoding or applying JSON.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// The supplied document was not valid JSON.
    #[error("JSON parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// A value in the document cannot be coerced to the bound parameter type.
    #[error("type mismatch for parameter {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

/// Errors raised by frame header encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame buffer too small for header: {len} bytes")]
    Truncated { len: usize },

    #[error("unknown frame data type {0}")]
    UnknownDataType(u32),
}

/// Errors raised by camera controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{0}")]
    Device(#[from] PcoError),

    #[error("camera is not connected")]
    NotConnected,

    #[error(transparent)]
    Config(#[from] ParamError),
}

/// Errors raised by the camera state machine.
#[derive(Debug, Error)]
pub enum CameraStateError {
    #[error("unknown camera state transition command: {0}")]
    UnknownCommand(String),

    #[error("{command} is not valid in {state} state")]
    IllegalTransition {
        command: &'static str,
        state: &'static str,
    },

    #[error("camera {command} operation failed: {source}")]
    OperationFailed {
        command: &'static str,
        #[source]
        source: ControllerError,
    },
}

/// Errors raised while initialising the frame decoder.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("camera startup sequence failed: {0}")]
    Init(#[from] CameraStateError),

    #[error("failed to read image geometry: {0}")]
    Geometry(#[from] ControllerError),

    #[error("failed to start acquisition service: {0}")]
    Service(String),
}

/// Errors raised by the frame processor plugin.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Config(#[from] ParamError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("no inference model loaded")]
    NoModel,

    #[error("model error: {0}")]
    Model(String),

    #[error("result socket error: {0}")]
    Socket(#[from] zmq::Error),

    #[error("result socket address not configured")]
    NotBound,
}
