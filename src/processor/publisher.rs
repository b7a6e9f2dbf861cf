//! Result socket publisher.
//!
//! Per-frame classification results, and optionally the image itself, are
//! published on a ZeroMQ PUB socket. The socket is bound lazily when the
//! address is first configured; re-binding to a new address releases the
//! prior bind.

use serde::{Deserialize, Serialize};

use crate::error::ProcessorError;

/// Per-frame result message published on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_number: u32,
    /// Model run time in milliseconds.
    pub process_time: u32,
    pub result: Vec<f32>,
}

/// Header describing an attached image, sent ahead of the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub frame_number: u32,
    pub width: u32,
    pub height: u32,
    pub dtype: String,
    pub timestamp: String,
}

pub struct ResultPublisher {
    context: zmq::Context,
    socket: Option<zmq::Socket>,
    endpoint: Option<String>,
}

impl Default for ResultPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultPublisher {
    pub fn new() -> Self {
        Self {
            context: zmq::Context::new(),
            socket: None,
            endpoint: None,
        }
    }

    /// Bind the PUB socket to `endpoint`, releasing any prior bind.
    ///
    /// Re-binding to the current endpoint is a no-op.
    pub fn bind(&mut self, endpoint: &str) -> Result<(), ProcessorError> {
        if self.endpoint.as_deref() == Some(endpoint) {
            return Ok(());
        }
        if let Some(previous) = self.endpoint.take() {
            log::info!("Releasing result socket bound to {previous}");
            self.socket = None;
        }

        let socket = self.context.socket(zmq::PUB)?;
        socket.bind(endpoint)?;
        log::info!("Result socket bound to {endpoint}");
        self.socket = Some(socket);
        self.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    /// Publish a frame result, with an optional attached image.
    ///
    /// With no image the message is a single JSON part; with an image it is
    /// three parts: the JSON result, a JSON image header and the raw image
    /// bytes.
    pub fn publish(
        &self,
        result: &FrameResult,
        image: Option<(&ImageHeader, &[u8])>,
    ) -> Result<(), ProcessorError> {
        let socket = self.socket.as_ref().ok_or(ProcessorError::NotBound)?;

        let result_json = serde_json::to_string(result)
            .map_err(|e| ProcessorError::Model(format!("failed to encode result: {e}")))?;

        match image {
            None => socket.send(result_json.as_bytes(), 0)?,
            Some((header, data)) => {
                let header_json = serde_json::to_string(header)
                    .map_err(|e| ProcessorError::Model(format!("failed to encode header: {e}")))?;
                socket.send(result_json.as_bytes(), zmq::SNDMORE)?;
                socket.send(header_json.as_bytes(), zmq::SNDMORE)?;
                socket.send(data, 0)?;
            }
        }
        Ok(())
    }
}
