//! Control-channel message envelope.
//!
//! Control clients exchange JSON command messages with the frame decoder.
//! A request is a `cmd` envelope carrying a command name in `msg_val` and an
//! optional `params` object; the reply echoes `msg_val` and `id` with
//! `msg_type` set to `ack`, or `nack` with an `error` parameter on failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ParamError;
use crate::params::byte_offset;

pub const MSG_TYPE_CMD: &str = "cmd";
pub const MSG_TYPE_ACK: &str = "ack";
pub const MSG_TYPE_NACK: &str = "nack";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub msg_type: String,
    pub msg_val: String,
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl IpcMessage {
    /// Build a command request.
    pub fn cmd(msg_val: impl Into<String>, id: u32, params: Option<Value>) -> Self {
        Self {
            msg_type: MSG_TYPE_CMD.to_string(),
            msg_val: msg_val.into(),
            id,
            timestamp: Utc::now().to_rfc3339(),
            params,
        }
    }

    /// Build an `ack` reply to `request`, echoing its value and id.
    pub fn ack_reply(request: &IpcMessage, params: Option<Value>) -> Self {
        Self {
            msg_type: MSG_TYPE_ACK.to_string(),
            msg_val: request.msg_val.clone(),
            id: request.id,
            timestamp: Utc::now().to_rfc3339(),
            params,
        }
    }

    /// Build a `nack` reply to `request` carrying an `error` parameter.
    pub fn nack_reply(request: &IpcMessage, error: impl Into<String>) -> Self {
        Self {
            msg_type: MSG_TYPE_NACK.to_string(),
            msg_val: request.msg_val.clone(),
            id: request.id,
            timestamp: Utc::now().to_rfc3339(),
            params: Some(json!({ "error": error.into() })),
        }
    }

    /// Build a `nack` for a request that could not be parsed at all.
    pub fn parse_failure_reply(error: impl Into<String>) -> Self {
        Self {
            msg_type: MSG_TYPE_NACK.to_string(),
            msg_val: "unknown".to_string(),
            id: 0,
            timestamp: Utc::now().to_rfc3339(),
            params: Some(json!({ "error": error.into() })),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ParamError> {
        serde_json::from_str(text).map_err(|e| ParamError::Parse {
            offset: byte_offset(text, e.line(), e.column()),
            reason: e.to_string(),
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_cmd(&self) -> bool {
        self.msg_type == MSG_TYPE_CMD
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(name))
    }
}
