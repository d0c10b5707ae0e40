//! JSON-RPC 2.0 framing for the printer daemon connection.
//!
//! Outbound traffic is always a request (even fire-and-forget sends carry an
//! id for protocol uniformity). Inbound frames are either a response to a
//! pending request (`id` + `result`/`error`) or an unsolicited notification
//! (`method` + `params`, no id).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, id: u32, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            id,
            params,
        }
    }
}

/// Error object inside a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

/// Inbound frame: response or server notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcFrame {
    /// First positional notification parameter, if any.
    ///
    /// Daemon notifications carry their payload as `params: [payload, ...]`.
    pub fn first_param(&self) -> Option<&Value> {
        self.params.as_ref()?.as_array()?.first()
    }
}
