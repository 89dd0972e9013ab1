//! # Wire Envelopes
//!
//! Every message crossing a context boundary is a [`ContextMessage`]. The
//! JSON form is tagged by `type`:
//!
//! | Envelope | JSON |
//! |---|---|
//! | handshake | `{"type":"connect"}` → `{"type":"ready"}` |
//! | call | `{"type":"start","callId":"…","data":…}` |
//! | reply | `{"type":"result","callId":"…","result":…}` |
//! | failed reply | `{"type":"failure","callId":"…","error":"…"}` |
//! | diagnostics | `{"type":"log","level":"info","str":"…"}` |
//! | stop request | `{"type":"stop"}` |
//!
//! Portal calls nest a [`CallData`] inside `data`:
//! `{"fn":"fn0","args":[…],"bridgeId":"…"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Generates a fresh, single-use correlation id.
pub fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Severity carried by a forwarded `log` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A message exchanged between a context and its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContextMessage {
    /// Sent by the owner when it starts supervising a context.
    Connect,
    /// Sent by the context once it can accept calls.
    Ready,
    /// A call request.
    Start {
        #[serde(rename = "callId")]
        call_id: String,
        data: Value,
    },
    /// The successful reply to the `Start` with the same call id.
    Result {
        #[serde(rename = "callId")]
        call_id: String,
        result: Value,
    },
    /// The failed reply to the `Start` with the same call id.
    Failure {
        #[serde(rename = "callId")]
        call_id: String,
        error: String,
    },
    /// A diagnostic line to forward to the owner's logger.
    Log {
        level: LogLevel,
        #[serde(rename = "str")]
        text: String,
    },
    /// Asks the context to shut itself down.
    Stop,
}

impl ContextMessage {
    /// The correlation id for call and reply envelopes.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            ContextMessage::Start { call_id, .. }
            | ContextMessage::Result { call_id, .. }
            | ContextMessage::Failure { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Short tag used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ContextMessage::Connect => "connect",
            ContextMessage::Ready => "ready",
            ContextMessage::Start { .. } => "start",
            ContextMessage::Result { .. } => "result",
            ContextMessage::Failure { .. } => "failure",
            ContextMessage::Log { .. } => "log",
            ContextMessage::Stop => "stop",
        }
    }
}

/// The portal payload nested inside a `start` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    /// Registry name of the target function
    #[serde(rename = "fn")]
    pub function: String,
    pub args: Vec<Value>,
    /// Portal id of the sender; receivers ignore foreign ids
    #[serde(rename = "bridgeId")]
    pub bridge_id: String,
}

impl CallData {
    pub fn new(function: impl Into<String>, args: Vec<Value>, bridge_id: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args,
            bridge_id: bridge_id.into(),
        }
    }

    /// Decodes the `data` field of a `start` envelope, if it is a portal call.
    pub fn from_value(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        // A struct of strings and JSON values always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
