//! CDP wire messages
//!
//! One outbound shape and three inbound shapes. Chrome interleaves replies
//! and events on the same stream; `Message::parse` classifies each record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CdpErrorObject, ProtocolError};
use crate::params::camelize_params;

/// Outbound command record
///
/// Serializes to `{"id":N,"method":"Domain.method","params":{...},"sessionId":"..."}`.
/// `params` and `sessionId` are omitted from the wire when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Command {
    /// Build a command record
    ///
    /// Top-level param keys given in snake_case are mapped to their wire
    /// camelCase form here (`max_total_buffer_size` becomes
    /// `maxTotalBufferSize`). `Null` or an empty object counts as "no
    /// params" and is dropped from the wire; some CDP methods reject an
    /// explicit empty `params`.
    pub fn new(id: u64, method: &str, params: Value, session_id: Option<&str>) -> Self {
        let params = match camelize_params(params) {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other),
        };

        Self {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(|s| s.to_string()),
        }
    }

    /// Serialize to JSON text for transmission
    pub fn serialize(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationFailed(e.to_string()))
    }
}

/// Successful reply to a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,

    pub result: Value,

    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Failed reply to a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: u64,

    pub error: CdpErrorObject,

    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Server-pushed notification
///
/// Events carry no id and are never retained by the connection; subscribers
/// receive owned copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub method: String,

    pub params: Value,

    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A classified inbound record
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response(Response),
    Error(ErrorResponse),
    Event(Event),
}

/// Superset of all inbound field combinations, used for classification
#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpErrorObject>,
    method: Option<String>,
    params: Option<Value>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl Message {
    /// Parse and classify one inbound JSON record
    ///
    /// - `id` + `error` is an error response
    /// - `id` is a response; a missing `result` is an empty object (some CDP
    ///   commands legitimately return no fields)
    /// - `method` without `id` is an event
    ///
    /// Anything else is `ProtocolError::InvalidMessage`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

        match raw {
            RawMessage {
                id: Some(id),
                error: Some(error),
                session_id,
                ..
            } => Ok(Message::Error(ErrorResponse {
                id,
                error,
                session_id,
            })),
            RawMessage {
                id: Some(id),
                result,
                session_id,
                ..
            } => Ok(Message::Response(Response {
                id,
                result: result.unwrap_or_else(|| Value::Object(Default::default())),
                session_id,
            })),
            RawMessage {
                id: None,
                method: Some(method),
                params,
                session_id,
                ..
            } => Ok(Message::Event(Event {
                method,
                params: params.unwrap_or_else(|| Value::Object(Default::default())),
                session_id,
            })),
            _ => Err(ProtocolError::InvalidMessage(
                "record has neither an id nor a method".to_string(),
            )),
        }
    }
}
