//! Protocol-level and CDP-level error taxonomy

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC error codes used on the DevTools wire
pub const CODE_PARSE_ERROR: i32 = -32700;
pub const CODE_INVALID_REQUEST: i32 = -32600;
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;
pub const CODE_INVALID_PARAMS: i32 = -32602;
pub const CODE_INTERNAL_ERROR: i32 = -32603;
pub const CODE_SERVER_ERROR_MAX: i32 = -32000;
pub const CODE_SERVER_ERROR_MIN: i32 = -32099;

/// Failures of the JSON layer itself: unparseable records or fields of the
/// wrong shape. These never come from the browser; they indicate a framing
/// or mapping problem on our side of the wire.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Type mismatch for field '{field}': expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

/// The `error` object of a failed reply as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdpErrorObject {
    pub code: i32,

    pub message: String,

    /// Free-form diagnostic payload; Chrome sends strings, objects, and
    /// arrays here depending on the domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Error kind derived from the wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdpErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    Protocol,
}

impl CdpErrorKind {
    /// Map a wire error code to its kind
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_PARSE_ERROR => Self::ParseError,
            CODE_INVALID_REQUEST => Self::InvalidRequest,
            CODE_METHOD_NOT_FOUND => Self::MethodNotFound,
            CODE_INVALID_PARAMS => Self::InvalidParams,
            CODE_INTERNAL_ERROR => Self::InternalError,
            CODE_SERVER_ERROR_MIN..=CODE_SERVER_ERROR_MAX => Self::ServerError,
            _ => Self::Protocol,
        }
    }
}

/// A failed command, as surfaced to the caller of `call`
///
/// The original wire `message` and optional `data` are preserved.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("CDP error {code}: {message}")]
pub struct CdpError {
    pub kind: CdpErrorKind,
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl From<CdpErrorObject> for CdpError {
    fn from(obj: CdpErrorObject) -> Self {
        Self {
            kind: CdpErrorKind::from_code(obj.code),
            code: obj.code,
            message: obj.message,
            data: obj.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CdpErrorKind::from_code(-32700), CdpErrorKind::ParseError);
        assert_eq!(CdpErrorKind::from_code(-32600), CdpErrorKind::InvalidRequest);
        assert_eq!(CdpErrorKind::from_code(-32601), CdpErrorKind::MethodNotFound);
        assert_eq!(CdpErrorKind::from_code(-32602), CdpErrorKind::InvalidParams);
        assert_eq!(CdpErrorKind::from_code(-32603), CdpErrorKind::InternalError);
        assert_eq!(CdpErrorKind::from_code(-32000), CdpErrorKind::ServerError);
        assert_eq!(CdpErrorKind::from_code(-32050), CdpErrorKind::ServerError);
        assert_eq!(CdpErrorKind::from_code(-32099), CdpErrorKind::ServerError);
        assert_eq!(CdpErrorKind::from_code(-1), CdpErrorKind::Protocol);
        assert_eq!(CdpErrorKind::from_code(0), CdpErrorKind::Protocol);
    }

    #[test]
    fn test_wire_message_preserved() {
        let obj = CdpErrorObject {
            code: -32601,
            message: "'Page.navigat' wasn't found".to_string(),
            data: Some(Value::String("some detail".to_string())),
        };

        let err = CdpError::from(obj);
        assert_eq!(err.kind, CdpErrorKind::MethodNotFound);
        assert_eq!(err.message, "'Page.navigat' wasn't found");
        assert_eq!(err.data, Some(Value::String("some detail".to_string())));
    }
}
