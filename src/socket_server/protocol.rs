//! Socket protocol message types
//!
//! A small JSON-RPC-like exchange:
//!
//! ```json
//! // Client -> Server
//! {"id": 1, "method": "list", "params": ["users"]}
//!
//! // Server -> Client
//! {"id": 1, "result": ["alice", "bob"]}
//! {"id": 2, "error": {"code": -32601, "message": "unknown endpoint", "data": "lsit"}}
//! {"id": -1, "result": {"users/alice/py-1.0": {...}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{CatalogError, Result};

/// Id carried by every server-initiated index broadcast
pub const BROADCAST_ID: i64 = -1;
/// Id used to answer a request whose own id could not be read
pub const UNKNOWN_ID: i64 = 0;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const NOT_FOUND: i64 = -32004;

/// Client-to-server request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Server-to-client reply to a single request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Result { id: i64, result: Value },
    Error { id: i64, error: JsonError },
}

impl Response {
    pub fn result(id: i64, result: Value) -> Self {
        Self::Result { id, result }
    }

    pub fn error(id: i64, error: JsonError) -> Self {
        Self::Error { id, error }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Frame that was not a well-formed request
    pub fn from_decode(err: &serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Data => Self::new(INVALID_REQUEST, "invalid request"),
            _ => Self::new(PARSE_ERROR, "parse error"),
        }
        .with_data(err.to_string())
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "invalid params").with_data(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "internal error").with_data(detail.into())
    }
}

impl From<CatalogError> for JsonError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownEndpoint { method } => {
                Self::new(METHOD_NOT_FOUND, "unknown endpoint").with_data(method)
            }
            CatalogError::PathNotFound { path } => Self::new(NOT_FOUND, "not found").with_data(path),
            CatalogError::EmptyRepository => Self::new(NOT_FOUND, "not found"),
            CatalogError::InvalidPath { segment } => Self::invalid_params(segment),
            other => Self::internal(other.to_string()),
        }
    }
}

/// Wrap a serialized index snapshot in the broadcast envelope
///
/// The snapshot is embedded verbatim, so it is encoded exactly once no
/// matter how many connections receive it.
pub fn encode_broadcast(snapshot: &str) -> Result<String> {
    #[derive(Serialize)]
    struct Broadcast<'a> {
        id: i64,
        result: &'a RawValue,
    }

    let result: Box<RawValue> = serde_json::from_str(snapshot)?;

    Ok(serde_json::to_string(&Broadcast {
        id: BROADCAST_ID,
        result: &result,
    })?)
}
