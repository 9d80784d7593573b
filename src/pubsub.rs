//! Pub/Sub push envelope and payload decoding.
//!
//! The delivery platform POSTs a `MessagePublishedData` document:
//!
//! ```json
//! {
//!   "message": {
//!     "data": "eyJtb2lzdHVyZSI6IDM1MH0=",
//!     "messageId": "2070443601311540",
//!     "publishTime": "2021-02-26T19:13:55.749Z",
//!     "attributes": {}
//!   },
//!   "subscription": "projects/my-project/subscriptions/my-sub"
//! }
//! ```
//!
//! `data` carries base64 of a UTF-8 JSON object.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("push envelope is not valid JSON: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("message has no data field")]
    MissingData,

    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("message data is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("message data is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("message data must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PubsubMessage,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    pub data: Option<String>,
    #[serde(alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(alias = "publish_time")]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl PushEnvelope {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Envelope)
    }
}

impl PubsubMessage {
    /// base64 → UTF-8 → JSON object.
    pub fn decode_payload(&self) -> Result<Map<String, Value>, DecodeError> {
        let encoded = self.data.as_deref().ok_or(DecodeError::MissingData)?;
        let bytes = STANDARD.decode(encoded)?;
        let text = String::from_utf8(bytes)?;
        match serde_json::from_str::<Value>(&text).map_err(DecodeError::Json)? {
            Value::Object(map) => Ok(map),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
