//! Payload - タスクに添付される構造化データ
//!
//! payload は任意の bytes ではなく、エンコード済みの「オブジェクト」でなければならない。
//! ここでは JSON document を採用し、root が object であることを検証する。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Why a payload was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not a well-formed document: {0}")]
    Malformed(String),

    #[error("payload document must be an object, got {0}")]
    NotAnObject(&'static str),
}

/// Encoded payload bytes, kept as written by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Encode a JSON value. Does not validate; call [`Payload::to_object`] for that.
    pub fn from_value(value: &Value) -> Self {
        Self(value.to_string().into_bytes())
    }

    /// The empty object document.
    pub fn empty() -> Self {
        Self(b"{}".to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode and check that the document root is an object.
    pub fn to_object(&self) -> Result<Map<String, Value>, PayloadError> {
        let value: Value =
            serde_json::from_slice(&self.0).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(PayloadError::NotAnObject(kind_of(&other))),
        }
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        self.to_object().map(|_| ())
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
