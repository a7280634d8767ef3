//! Response envelope
//!
//! Every daemon response is wrapped in the same JSON envelope. The `type`
//! field tells whether the result is immediate (`sync`) or a background
//! operation (`async`).

use super::path::ApiPath;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Sync,
    Async,
    Error,
}

/// Decoded response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status_code: i64,
    #[serde(default)]
    pub metadata: Value,
    /// Operation path for `async` responses
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error_code: i64,
}

/// Treat an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    pub fn is_async(&self) -> bool {
        self.kind == ResponseType::Async
    }

    /// Operation id of an `async` envelope.
    ///
    /// Falls back to the `id` inside the operation metadata when the
    /// `operation` field is missing.
    pub fn operation_id(&self) -> Option<String> {
        self.operation
            .as_deref()
            .map(ApiPath::parse)
            .and_then(|p| p.last_segment().map(str::to_string))
            .or_else(|| {
                self.metadata
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
    }

    /// Empty sync envelope, used for bodiless 2xx responses.
    pub fn empty_sync() -> Self {
        Self {
            kind: ResponseType::Sync,
            status: "Success".to_string(),
            status_code: 200,
            metadata: Value::Null,
            operation: None,
            error: String::new(),
            error_code: 0,
        }
    }
}
