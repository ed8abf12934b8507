use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound frame: `{ timestamp, message?, error?, ...extra }`.
///
/// `timestamp` stays empty until the connection actually writes the
/// response; see [`Response::stamp`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful response carrying a human-readable message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Failed response: `error: true` plus a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            error: Some(true),
            ..Self::default()
        }
    }

    /// Attach an extra top-level field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error == Some(true)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Set the send-time timestamp.
    pub fn stamp(&mut self, now_ms: i64) {
        self.timestamp = Some(now_ms);
    }
}
