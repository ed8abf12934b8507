//! The raw client payload as it arrives from the transport, before any
//! command interpretation.

use serde::{Deserialize, Serialize};

use crate::errors::MessageError;

/// A single inbound frame: when it was received and its text content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: i64,
    pub content: String,
}

impl Message {
    pub fn new(timestamp: i64, content: impl Into<String>) -> Self {
        Self {
            timestamp,
            content: content.into(),
        }
    }

    /// Check the envelope itself: a positive timestamp and non-empty content.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.timestamp <= 0 {
            return Err(MessageError::InvalidTimestamp);
        }
        if self.content.trim().is_empty() {
            return Err(MessageError::Empty);
        }
        Ok(())
    }

    /// Decode the content as a JSON object.
    pub fn json(&self) -> Result<serde_json::Map<String, serde_json::Value>, MessageError> {
        match serde_json::from_str::<serde_json::Value>(&self.content) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(MessageError::NotAnObject),
            Err(e) => Err(MessageError::Json(e.to_string())),
        }
    }
}
