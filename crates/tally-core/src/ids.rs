use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const CONNECTION_PREFIX: &str = "conn";

/// Identifier handed to a client in its greeting, `conn_<uuid v7>`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("{CONNECTION_PREFIX}_{}", Uuid::now_v7()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ConnectionId::from_raw("conn-fixed");
        assert_eq!(id.as_str(), "conn-fixed");
        assert_eq!(id.to_string(), "conn-fixed");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ConnectionId::from_raw("conn_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""conn_1""#);
    }
}
