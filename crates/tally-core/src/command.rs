//! Typed command variants and their admission rules.
//!
//! A frame names its variant through the `command` trigger string. Each
//! trigger owns exactly one body shape, and each shape has a pure
//! validator that collects every violation instead of stopping at the
//! first one.

use std::fmt;

use serde_json::{Map, Value};

use crate::errors::{CommandError, FieldViolation, MessageError, PayloadError, PipelineError};
use crate::message::Message;

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    Ping,
    Register,
    Login,
    Balance,
    Transfer,
}

impl Trigger {
    pub const ALL: [Trigger; 5] = [
        Trigger::Ping,
        Trigger::Register,
        Trigger::Login,
        Trigger::Balance,
        Trigger::Transfer,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Register => "register",
            Self::Login => "login",
            Self::Balance => "balance",
            Self::Transfer => "transfer",
        }
    }

    /// Whether the header variant for this trigger must carry a token.
    pub fn requires_token(&self) -> bool {
        matches!(self, Self::Balance | Self::Transfer)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    pub timestamp: i64,
    pub token: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferBody {
    /// Receiving account.
    pub username: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandBody {
    Ping,
    Register(Credentials),
    Login(Credentials),
    Balance,
    Transfer(TransferBody),
}

/// A fully admitted command: envelope parsed, trigger known, schema satisfied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub header: CommandHeader,
    pub trigger: Trigger,
    pub body: CommandBody,
}

impl Command {
    /// Parse and schema-validate a frame.
    ///
    /// Envelope problems are a [`MessageError`], an unknown trigger is
    /// [`CommandError::NotFound`], and field problems in header and body
    /// are reported together as one [`PayloadError`].
    pub fn parse(message: &Message) -> Result<Self, PipelineError> {
        message.validate()?;
        let frame = message.json()?;

        let trigger = frame
            .get("command")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingCommand)?;
        let trigger = Trigger::parse(trigger).ok_or(CommandError::NotFound)?;

        let mut violations = Vec::new();
        let header = validate_header(frame.get("header"), &mut violations);
        let body = validate_body(trigger, frame.get("body"), &mut violations);
        PayloadError::check(violations)?;

        match (header, body) {
            (Some(header), Some(body)) => Ok(Self {
                header,
                trigger,
                body,
            }),
            // Every `None` pushes a violation, so this is unreachable in practice.
            _ => Err(PayloadError::new(vec![FieldViolation::new("command", "is invalid")]).into()),
        }
    }
}

/// Validate the header object shared by every variant.
pub fn validate_header(header: Option<&Value>, violations: &mut Vec<FieldViolation>) -> Option<CommandHeader> {
    let Some(header) = header.and_then(Value::as_object) else {
        violations.push(FieldViolation::new("header", "must be an object"));
        return None;
    };

    let timestamp = match header.get("timestamp") {
        None | Some(Value::Null) => {
            violations.push(FieldViolation::new("header.timestamp", "is required"));
            None
        }
        Some(v) => match as_millis(v) {
            Some(ts) => Some(ts),
            None => {
                violations.push(FieldViolation::new("header.timestamp", "must be a number"));
                None
            }
        },
    };

    let token = match header.get("token") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            violations.push(FieldViolation::new("header.token", "must be a string"));
            None
        }
    };

    timestamp.map(|timestamp| CommandHeader { timestamp, token })
}

/// Validate the body for `trigger`.
pub fn validate_body(
    trigger: Trigger,
    body: Option<&Value>,
    violations: &mut Vec<FieldViolation>,
) -> Option<CommandBody> {
    let empty = Map::new();
    let fields = match body {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(_) => {
            violations.push(FieldViolation::new("body", "must be an object"));
            return None;
        }
    };

    match trigger {
        Trigger::Ping => Some(CommandBody::Ping),
        Trigger::Balance => Some(CommandBody::Balance),
        Trigger::Register => validate_credentials(fields, violations).map(CommandBody::Register),
        Trigger::Login => validate_credentials(fields, violations).map(CommandBody::Login),
        Trigger::Transfer => validate_transfer(fields, violations).map(CommandBody::Transfer),
    }
}

fn validate_credentials(fields: &Map<String, Value>, violations: &mut Vec<FieldViolation>) -> Option<Credentials> {
    let username = required_string(fields, "username", violations);
    let password = required_string(fields, "password", violations).and_then(|p| {
        if p.chars().count() < MIN_PASSWORD_LENGTH {
            violations.push(FieldViolation::new(
                "body.password",
                format!("must be at least {MIN_PASSWORD_LENGTH} characters long"),
            ));
            None
        } else {
            Some(p)
        }
    });
    Some(Credentials {
        username: username?,
        password: password?,
    })
}

fn validate_transfer(fields: &Map<String, Value>, violations: &mut Vec<FieldViolation>) -> Option<TransferBody> {
    let username = required_string(fields, "username", violations);
    let amount = match fields.get("amount") {
        None | Some(Value::Null) => {
            violations.push(FieldViolation::new("body.amount", "is required"));
            None
        }
        Some(Value::Number(n)) => match n.as_i64() {
            Some(amount) => Some(amount),
            None => {
                violations.push(FieldViolation::new("body.amount", "must be a whole number"));
                None
            }
        },
        Some(_) => {
            violations.push(FieldViolation::new("body.amount", "must be a number"));
            None
        }
    };
    Some(TransferBody {
        username: username?,
        amount: amount?,
    })
}

fn required_string(fields: &Map<String, Value>, key: &str, violations: &mut Vec<FieldViolation>) -> Option<String> {
    let path = format!("body.{key}");
    match fields.get(key) {
        None | Some(Value::Null) => {
            violations.push(FieldViolation::new(path, "is required"));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            violations.push(FieldViolation::new(path, "must not be empty"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            violations.push(FieldViolation::new(path, "must be a string"));
            None
        }
    }
}

fn as_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn frame(value: Value) -> Message {
        Message::new(1_700_000_000_000, value.to_string())
    }

    fn payload_fields(err: PipelineError) -> Vec<String> {
        match err {
            PipelineError::Payload(p) => p.violations.into_iter().map(|v| v.field).collect(),
            other => panic!("expected payload error, got {other:?}"),
        }
    }

    #[test]
    fn parses_ping_without_body() {
        let cmd = Command::parse(&frame(json!({
            "header": {"timestamp": 1_700_000_000_000_i64},
            "command": "ping"
        })))
        .unwrap();
        assert_eq!(cmd.trigger, Trigger::Ping);
        assert_eq!(cmd.body, CommandBody::Ping);
        assert_eq!(cmd.header.token, None);
    }

    #[test]
    fn parses_register() {
        let cmd = Command::parse(&frame(json!({
            "header": {"timestamp": 5},
            "command": "register",
            "body": {"username": "alice", "password": "password1"}
        })))
        .unwrap();
        assert_matches!(cmd.body, CommandBody::Register(ref c) if c.username == "alice");
    }

    #[test]
    fn parses_transfer_with_token() {
        let cmd = Command::parse(&frame(json!({
            "header": {"timestamp": 5, "token": "abc"},
            "command": "transfer",
            "body": {"username": "bob", "amount": 200}
        })))
        .unwrap();
        assert_eq!(cmd.header.token.as_deref(), Some("abc"));
        assert_eq!(
            cmd.body,
            CommandBody::Transfer(TransferBody {
                username: "bob".into(),
                amount: 200
            })
        );
    }

    #[test]
    fn missing_command_is_a_message_error() {
        let err = Command::parse(&frame(json!({"header": {"timestamp": 5}}))).unwrap_err();
        assert_eq!(err, PipelineError::Message(MessageError::MissingCommand));
    }

    #[test]
    fn unknown_trigger_is_not_found() {
        let err = Command::parse(&frame(json!({
            "header": {"timestamp": 5},
            "command": "withdraw"
        })))
        .unwrap_err();
        assert_eq!(err, PipelineError::Command(CommandError::NotFound));
    }

    #[test]
    fn collects_every_violation() {
        let err = Command::parse(&frame(json!({
            "header": {"timestamp": "yesterday"},
            "command": "register",
            "body": {"username": 7, "password": "short"}
        })))
        .unwrap_err();
        assert_eq!(
            payload_fields(err),
            vec!["header.timestamp", "body.username", "body.password"]
        );
    }

    #[test]
    fn short_password_message() {
        let err = Command::parse(&frame(json!({
            "header": {"timestamp": 5},
            "command": "login",
            "body": {"username": "alice", "password": "1234567"}
        })))
        .unwrap_err();
        assert!(err.to_string().contains("body.password must be at least 8 characters long"));
    }

    #[test]
    fn amount_must_be_numeric() {
        let err = Command::parse(&frame(json!({
            "header": {"timestamp": 5},
            "command": "transfer",
            "body": {"username": "bob", "amount": "200"}
        })))
        .unwrap_err();
        assert!(err.to_string().contains("body.amount must be a number"));
    }

    #[test]
    fn fractional_amount_is_rejected() {
        let err = Command::parse(&frame(json!({
            "header": {"timestamp": 5},
            "command": "transfer",
            "body": {"username": "bob", "amount": 1.5}
        })))
        .unwrap_err();
        assert!(err.to_string().contains("must be a whole number"));
    }

    #[test]
    fn negative_amount_passes_schema() {
        let cmd = Command::parse(&frame(json!({
            "header": {"timestamp": 5},
            "command": "transfer",
            "body": {"username": "bob", "amount": -5}
        })))
        .unwrap();
        assert_matches!(cmd.body, CommandBody::Transfer(TransferBody { amount: -5, .. }));
    }

    #[test]
    fn header_must_be_object() {
        let err = Command::parse(&frame(json!({"command": "ping"}))).unwrap_err();
        assert_eq!(payload_fields(err), vec!["header"]);
    }

    #[test]
    fn token_must_be_string() {
        let err = Command::parse(&frame(json!({
            "header": {"timestamp": 5, "token": 12},
            "command": "balance"
        })))
        .unwrap_err();
        assert_eq!(payload_fields(err), vec!["header.token"]);
    }

    #[test]
    fn only_balance_and_transfer_require_tokens() {
        let required: Vec<Trigger> = Trigger::ALL.into_iter().filter(Trigger::requires_token).collect();
        assert_eq!(required, vec![Trigger::Balance, Trigger::Transfer]);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "alice".into(),
            password: "hunter22".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter22"));
    }
}
