//! Error taxonomy surfaced to clients.
//!
//! - [`MessageError`]: the frame is not a well-formed command envelope.
//! - [`PayloadError`]: one or more field-level schema violations, aggregated.
//! - [`CommandError`]: a business rule refused the command.
//!
//! None of these tear the connection down; each becomes an error
//! [`Response`] for the request that caused it.

use std::fmt;

use crate::response::Response;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Json(String),
    #[error("Malformed message: expected a JSON object")]
    NotAnObject,
    #[error("Malformed message: empty frame")]
    Empty,
    #[error("Malformed message: invalid timestamp")]
    InvalidTimestamp,
    #[error("Malformed message: missing command")]
    MissingCommand,
    #[error("Malformed message: binary frames are not supported")]
    Binary,
}

impl MessageError {
    pub fn code(&self) -> &'static str {
        "BAD_MESSAGE"
    }

    pub fn to_response(&self) -> Response {
        Response::error(self.to_string()).with("code", self.code())
    }
}

/// A single constraint violation, addressed by dotted field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Every violation found in one command, reported together.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Invalid payload: {}", join(.violations))]
pub struct PayloadError {
    pub violations: Vec<FieldViolation>,
}

fn join(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PayloadError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    /// `Ok(())` when nothing was collected.
    pub fn check(violations: Vec<FieldViolation>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self::new(violations))
        }
    }

    pub fn code(&self) -> &'static str {
        "INVALID_PAYLOAD"
    }

    pub fn to_response(&self) -> Response {
        let fields: Vec<serde_json::Value> = self
            .violations
            .iter()
            .map(|v| serde_json::json!({"field": v.field, "message": v.message}))
            .collect();
        Response::error(self.to_string())
            .with("code", self.code())
            .with("violations", fields)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Command not found")]
    NotFound,
    #[error("Header timestamp is from the future")]
    FromTheFuture,
    #[error("Command timed out")]
    TimedOut,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Token expired, log in again")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Already logged in")]
    AlreadyLoggedIn,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("User {0} not found")]
    UnknownUser(String),
    #[error("Wrong password")]
    WrongPassword,
    #[error("Account no longer exists")]
    AccountGone,
    #[error("Amount must not be negative")]
    NegativeAmount,
    #[error("Cannot transfer to yourself")]
    SelfTransfer,
    #[error("Insufficient balance")]
    InsufficientBalance,
}

impl CommandError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "COMMAND_NOT_FOUND",
            Self::FromTheFuture => "TIMESTAMP_FROM_FUTURE",
            Self::TimedOut => "TIMED_OUT",
            Self::NotAuthenticated => "UNAUTHENTICATED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidToken => "TOKEN_INVALID",
            Self::AlreadyLoggedIn => "ALREADY_LOGGED_IN",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::UnknownUser(_) => "UNKNOWN_USER",
            Self::WrongPassword => "WRONG_PASSWORD",
            Self::AccountGone => "ACCOUNT_GONE",
            Self::NegativeAmount => "NEGATIVE_AMOUNT",
            Self::SelfTransfer => "SELF_TRANSFER",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
        }
    }

    pub fn to_response(&self) -> Response {
        Response::error(self.to_string()).with("code", self.code())
    }
}

/// Anything that stops a frame from reaching a successful handler result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Command(#[from] CommandError),
    /// A collaborator failed. The detail is logged, never sent.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Message(e) => e.code(),
            Self::Payload(e) => e.code(),
            Self::Command(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Uniform error response for the client.
    pub fn to_response(&self) -> Response {
        match self {
            Self::Message(e) => e.to_response(),
            Self::Payload(e) => e.to_response(),
            Self::Command(e) => e.to_response(),
            Self::Internal(_) => Response::error("Internal error").with("code", self.code()),
        }
    }
}
