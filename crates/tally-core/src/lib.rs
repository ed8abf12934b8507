//! Shared types for the tally command server: identifiers, the clock,
//! wire envelopes, the error taxonomy and the command schema layer.

pub mod clock;
pub mod command;
pub mod errors;
pub mod freshness;
pub mod ids;
pub mod message;
pub mod response;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandBody, CommandHeader, Credentials, TransferBody, Trigger};
pub use errors::{CommandError, FieldViolation, MessageError, PayloadError, PipelineError};
pub use ids::ConnectionId;
pub use message::Message;
pub use response::Response;
