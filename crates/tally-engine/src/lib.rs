pub mod auth;
pub mod context;
pub mod error;
pub mod handlers;
pub mod hasher;
pub mod pipeline;
pub mod registry;
pub mod token;

pub use auth::AuthGate;
pub use context::{CommandContext, ConnectionContext, HandlerDeps};
pub use error::{HashError, TokenError};
pub use hasher::{PasswordHasher, Pbkdf2PasswordHasher};
pub use pipeline::CommandPipeline;
pub use registry::{CommandHandler, CommandRegistry};
pub use token::{Claims, JwtTokenService, TokenService, TokenVerdict};
