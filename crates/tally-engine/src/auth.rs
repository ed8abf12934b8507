//! Gate for commands whose header must carry a token.

use std::sync::Arc;

use tally_core::CommandError;
use tracing::debug;

use crate::token::{Claims, TokenService, TokenVerdict};

#[derive(Clone)]
pub struct AuthGate {
    tokens: Arc<dyn TokenService>,
}

impl AuthGate {
    pub fn new(tokens: Arc<dyn TokenService>) -> Self {
        Self { tokens }
    }

    /// Pick the token to check: the command header wins, the connection's
    /// upgrade `Authorization` value is the fallback. Blank values count
    /// as absent.
    pub fn presented<'a>(header_token: Option<&'a str>, connection_auth: Option<&'a str>) -> Option<&'a str> {
        header_token
            .filter(|t| !t.trim().is_empty())
            .or(connection_auth.filter(|t| !t.trim().is_empty()))
    }

    /// Verdict for a presented token, `None` when nothing was presented.
    pub fn inspect(&self, token: Option<&str>) -> Option<TokenVerdict> {
        token.map(|t| self.tokens.verify(t))
    }

    /// Resolve the principal or refuse with a distinguishable error.
    pub fn authorize(&self, token: Option<&str>) -> Result<Claims, CommandError> {
        match self.inspect(token) {
            None => Err(CommandError::NotAuthenticated),
            Some(TokenVerdict::Valid(claims)) => Ok(claims),
            Some(TokenVerdict::Expired) => {
                debug!("rejected expired token");
                Err(CommandError::TokenExpired)
            }
            Some(TokenVerdict::Invalid) => {
                debug!("rejected invalid token");
                Err(CommandError::InvalidToken)
            }
        }
    }
}
