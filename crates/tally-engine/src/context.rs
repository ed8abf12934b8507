use std::sync::Arc;

use tally_core::{Clock, Command, ConnectionId};
use tally_store::AccountRepo;

use crate::auth::AuthGate;
use crate::hasher::PasswordHasher;
use crate::token::{Claims, TokenService};

/// What the pipeline knows about the connection a frame arrived on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    /// `Authorization` header captured at upgrade time.
    pub authorization: Option<String>,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, authorization: Option<String>) -> Self {
        Self { id, authorization }
    }
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct HandlerDeps {
    pub accounts: Arc<dyn AccountRepo>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub tokens: Arc<dyn TokenService>,
    pub auth: AuthGate,
    pub clock: Arc<dyn Clock>,
    /// Balance credited to freshly registered accounts.
    pub initial_balance: i64,
}

impl HandlerDeps {
    pub fn new(
        accounts: Arc<dyn AccountRepo>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let auth = AuthGate::new(Arc::clone(&tokens));
        Self {
            accounts,
            hasher,
            tokens,
            auth,
            clock,
            initial_balance: 0,
        }
    }

    pub fn with_initial_balance(mut self, initial_balance: i64) -> Self {
        self.initial_balance = initial_balance;
        self
    }
}

/// One admitted command on its way to a handler.
pub struct CommandContext<'a> {
    pub command: &'a Command,
    pub connection: &'a ConnectionContext,
    /// Set when the trigger required a token and it verified.
    pub principal: Option<Claims>,
}

impl CommandContext<'_> {
    /// The token this command presents, after connection fallback.
    pub fn presented_token(&self) -> Option<&str> {
        AuthGate::presented(
            self.command.header.token.as_deref(),
            self.connection.authorization.as_deref(),
        )
    }
}
