//! Dispatch table from trigger to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{PipelineError, Response, Trigger};

use crate::context::{CommandContext, HandlerDeps};
use crate::handlers::{BalanceHandler, LoginHandler, PingHandler, RegisterHandler, TransferHandler};

/// Trait implemented by every command handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &CommandContext<'_>, deps: &HandlerDeps) -> Result<Response, PipelineError>;
}

/// Registry mapping triggers to handlers.
pub struct CommandRegistry {
    handlers: HashMap<Trigger, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in handler for every trigger.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Trigger::Ping, PingHandler);
        registry.register(Trigger::Register, RegisterHandler);
        registry.register(Trigger::Login, LoginHandler);
        registry.register(Trigger::Balance, BalanceHandler);
        registry.register(Trigger::Transfer, TransferHandler);
        registry
    }

    /// Register (or replace) the handler for a trigger.
    pub fn register(&mut self, trigger: Trigger, handler: impl CommandHandler + 'static) {
        self.handlers.insert(trigger, Arc::new(handler));
    }

    pub fn get(&self, trigger: Trigger) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&trigger).cloned()
    }

    /// Registered trigger names (sorted).
    pub fn triggers(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().map(Trigger::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
