//! Built-in command handlers.

use async_trait::async_trait;
use tally_core::{CommandBody, CommandError, PipelineError, Response};
use tally_store::{Account, StoreError};
use tracing::{debug, info};

use crate::context::{CommandContext, HandlerDeps};
use crate::registry::CommandHandler;
use crate::token::TokenVerdict;

fn wrong_body(ctx: &CommandContext<'_>) -> PipelineError {
    PipelineError::Internal(format!("body does not match trigger {}", ctx.command.trigger))
}

fn principal<'a>(ctx: &'a CommandContext<'_>) -> Result<&'a str, PipelineError> {
    ctx.principal
        .as_ref()
        .map(|claims| claims.sub.as_str())
        .ok_or_else(|| CommandError::NotAuthenticated.into())
}

// ── ping ──

/// Round-trip latency against the header timestamp.
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, ctx: &CommandContext<'_>, deps: &HandlerDeps) -> Result<Response, PipelineError> {
        let latency = deps.clock.now_ms() - ctx.command.header.timestamp;
        Ok(Response::message("pong").with("latency", latency))
    }
}

// ── register ──

pub struct RegisterHandler;

#[async_trait]
impl CommandHandler for RegisterHandler {
    async fn handle(&self, ctx: &CommandContext<'_>, deps: &HandlerDeps) -> Result<Response, PipelineError> {
        let CommandBody::Register(creds) = &ctx.command.body else {
            return Err(wrong_body(ctx));
        };

        if deps.accounts.find_by_username(&creds.username).is_some() {
            return Err(CommandError::UsernameTaken.into());
        }

        let password_hash = deps.hasher.hash(&creds.password).await?;

        // Another registration may have won while we were hashing;
        // `create` is insert-if-absent so only one of them lands.
        deps.accounts
            .create(Account {
                username: creds.username.clone(),
                password_hash,
                balance: deps.initial_balance,
            })
            .map_err(|e| match e {
                StoreError::Conflict(_) => PipelineError::from(CommandError::UsernameTaken),
                other => PipelineError::Internal(other.to_string()),
            })?;

        let token = deps.tokens.sign(&creds.username)?;
        info!(username = %creds.username, connection_id = %ctx.connection.id, "account registered");
        Ok(Response::message("Registered").with("token", token))
    }
}

// ── login ──

pub struct LoginHandler;

#[async_trait]
impl CommandHandler for LoginHandler {
    async fn handle(&self, ctx: &CommandContext<'_>, deps: &HandlerDeps) -> Result<Response, PipelineError> {
        let CommandBody::Login(creds) = &ctx.command.body else {
            return Err(wrong_body(ctx));
        };

        if let Some(TokenVerdict::Valid(_)) = deps.auth.inspect(ctx.presented_token()) {
            return Err(CommandError::AlreadyLoggedIn.into());
        }

        let account = deps
            .accounts
            .find_by_username(&creds.username)
            .ok_or_else(|| CommandError::UnknownUser(creds.username.clone()))?;

        if !deps.hasher.verify(&creds.password, &account.password_hash).await? {
            debug!(username = %creds.username, "password mismatch");
            return Err(CommandError::WrongPassword.into());
        }

        let token = deps.tokens.sign(&account.username)?;
        info!(username = %account.username, connection_id = %ctx.connection.id, "logged in");
        Ok(Response::message("Logged in").with("token", token))
    }
}

// ── balance ──

pub struct BalanceHandler;

#[async_trait]
impl CommandHandler for BalanceHandler {
    async fn handle(&self, ctx: &CommandContext<'_>, deps: &HandlerDeps) -> Result<Response, PipelineError> {
        let username = principal(ctx)?;
        let account = deps
            .accounts
            .find_by_username(username)
            .ok_or(CommandError::AccountGone)?;
        Ok(Response::message("Balance").with("balance", account.balance))
    }
}

// ── transfer ──

pub struct TransferHandler;

#[async_trait]
impl CommandHandler for TransferHandler {
    async fn handle(&self, ctx: &CommandContext<'_>, deps: &HandlerDeps) -> Result<Response, PipelineError> {
        let CommandBody::Transfer(body) = &ctx.command.body else {
            return Err(wrong_body(ctx));
        };
        let source = principal(ctx)?;

        if body.amount < 0 {
            return Err(CommandError::NegativeAmount.into());
        }
        if body.username == source {
            return Err(CommandError::SelfTransfer.into());
        }
        if deps.accounts.find_by_username(&body.username).is_none() {
            return Err(CommandError::UnknownUser(body.username.clone()).into());
        }
        let from = deps
            .accounts
            .find_by_username(source)
            .ok_or(CommandError::AccountGone)?;
        if from.balance < body.amount {
            return Err(CommandError::InsufficientBalance.into());
        }

        let receipt = deps
            .accounts
            .transfer(source, &body.username, body.amount)
            .map_err(|e| match e {
                StoreError::InsufficientBalance { .. } => PipelineError::from(CommandError::InsufficientBalance),
                StoreError::NotFound(_) => PipelineError::from(CommandError::AccountGone),
                other => PipelineError::Internal(other.to_string()),
            })?;

        info!(
            from = %source,
            to = %body.username,
            amount = body.amount,
            "transfer applied"
        );
        Ok(Response::message("Transfer complete").with("balance", receipt.from_balance))
    }
}
