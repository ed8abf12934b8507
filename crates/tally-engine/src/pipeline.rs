//! Frame to response: parse, admit, dispatch.

use tally_core::freshness::{check_freshness, FRESHNESS_WINDOW_MS};
use tally_core::{Command, CommandError, Message, PipelineError, Response};
use tracing::{debug, instrument, warn};

use crate::context::{CommandContext, ConnectionContext, HandlerDeps};
use crate::registry::CommandRegistry;

pub struct CommandPipeline {
    registry: CommandRegistry,
    deps: HandlerDeps,
    freshness_window_ms: i64,
}

impl CommandPipeline {
    pub fn new(registry: CommandRegistry, deps: HandlerDeps) -> Self {
        Self {
            registry,
            deps,
            freshness_window_ms: FRESHNESS_WINDOW_MS,
        }
    }

    pub fn with_freshness_window(mut self, window_ms: i64) -> Self {
        self.freshness_window_ms = window_ms;
        self
    }

    pub fn deps(&self) -> &HandlerDeps {
        &self.deps
    }

    /// Run one frame through every admission stage and its handler.
    ///
    /// Stages run in order: envelope, trigger, payload schema, freshness,
    /// token (only for triggers that need one), handler. The first
    /// failing stage decides the error.
    pub async fn process(&self, connection: &ConnectionContext, message: &Message) -> Result<Response, PipelineError> {
        let command = Command::parse(message)?;

        check_freshness(
            command.header.timestamp,
            self.deps.clock.now_ms(),
            self.freshness_window_ms,
        )?;

        let mut ctx = CommandContext {
            command: &command,
            connection,
            principal: None,
        };
        if command.trigger.requires_token() {
            ctx.principal = Some(self.deps.auth.authorize(ctx.presented_token())?);
        }

        let handler = self.registry.get(command.trigger).ok_or(CommandError::NotFound)?;
        handler.handle(&ctx, &self.deps).await
    }

    /// Like [`process`](Self::process), but failures become error responses.
    #[instrument(skip_all, fields(connection_id = %connection.id))]
    pub async fn handle(&self, connection: &ConnectionContext, message: &Message) -> Response {
        match self.process(connection, message).await {
            Ok(response) => response,
            Err(PipelineError::Internal(detail)) => {
                warn!(error = %detail, "command failed internally");
                PipelineError::Internal(detail).to_response()
            }
            Err(e) => {
                debug!(code = e.code(), error = %e, "command rejected");
                e.to_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tally_core::{Clock, ConnectionId, ManualClock, SystemClock, Trigger};
    use tally_store::InMemoryAccountRepo;

    use crate::hasher::Pbkdf2PasswordHasher;
    use crate::token::{JwtTokenService, TokenService};

    struct Harness {
        pipeline: CommandPipeline,
        clock: Arc<ManualClock>,
        connection: ConnectionContext,
    }

    fn harness_with_registry(registry: CommandRegistry) -> Harness {
        let clock = Arc::new(ManualClock::new(SystemClock.now_ms()));
        let tokens = Arc::new(JwtTokenService::new(
            &SecretString::from("pipeline-secret".to_string()),
            3600,
            clock.clone(),
        ));
        let deps = HandlerDeps::new(
            Arc::new(InMemoryAccountRepo::new()),
            Arc::new(Pbkdf2PasswordHasher::new(2)),
            tokens,
            clock.clone(),
        )
        .with_initial_balance(1000);
        Harness {
            pipeline: CommandPipeline::new(registry, deps),
            clock,
            connection: ConnectionContext::new(ConnectionId::from_raw("conn_test"), None),
        }
    }

    fn harness() -> Harness {
        harness_with_registry(CommandRegistry::with_defaults())
    }

    impl Harness {
        fn frame(&self, command: &str, header: Value, body: Value) -> Message {
            let mut frame = json!({"command": command, "header": header});
            if !body.is_null() {
                frame["body"] = body;
            }
            Message::new(self.clock.now_ms(), frame.to_string())
        }

        fn header(&self) -> Value {
            json!({"timestamp": self.clock.now_ms()})
        }

        fn header_with_token(&self, token: &str) -> Value {
            json!({"timestamp": self.clock.now_ms(), "token": token})
        }

        async fn send(&self, message: Message) -> Response {
            self.pipeline.handle(&self.connection, &message).await
        }

        async fn register(&self, username: &str) -> String {
            let resp = self
                .send(self.frame(
                    "register",
                    self.header(),
                    json!({"username": username, "password": "password1"}),
                ))
                .await;
            assert!(!resp.is_error(), "register failed: {resp:?}");
            resp.get("token").and_then(Value::as_str).unwrap().to_owned()
        }
    }

    fn code(resp: &Response) -> &str {
        resp.get("code").and_then(Value::as_str).unwrap_or_default()
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let h = harness();
        let resp = h.send(h.frame("ping", h.header(), Value::Null)).await;
        assert!(!resp.is_error());
        assert_eq!(resp.message.as_deref(), Some("pong"));
        assert_eq!(resp.get("latency"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn malformed_frames_are_bad_messages() {
        let h = harness();
        for content in ["not json", "[1,2]", "   ", r#"{"header":{}}"#] {
            let resp = h.send(Message::new(h.clock.now_ms(), content)).await;
            assert!(resp.is_error());
            assert_eq!(code(&resp), "BAD_MESSAGE", "for {content:?}");
        }
    }

    #[tokio::test]
    async fn unknown_trigger_is_not_found() {
        let h = harness();
        let resp = h.send(h.frame("withdraw", h.header(), Value::Null)).await;
        assert_eq!(resp.message.as_deref(), Some("Command not found"));
        assert_eq!(code(&resp), "COMMAND_NOT_FOUND");
    }

    #[tokio::test]
    async fn unregistered_handler_is_not_found() {
        let h = harness_with_registry(CommandRegistry::new());
        let resp = h.send(h.frame("ping", h.header(), Value::Null)).await;
        assert_eq!(code(&resp), "COMMAND_NOT_FOUND");
    }

    #[tokio::test]
    async fn payload_violations_are_aggregated() {
        let h = harness();
        let resp = h
            .send(h.frame("register", json!({}), json!({"username": "", "password": "short"})))
            .await;
        assert_eq!(code(&resp), "INVALID_PAYLOAD");
        let violations = resp.get("violations").and_then(Value::as_array).unwrap();
        assert!(violations.len() >= 3, "got {violations:?}");
    }

    #[tokio::test]
    async fn freshness_window_edges() {
        let h = harness();
        let now = h.clock.now_ms();

        let ahead = h.frame("ping", json!({"timestamp": now + 1}), Value::Null);
        assert_eq!(code(&h.send(ahead).await), "TIMESTAMP_FROM_FUTURE");

        let stale = h.frame("ping", json!({"timestamp": now - 501}), Value::Null);
        assert_eq!(code(&h.send(stale).await), "TIMED_OUT");

        let boundary = h.frame("ping", json!({"timestamp": now - 500}), Value::Null);
        assert_eq!(code(&h.send(boundary).await), "TIMED_OUT");

        let recent = h.frame("ping", json!({"timestamp": now - 499}), Value::Null);
        assert!(!h.send(recent).await.is_error());
    }

    #[tokio::test]
    async fn custom_freshness_window() {
        let mut h = harness();
        h.pipeline = h.pipeline.with_freshness_window(2_000);
        let now = h.clock.now_ms();
        let resp = h.send(h.frame("ping", json!({"timestamp": now - 1_500}), Value::Null)).await;
        assert!(!resp.is_error());
    }

    #[tokio::test]
    async fn protected_trigger_without_token() {
        let h = harness();
        let resp = h.send(h.frame("balance", h.header(), Value::Null)).await;
        assert_eq!(code(&resp), "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn expired_and_invalid_tokens_are_distinct() {
        let h = harness();
        let _ = h.register("alice").await;

        // Issued two hours ago with a one hour lifetime.
        let past = ManualClock::new(h.clock.now_ms() - 7_200_000);
        let old = JwtTokenService::new(&SecretString::from("pipeline-secret".to_string()), 3600, Arc::new(past))
            .sign("alice")
            .unwrap();

        let expired = h.send(h.frame("balance", h.header_with_token(&old), Value::Null)).await;
        let invalid = h
            .send(h.frame("balance", h.header_with_token("not.a.jwt"), Value::Null))
            .await;
        assert_eq!(code(&expired), "TOKEN_EXPIRED");
        assert_eq!(code(&invalid), "TOKEN_INVALID");
        assert_ne!(expired.message, invalid.message);
    }

    #[tokio::test]
    async fn connection_authorization_is_fallback() {
        let mut h = harness();
        let token = h.register("alice").await;
        h.connection.authorization = Some(format!("Bearer {token}"));
        let resp = h.send(h.frame("balance", h.header(), Value::Null)).await;
        assert_eq!(resp.get("balance"), Some(&json!(1000)));
    }

    #[tokio::test]
    async fn register_login_balance_transfer() {
        let h = harness();
        let alice = h.register("alice").await;
        let _ = h.register("bob").await;

        let login = h
            .send(h.frame("login", h.header(), json!({"username": "bob", "password": "password1"})))
            .await;
        assert_eq!(login.message.as_deref(), Some("Logged in"));
        let bob = login.get("token").and_then(Value::as_str).unwrap().to_owned();

        let sent = h
            .send(h.frame(
                "transfer",
                h.header_with_token(&alice),
                json!({"username": "bob", "amount": 250}),
            ))
            .await;
        assert_eq!(sent.get("balance"), Some(&json!(750)));

        let resp = h.send(h.frame("balance", h.header_with_token(&bob), Value::Null)).await;
        assert_eq!(resp.get("balance"), Some(&json!(1250)));
    }

    #[tokio::test]
    async fn failed_hash_is_sanitized() {
        struct Broken;

        #[async_trait::async_trait]
        impl crate::hasher::PasswordHasher for Broken {
            async fn hash(&self, _: &str) -> Result<String, crate::error::HashError> {
                Err(crate::error::HashError::Worker("thread panicked at hasher.rs:42".into()))
            }

            async fn verify(&self, _: &str, _: &str) -> Result<bool, crate::error::HashError> {
                Ok(false)
            }
        }

        let mut h = harness();
        let deps = h.pipeline.deps().clone();
        let deps = HandlerDeps {
            hasher: Arc::new(Broken),
            ..deps
        };
        h.pipeline = CommandPipeline::new(CommandRegistry::with_defaults(), deps);

        let resp = h
            .send(h.frame(
                "register",
                h.header(),
                json!({"username": "alice", "password": "password1"}),
            ))
            .await;
        assert_eq!(code(&resp), "INTERNAL_ERROR");
        assert_eq!(resp.message.as_deref(), Some("Internal error"));
    }

    #[test]
    fn every_trigger_is_dispatchable() {
        let h = harness();
        for trigger in Trigger::ALL {
            assert!(h.pipeline.registry.get(trigger).is_some());
        }
    }
}
