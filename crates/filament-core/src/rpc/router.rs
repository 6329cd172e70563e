use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use filament_common::error::RpcError;
use filament_parser::RpcSequence;

use super::message::{
    MalformedKind, RpcCommandType, RpcMessage, RpcResult, TIMEOUT_COMMAND_ID,
};
use super::validator::ParameterValidator;

/// A registered command implementation.
#[async_trait]
pub trait RpcCommandHandler: Send + Sync {
    /// Fire-and-forget handlers live in 1000-1999, queries in 2000-2999.
    fn is_fire_and_forget(&self) -> bool;

    /// Budget for a query before the router replies with a timeout error.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn description(&self) -> &str;

    async fn execute(&self, message: &RpcMessage) -> Result<Option<serde_json::Value>, String>;
}

/// Hook receiving sequences that could not be dispatched.
pub type MalformedHook = Box<dyn Fn(&[u8], MalformedKind) + Send + Sync>;

/// Result of routing one sequence: the structured outcome plus any bytes
/// to put on the wire back to the application.
#[derive(Debug)]
pub struct RpcOutcome {
    pub result: RpcResult,
    pub response: Option<Vec<u8>>,
}

impl RpcOutcome {
    fn silent(result: RpcResult) -> Self {
        Self {
            result,
            response: None,
        }
    }
}

/// Thread-safe command registry and dispatcher.
///
/// Handlers are registered for the life of the process; tests get a
/// fresh router (or `clear`) instead of sharing one.
#[derive(Default)]
pub struct RpcRouter {
    handlers: RwLock<HashMap<u16, Arc<dyn RpcCommandHandler>>>,
    validators: RwLock<HashMap<u16, ParameterValidator>>,
    malformed_hook: RwLock<Option<MalformedHook>>,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, enforcing the kind ↔ id-range rule.
    pub fn register(
        &self,
        command_id: u16,
        handler: Arc<dyn RpcCommandHandler>,
    ) -> Result<(), RpcError> {
        let kind = if handler.is_fire_and_forget() {
            RpcCommandType::FireAndForget
        } else {
            RpcCommandType::Query
        };
        if !kind.contains_id(command_id) {
            return Err(RpcError::IdOutOfRange {
                id: command_id,
                kind: kind.name(),
            });
        }
        let mut handlers = self.handlers.write().expect("rpc handler registry poisoned");
        if handlers.contains_key(&command_id) {
            return Err(RpcError::AlreadyRegistered(command_id));
        }
        handlers.insert(command_id, handler);
        Ok(())
    }

    /// Attach a parameter validator to a command id.
    pub fn set_validator(&self, command_id: u16, validator: ParameterValidator) {
        self.validators
            .write()
            .expect("rpc validator registry poisoned")
            .insert(command_id, validator);
    }

    /// Install the hook receiving malformed sequences.
    pub fn set_malformed_hook(&self, hook: MalformedHook) {
        *self
            .malformed_hook
            .write()
            .expect("rpc malformed hook poisoned") = Some(hook);
    }

    /// Drop all registrations; the test-mode reset contract.
    pub fn clear(&self) {
        self.handlers
            .write()
            .expect("rpc handler registry poisoned")
            .clear();
        self.validators
            .write()
            .expect("rpc validator registry poisoned")
            .clear();
        *self
            .malformed_hook
            .write()
            .expect("rpc malformed hook poisoned") = None;
    }

    pub fn registered_count(&self) -> usize {
        self.handlers
            .read()
            .expect("rpc handler registry poisoned")
            .len()
    }

    fn handle_malformed(&self, raw: &[u8], kind: MalformedKind) {
        debug!(?kind, "malformed RPC sequence");
        if let Some(hook) = self
            .malformed_hook
            .read()
            .expect("rpc malformed hook poisoned")
            .as_ref()
        {
            hook(raw, kind);
        }
    }

    /// Route one siphoned sequence to its handler.
    pub async fn route_sequence(
        &self,
        seq: &RpcSequence,
        cancel: CancellationToken,
    ) -> RpcOutcome {
        let message = match RpcMessage::from_sequence(seq) {
            Ok(message) => message,
            Err(kind) => {
                self.handle_malformed(&seq.raw, kind);
                return RpcOutcome::silent(RpcResult::failure(
                    format!("malformed sequence: {kind:?}"),
                    Duration::ZERO,
                ));
            }
        };
        self.route_command(&message, cancel).await
    }

    /// Dispatch a parsed message. The type ↔ range rule is re-enforced
    /// here before any handler is consulted.
    pub async fn route_command(
        &self,
        message: &RpcMessage,
        cancel: CancellationToken,
    ) -> RpcOutcome {
        if !message.is_valid_command_id_range() {
            self.handle_malformed(&message.raw, MalformedKind::IdOutOfRange);
            return RpcOutcome::silent(
                RpcResult::failure("command id outside range for type", Duration::ZERO)
                    .with_command_id(message.command_id),
            );
        }

        match message.kind {
            RpcCommandType::Response | RpcCommandType::Error => {
                // Peer-originated traffic; observed, never dispatched.
                debug!(
                    command_id = message.command_id,
                    kind = message.kind.name(),
                    "peer RPC sequence observed"
                );
                RpcOutcome::silent(
                    RpcResult::success(None, Duration::ZERO).with_command_id(message.command_id),
                )
            }
            RpcCommandType::FireAndForget => self.dispatch_fire_and_forget(message).await,
            RpcCommandType::Query => self.dispatch_query(message, cancel).await,
        }
    }

    fn lookup(&self, command_id: u16) -> Option<Arc<dyn RpcCommandHandler>> {
        self.handlers
            .read()
            .expect("rpc handler registry poisoned")
            .get(&command_id)
            .cloned()
    }

    /// Run the per-command validator, if any.
    fn validate(&self, message: &RpcMessage) -> Result<(), RpcResult> {
        let validators = self.validators.read().expect("rpc validator registry poisoned");
        let Some(validator) = validators.get(&message.command_id) else {
            return Ok(());
        };
        match validator.validate(message) {
            Ok(()) => Ok(()),
            Err(failure) => {
                let mut result = RpcResult::failure(failure.message, Duration::ZERO)
                    .with_command_id(message.command_id);
                if failure.is_security_violation {
                    result = result.with_security_violation();
                }
                Err(result)
            }
        }
    }

    async fn dispatch_fire_and_forget(&self, message: &RpcMessage) -> RpcOutcome {
        let Some(handler) = self.lookup(message.command_id) else {
            self.handle_malformed(&message.raw, MalformedKind::UnregisteredId);
            return RpcOutcome::silent(
                RpcResult::failure("unregistered command id", Duration::ZERO)
                    .with_command_id(message.command_id),
            );
        };
        if let Err(result) = self.validate(message) {
            return RpcOutcome::silent(result);
        }

        let start = Instant::now();
        let run = AssertUnwindSafe(handler.execute(message)).catch_unwind().await;
        let elapsed = start.elapsed();
        // Fire-and-forget never answers on the wire, success or not.
        let result = match run {
            Ok(Ok(data)) => RpcResult::success(data, elapsed),
            Ok(Err(error)) => {
                debug!(command_id = message.command_id, %error, "fire-and-forget handler failed");
                RpcResult::failure(error, elapsed)
            }
            Err(_) => {
                warn!(command_id = message.command_id, "fire-and-forget handler panicked");
                RpcResult::failure("handler panicked", elapsed)
            }
        };
        RpcOutcome::silent(result.with_command_id(message.command_id))
    }

    async fn dispatch_query(&self, message: &RpcMessage, cancel: CancellationToken) -> RpcOutcome {
        let Some(handler) = self.lookup(message.command_id) else {
            self.handle_malformed(&message.raw, MalformedKind::UnregisteredId);
            return RpcOutcome::silent(
                RpcResult::failure("unregistered command id", Duration::ZERO)
                    .with_command_id(message.command_id),
            );
        };
        if let Err(result) = self.validate(message) {
            return RpcOutcome::silent(result);
        }

        let budget = handler.timeout();
        let start = Instant::now();
        let run = tokio::select! {
            _ = cancel.cancelled() => {
                return RpcOutcome::silent(
                    RpcResult::failure("query cancelled", start.elapsed())
                        .with_command_id(message.command_id),
                );
            }
            run = tokio::time::timeout(
                budget,
                AssertUnwindSafe(handler.execute(message)).catch_unwind(),
            ) => run,
        };
        let elapsed = start.elapsed();

        match run {
            Err(_) => {
                warn!(
                    command_id = message.command_id,
                    ?budget,
                    "query timed out, emitting protocol timeout error"
                );
                let wire = format!(
                    "\x1b[>{TIMEOUT_COMMAND_ID};1;{};TIMEOUTE",
                    message.command_id
                );
                RpcOutcome {
                    result: RpcResult::timeout(message.command_id, budget),
                    response: Some(wire.into_bytes()),
                }
            }
            Ok(Err(_)) => {
                warn!(command_id = message.command_id, "query handler panicked");
                RpcOutcome::silent(
                    RpcResult::failure("handler panicked", elapsed)
                        .with_command_id(message.command_id),
                )
            }
            Ok(Ok(Err(error))) => RpcOutcome::silent(
                RpcResult::failure(error, elapsed).with_command_id(message.command_id),
            ),
            Ok(Ok(Ok(data))) => {
                let response = synthesize_response(message.command_id, data.as_ref());
                RpcOutcome {
                    result: RpcResult::success(data, elapsed).with_command_id(message.command_id),
                    response: Some(response),
                }
            }
        }
    }
}

/// `ESC [ > Pn ; 1 ; R` with any numeric payload serialized in between.
fn synthesize_response(command_id: u16, data: Option<&serde_json::Value>) -> Vec<u8> {
    let mut out = format!("\x1b[>{command_id};1;");
    if let Some(value) = data {
        for n in numeric_payload(value) {
            out.push_str(&format!("{n};"));
        }
    }
    out.push('R');
    out.into_bytes()
}

fn numeric_payload(value: &serde_json::Value) -> Vec<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().into_iter().collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_u64())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_parser::Params;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        fire_and_forget: bool,
        calls: Arc<AtomicUsize>,
        delay: Duration,
        budget: Duration,
        reply: Option<serde_json::Value>,
        fail_with: Option<String>,
    }

    impl CountingHandler {
        fn fire(calls: Arc<AtomicUsize>) -> Self {
            Self {
                fire_and_forget: true,
                calls,
                delay: Duration::ZERO,
                budget: Duration::from_secs(5),
                reply: None,
                fail_with: None,
            }
        }

        fn query(calls: Arc<AtomicUsize>) -> Self {
            Self {
                fire_and_forget: false,
                calls,
                delay: Duration::ZERO,
                budget: Duration::from_secs(5),
                reply: Some(serde_json::json!(7)),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl RpcCommandHandler for CountingHandler {
        fn is_fire_and_forget(&self) -> bool {
            self.fire_and_forget
        }

        fn timeout(&self) -> Duration {
            self.budget
        }

        fn description(&self) -> &str {
            "test handler"
        }

        async fn execute(
            &self,
            _message: &RpcMessage,
        ) -> Result<Option<serde_json::Value>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail_with {
                Some(error) => Err(error.clone()),
                None => Ok(self.reply.clone()),
            }
        }
    }

    fn seq(params: &[u16], final_byte: u8) -> RpcSequence {
        RpcSequence {
            params: Params::from_values(params),
            final_byte,
            raw: b"\x1b[>test".to_vec(),
        }
    }

    #[tokio::test]
    async fn fire_and_forget_dispatches_without_wire_bytes() {
        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        router
            .register(1500, Arc::new(CountingHandler::fire(calls.clone())))
            .unwrap();

        let outcome = router
            .route_sequence(&seq(&[1500, 1], b'F'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
        assert!(outcome.response.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same bytes again: same behavior, router state unchanged.
        let outcome = router
            .route_sequence(&seq(&[1500, 1], b'F'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
        assert!(outcome.response.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fire_and_forget_swallows_handler_failure() {
        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handler = CountingHandler::fire(calls.clone());
        handler.fail_with = Some("boom".to_string());
        router.register(1501, Arc::new(handler)).unwrap();

        let outcome = router
            .route_sequence(&seq(&[1501, 1], b'F'), CancellationToken::new())
            .await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error_message.as_deref(), Some("boom"));
        assert!(outcome.response.is_none());

        // The router stays live for subsequent calls.
        router
            .register(1502, Arc::new(CountingHandler::fire(calls.clone())))
            .unwrap();
        let outcome = router
            .route_sequence(&seq(&[1502, 1], b'F'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
    }

    #[tokio::test]
    async fn query_synthesizes_response() {
        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        router
            .register(2500, Arc::new(CountingHandler::query(calls)))
            .unwrap();

        let outcome = router
            .route_sequence(&seq(&[2500, 1], b'Q'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
        assert_eq!(outcome.response, Some(b"\x1b[>2500;1;7;R".to_vec()));
    }

    #[tokio::test]
    async fn query_timeout_emits_canonical_error() {
        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handler = CountingHandler::query(calls.clone());
        handler.delay = Duration::from_millis(100);
        handler.budget = Duration::from_millis(1);
        router.register(2500, Arc::new(handler)).unwrap();

        let outcome = router
            .route_sequence(&seq(&[2500, 1], b'Q'), CancellationToken::new())
            .await;
        assert!(!outcome.result.success);
        assert!(outcome.result.is_timeout);
        assert_eq!(outcome.result.command_id, 2500);
        assert!(outcome.result.data.is_none());
        assert!(outcome
            .result
            .error_message
            .as_deref()
            .unwrap()
            .contains("1ms"));

        let wire = outcome.response.unwrap();
        assert!(wire.starts_with(b"\x1b[>9999;1;2500;TIMEOUT"));
        assert_eq!(*wire.last().unwrap(), b'E');

        // A later valid command still dispatches.
        let ok_calls = Arc::new(AtomicUsize::new(0));
        router
            .register(2501, Arc::new(CountingHandler::query(ok_calls.clone())))
            .unwrap();
        let outcome = router
            .route_sequence(&seq(&[2501, 1], b'Q'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registration_enforces_ranges() {
        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(router
            .register(2500, Arc::new(CountingHandler::fire(calls.clone())))
            .is_err());
        assert!(router
            .register(1500, Arc::new(CountingHandler::query(calls.clone())))
            .is_err());
        assert!(router
            .register(1500, Arc::new(CountingHandler::fire(calls.clone())))
            .is_ok());
        assert!(matches!(
            router.register(1500, Arc::new(CountingHandler::fire(calls))),
            Err(RpcError::AlreadyRegistered(1500))
        ));
    }

    #[tokio::test]
    async fn malformed_sequences_hit_hook_only() {
        let router = RpcRouter::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        router.set_malformed_hook(Box::new(move |_raw, kind| {
            seen_hook.lock().unwrap().push(kind);
        }));

        for (params, final_byte, expected) in [
            (vec![], b'F', MalformedKind::EmptyParams),
            (vec![123u16, 1], b'F', MalformedKind::IdOutOfRange),
            (vec![1500, 1], b'F', MalformedKind::UnregisteredId),
        ] {
            let outcome = router
                .route_sequence(&seq(&params, final_byte), CancellationToken::new())
                .await;
            assert!(!outcome.result.success);
            assert!(outcome.response.is_none());
            assert_eq!(*seen.lock().unwrap().last().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn validator_rejects_before_handler_runs() {
        use crate::rpc::validator::{ParameterValidator, ValidationRule};

        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        router
            .register(2500, Arc::new(CountingHandler::query(calls.clone())))
            .unwrap();
        router.set_validator(
            2500,
            ParameterValidator::new().sensitive_rule(ValidationRule::NumericRange {
                index: 0,
                min: 0,
                max: 10,
            }),
        );

        let outcome = router
            .route_sequence(&seq(&[2500, 1, 99], b'Q'), CancellationToken::new())
            .await;
        assert!(!outcome.result.success);
        assert!(outcome.result.is_security_violation);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_yields_typed_failure() {
        let router = RpcRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handler = CountingHandler::query(calls);
        handler.delay = Duration::from_secs(10);
        router.register(2500, Arc::new(handler)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = router
            .route_sequence(&seq(&[2500, 1], b'Q'), cancel)
            .await;
        assert!(!outcome.result.success);
        assert!(!outcome.result.is_timeout);
    }

    #[tokio::test]
    async fn responses_and_errors_are_observed_not_dispatched() {
        let router = RpcRouter::new();
        let outcome = router
            .route_sequence(&seq(&[1500, 1], b'R'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
        assert!(outcome.response.is_none());

        let outcome = router
            .route_sequence(&seq(&[9000, 1], b'E'), CancellationToken::new())
            .await;
        assert!(outcome.result.success);
        assert!(outcome.response.is_none());
    }
}
