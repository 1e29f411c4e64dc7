//! Request Processor
//!
//! Store middleware bound to one operation. A request action spawns the
//! operation's effect; its outcome is dispatched as the success or failure
//! action and then settles the attached promise, exactly once per request.
//!
//! ```text
//! GET_X_REQUEST ──► spawn effect(payload)
//!                        │
//!            ┌───────────┴───────────┐
//!          Ok(result)            Err(error) / panic
//!            │                       │
//!   dispatch GET_X_SUCCESS   dispatch GET_X_FAILURE
//!   resolver.resolve(result) resolver.reject(error)
//! ```
//!
//! Requests run concurrently. An abort action bumps the operation's abort
//! generation; effects observe it through [`AbortSignal`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::RequestError;
use crate::eventing::{Action, ActionType, OperationDescriptor, Phase, Resolver};
use crate::services::dispatcher::Dispatch;
use crate::services::runtime;
use crate::services::store::{Middleware, Store};

/// Outcome of an effect
pub type EffectResult = std::result::Result<Value, RequestError>;

/// Asynchronous side effect of an operation (usually an HTTP call)
pub trait Effect: Send + Sync + 'static {
    fn call(&self, ctx: EffectContext) -> BoxFuture<'static, EffectResult>;
}

impl<F, Fut> Effect for F
where
    F: Fn(EffectContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EffectResult> + Send + 'static,
{
    fn call(&self, ctx: EffectContext) -> BoxFuture<'static, EffectResult> {
        Box::pin(self(ctx))
    }
}

/// Input handed to an effect
#[derive(Debug, Clone)]
pub struct EffectContext {
    /// Request payload
    pub payload: Value,
    /// Store sequence number of the request
    pub seq: Option<u64>,
    /// Fires when an abort action for this operation is dispatched
    pub abort: AbortSignal,
}

/// Abort notification for one in-flight request
///
/// Only abort actions dispatched after the request count.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<u64>,
    issued: u64,
}

impl AbortSignal {
    fn new(rx: watch::Receiver<u64>) -> Self {
        let issued = *rx.borrow();
        Self { rx, issued }
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(0);
        Self::new(rx)
    }

    /// Whether the operation was aborted
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow() != self.issued
    }

    /// Wait until the operation is aborted
    ///
    /// Pending forever if the processor is gone.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() != self.issued {
                return;
            }
            if rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }

    /// Run `future` unless the operation is aborted first
    pub async fn guard<F>(&self, future: F) -> EffectResult
    where
        F: Future<Output = EffectResult>,
    {
        tokio::select! {
            biased;
            _ = self.aborted() => Err(RequestError::aborted()),
            result = future => result,
        }
    }
}

/// Middleware running one operation's effect
pub struct RequestProcessor {
    descriptor: OperationDescriptor,
    effect: Arc<dyn Effect>,
    abort: watch::Sender<u64>,
}

impl RequestProcessor {
    /// Processor for `descriptor`
    pub fn new(descriptor: OperationDescriptor, effect: impl Effect) -> Self {
        let (abort, _) = watch::channel(0);
        Self {
            descriptor,
            effect: Arc::new(effect),
            abort,
        }
    }

    /// Processor keyed on a request tag, with sibling tags inferred by suffix
    pub fn for_type(request: impl Into<ActionType>, effect: impl Effect) -> Option<Self> {
        let request = request.into();
        if request.phase() != Some(Phase::Request) {
            return None;
        }
        let descriptor = OperationDescriptor::from_type(&request)?;
        Some(Self::new(descriptor, effect))
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    fn start(&self, action: &Action, store: &Store) {
        let payload = action.payload_or_null();
        let seq = action.meta.seq;
        let resolver = action.meta.resolver.clone();
        let ctx = EffectContext {
            payload: payload.clone(),
            seq,
            abort: AbortSignal::new(self.abort.subscribe()),
        };

        let effect = self.effect.clone();
        let descriptor = self.descriptor.clone();
        let store = store.clone();
        let name = format!("{}#{}", descriptor.base(), seq.unwrap_or_default());

        runtime::spawn_named(name, async move {
            let outcome = AssertUnwindSafe(effect.call(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(RequestError::new(panic_message(panic.as_ref()))));
            settle(&descriptor, &store, outcome, &payload, seq, resolver);
        });
    }
}

/// Dispatch the terminal action, then settle the promise
fn settle(
    descriptor: &OperationDescriptor,
    store: &Store,
    outcome: EffectResult,
    origin: &Value,
    seq: Option<u64>,
    resolver: Option<Resolver>,
) {
    match outcome {
        Ok(result) => {
            tracing::debug!("{} succeeded", descriptor.base());
            let mut success = descriptor.success(result.clone(), Some(origin));
            success.meta.seq = seq;
            store.dispatch(success);
            if let Some(resolver) = resolver {
                resolver.resolve(result);
            }
        }
        Err(error) => {
            tracing::warn!("{} failed: {}", descriptor.base(), error);
            let mut failure = descriptor.failure(error.clone(), Some(origin));
            failure.meta.seq = seq;
            store.dispatch(failure);
            if let Some(resolver) = resolver {
                resolver.reject(error);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Effect panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Effect panicked: {message}")
    } else {
        "Effect panicked".to_string()
    }
}

impl Middleware for RequestProcessor {
    fn handle(&self, action: &Action, store: &Store) {
        if action.kind == *self.descriptor.abort_type() {
            tracing::debug!("Aborting in-flight {}", self.descriptor.base());
            self.abort.send_modify(|generation| *generation += 1);
        } else if action.kind == *self.descriptor.request_type() {
            self.start(action, store);
        }
    }
}

impl std::fmt::Debug for RequestProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("operation", &self.descriptor.base())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::state::ConsoleState;
    use serde_json::json;
    use tokio::sync::broadcast;

    fn effect<F, Fut>(f: F) -> F
    where
        F: Fn(EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        f
    }

    fn store_with(processor: RequestProcessor) -> Store {
        let store = Store::new(ConsoleState::default());
        store.add_middleware(processor);
        store
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<Action>) -> Action {
        loop {
            let action = rx.recv().await.expect("store alive");
            if action.phase().is_some_and(Phase::is_terminal) {
                return action;
            }
        }
    }

    #[tokio::test]
    async fn test_success_resolves_promise() {
        let op = OperationDescriptor::new("GET_DEVICE").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|ctx: EffectContext| async move {
            Ok(json!({ "echo": ctx.payload }))
        })));
        let mut rx = store.subscribe();

        let promise = store
            .dispatcher()
            .dispatch(op.request(json!({ "id": "dev-1" })))
            .expect("promise attached");
        let value = promise.await.expect("resolved");
        assert_eq!(value, json!({ "echo": { "id": "dev-1" } }));

        let _request = rx.recv().await.expect("request");
        let success = next_terminal(&mut rx).await;
        assert_eq!(success.kind, "GET_DEVICE_SUCCESS");
        assert_eq!(success.payload, Some(value));
        assert_eq!(success.meta.origin, Some(json!({ "id": "dev-1" })));
        assert_eq!(success.meta.seq, Some(1));
        assert!(!store.select(|s| s.status.is_fetching("GET_DEVICE")));
    }

    #[tokio::test]
    async fn test_failure_rejects_promise() {
        let op = OperationDescriptor::new("DELETE_DEVICE").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|_ctx: EffectContext| async {
            Err(RequestError::with_status(404, "device not found"))
        })));

        let promise = store
            .dispatcher()
            .dispatch(op.request(json!("dev-1")))
            .expect("promise attached");
        let err = promise.await.expect_err("rejected");
        assert_eq!(err.request_error().and_then(|e| e.status), Some(404));

        let stored = store.select(|s| s.status.error("DELETE_DEVICE").cloned());
        assert_eq!(stored.map(|e| e.message), Some("device not found".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_effect_rejects() {
        let op = OperationDescriptor::new("GET_BROKEN").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|_ctx: EffectContext| async {
            if true {
                panic!("boom");
            }
            Ok(Value::Null)
        })));

        let promise = store.dispatcher().dispatch(op.request(Value::Null)).expect("promise");
        let err = promise.await.expect_err("rejected");
        let message = err.request_error().map(|e| e.message.clone()).unwrap_or_default();
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_abort_action_reaches_effect() {
        let op = OperationDescriptor::new("START_STREAM").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|ctx: EffectContext| async move {
            ctx.abort.guard(futures::future::pending()).await
        })));

        let promise = store.dispatcher().dispatch(op.request(Value::Null)).expect("promise");
        tokio::task::yield_now().await;
        store.dispatch(op.abort());

        let err = promise.await.expect_err("rejected");
        assert!(err.request_error().is_some_and(RequestError::is_aborted));
    }

    #[tokio::test]
    async fn test_abort_before_request_is_ignored() {
        let op = OperationDescriptor::new("GET_LATE").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|ctx: EffectContext| async move {
            Ok(json!(ctx.abort.is_aborted()))
        })));

        store.dispatch(op.abort());
        let promise = store.dispatcher().dispatch(op.request(Value::Null)).expect("promise");
        assert_eq!(promise.await.expect("resolved"), json!(false));
    }

    #[tokio::test]
    async fn test_canceled_promise_still_completes_effect() {
        let op = OperationDescriptor::new("UPDATE_APP").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|_ctx: EffectContext| async {
            tokio::task::yield_now().await;
            Ok(json!("done"))
        })));
        let mut rx = store.subscribe();

        let promise = store.dispatcher().dispatch(op.request(Value::Null)).expect("promise");
        promise.cancel();
        assert!(matches!(promise.await, Err(Error::Canceled)));

        let terminal = next_terminal(&mut rx).await;
        assert_eq!(terminal.kind, "UPDATE_APP_SUCCESS");
    }

    #[tokio::test]
    async fn test_every_request_settles_exactly_once() {
        let op = OperationDescriptor::new("GET_ITEM").attach_promise();
        let store = store_with(RequestProcessor::new(op.clone(), effect(|ctx: EffectContext| async move {
            let n = ctx.payload.as_u64().unwrap_or_default();
            for _ in 0..(n % 3) {
                tokio::task::yield_now().await;
            }
            if n % 2 == 0 {
                Ok(json!(n))
            } else {
                Err(RequestError::new(format!("odd {n}")))
            }
        })));
        let mut rx = store.subscribe();

        let promises: Vec<_> = (0..20u64)
            .map(|n| {
                store
                    .dispatcher()
                    .dispatch(op.request(json!(n)))
                    .expect("promise")
            })
            .collect();

        for (n, promise) in promises.into_iter().enumerate() {
            match promise.await {
                Ok(value) => assert_eq!(value, json!(n)),
                Err(err) => {
                    assert_eq!(n % 2, 1);
                    assert_eq!(err.request_error().map(|e| e.message.clone()), Some(format!("odd {n}")));
                }
            }
        }

        let (mut successes, mut failures) = (0, 0);
        for _ in 0..20 {
            match next_terminal(&mut rx).await.phase() {
                Some(Phase::Success) => successes += 1,
                Some(Phase::Failure) => failures += 1,
                other => panic!("unexpected phase {other:?}"),
            }
        }
        assert_eq!((successes, failures), (10, 10));
    }

    #[test]
    fn test_for_type_infers_siblings() {
        let ok = || effect(|_ctx: EffectContext| async { Ok(Value::Null) });
        let processor = RequestProcessor::for_type("GET_GATEWAY_REQUEST", ok()).expect("request tag");
        assert_eq!(processor.descriptor().success_type(), "GET_GATEWAY_SUCCESS");
        assert!(RequestProcessor::for_type("GET_GATEWAY", ok()).is_none());
        assert!(RequestProcessor::for_type("GET_GATEWAY_SUCCESS", ok()).is_none());
    }
}
