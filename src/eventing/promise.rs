//! Attached Promises
//!
//! A promise whose settlement is driven by a later lifecycle action rather
//! than by the call that created it. The [`Resolver`] half rides inside the
//! request action's metadata; the [`AttachedPromise`] half is returned to the
//! caller of the dispatcher.
//!
//! Cancelling a promise only suppresses the caller's continuation. The work
//! behind it keeps running and still settles the resolver, which then lands
//! nowhere.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{AbortHandle, Abortable, Aborted};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, RequestError, Result};

type Settlement = std::result::Result<Value, RequestError>;

/// Settling half of an attached promise
///
/// Clones share one slot, so across all clones exactly the first
/// `resolve`/`reject` call wins.
#[derive(Clone)]
pub struct Resolver {
    slot: Arc<Mutex<Option<oneshot::Sender<Settlement>>>>,
}

impl Resolver {
    /// Resolve the promise. Returns false if it was already settled.
    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the promise. Returns false if it was already settled.
    pub fn reject(&self, error: RequestError) -> bool {
        self.settle(Err(error))
    }

    /// Whether resolve or reject has already been called
    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn settle(&self, settlement: Settlement) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        // The caller may have dropped or canceled its promise.
        let _ = tx.send(settlement);
        true
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Cancels the caller's continuation of an [`AttachedPromise`]
#[derive(Clone, Debug)]
pub struct CancelHandle(AbortHandle);

impl CancelHandle {
    /// Cancel the promise; awaiting it yields [`Error::Canceled`]
    pub fn cancel(&self) {
        self.0.abort();
    }

    /// Whether cancel was called
    pub fn is_canceled(&self) -> bool {
        self.0.is_aborted()
    }
}

/// Caller half of an attached promise
///
/// Resolves to the success payload, [`Error::Request`] on rejection,
/// [`Error::Canceled`] after cancellation, or [`Error::Unsettled`] if every
/// resolver was dropped without settling (for example when no processor
/// handled the request).
#[derive(Debug)]
pub struct AttachedPromise {
    inner: Abortable<oneshot::Receiver<Settlement>>,
    handle: AbortHandle,
}

impl AttachedPromise {
    /// Create a linked resolver/promise pair
    pub fn pair() -> (Resolver, AttachedPromise) {
        let (tx, rx) = oneshot::channel();
        let (handle, registration) = AbortHandle::new_pair();
        let resolver = Resolver {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        let promise = AttachedPromise {
            inner: Abortable::new(rx, registration),
            handle,
        };
        (resolver, promise)
    }

    /// Handle that cancels this promise from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.handle.clone())
    }

    /// Cancel this promise
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Future for AttachedPromise {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome,
        };

        Poll::Ready(match outcome {
            Err(Aborted) => Err(Error::Canceled),
            Ok(Err(_recv)) => Err(Error::Unsettled),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(Error::Request { source }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve() {
        let (resolver, promise) = AttachedPromise::pair();
        assert!(resolver.resolve(json!(42)));
        assert_eq!(promise.await.expect("resolved"), json!(42));
    }

    #[tokio::test]
    async fn test_reject() {
        let (resolver, promise) = AttachedPromise::pair();
        assert!(resolver.reject(RequestError::with_status(403, "forbidden")));
        let err = promise.await.expect_err("rejected");
        assert_eq!(err.request_error().and_then(|e| e.status), Some(403));
    }

    #[tokio::test]
    async fn test_settles_once_across_clones() {
        let (resolver, promise) = AttachedPromise::pair();
        let other = resolver.clone();
        assert!(resolver.resolve(json!("first")));
        assert!(!other.reject(RequestError::new("late")));
        assert!(!other.resolve(json!("second")));
        assert!(other.is_settled());
        assert_eq!(promise.await.expect("resolved"), json!("first"));
    }

    #[tokio::test]
    async fn test_cancel_suppresses_continuation() {
        let (resolver, promise) = AttachedPromise::pair();
        let handle = promise.cancel_handle();
        handle.cancel();
        assert!(handle.is_canceled());
        // Settling after cancel still succeeds from the resolver's side.
        assert!(resolver.resolve(json!(1)));
        assert!(matches!(promise.await, Err(Error::Canceled)));
    }

    #[tokio::test]
    async fn test_dropped_resolver_is_unsettled() {
        let (resolver, promise) = AttachedPromise::pair();
        drop(resolver);
        assert!(matches!(promise.await, Err(Error::Unsettled)));
    }
}
