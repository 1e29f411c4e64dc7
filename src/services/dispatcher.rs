//! Promise-Attaching Dispatcher
//!
//! Wraps a dispatch target so that request actions flagged with
//! `attach_promise` hand a cancelable [`AttachedPromise`] back to the caller.
//! The promise is settled later by whichever processor answers the request.

use std::sync::Arc;

use crate::eventing::{Action, AttachedPromise, Phase};

/// Anything actions can be dispatched to
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: Action);
}

impl<D: Dispatch + ?Sized> Dispatch for Arc<D> {
    fn dispatch(&self, action: Action) {
        (**self).dispatch(action)
    }
}

impl<D: Dispatch + ?Sized> Dispatch for &D {
    fn dispatch(&self, action: Action) {
        (**self).dispatch(action)
    }
}

/// Dispatcher that attaches promises to flagged request actions
#[derive(Clone, Debug)]
pub struct PromiseDispatcher<D> {
    inner: D,
}

impl<D: Dispatch> PromiseDispatcher<D> {
    /// Wrap a dispatch target
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    /// The wrapped target
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Dispatch an action, returning a promise if one was attached
    ///
    /// An action that already carries a resolver passes through unchanged,
    /// so accidental double-dispatch never re-wraps it.
    pub fn dispatch(&self, mut action: Action) -> Option<AttachedPromise> {
        let wants_promise = action.meta.attach_promise
            && action.meta.resolver.is_none()
            && action.phase() == Some(Phase::Request);

        if !wants_promise {
            self.inner.dispatch(action);
            return None;
        }

        let (resolver, promise) = AttachedPromise::pair();
        action.meta.resolver = Some(resolver);
        tracing::debug!("Attached promise to {}", action.kind);
        self.inner.dispatch(action);
        Some(promise)
    }
}

impl<D: Dispatch> Dispatch for PromiseDispatcher<D> {
    fn dispatch(&self, action: Action) {
        // Fire-and-forget: the promise, if any, is dropped here.
        let _ = PromiseDispatcher::dispatch(self, action);
    }
}
