//! Connection Reactor
//!
//! Watches the live event flow for heartbeat events and dispatches a refresh
//! action for each distinct one. Identity is by allocation: delivering the
//! same `Arc<RawEvent>` twice (for example when a view re-reads the latest
//! event) never triggers a second refresh.

use std::sync::Arc;

use crate::domain::event::RawEvent;
use crate::eventing::{Action, FilterRuleSet};
use crate::services::dispatcher::Dispatch;

type RefreshFn = Arc<dyn Fn(&RawEvent) -> Action + Send + Sync>;

/// Heartbeat watcher for one subscription
pub struct ConnectionReactor {
    heartbeat: FilterRuleSet,
    refresh: RefreshFn,
    dispatcher: Arc<dyn Dispatch>,
    last_seen: Option<Arc<RawEvent>>,
    refreshes: u64,
}

impl ConnectionReactor {
    /// Create a reactor dispatching `refresh(event)` for each heartbeat
    pub fn new(
        heartbeat: FilterRuleSet,
        dispatcher: Arc<dyn Dispatch>,
        refresh: impl Fn(&RawEvent) -> Action + Send + Sync + 'static,
    ) -> Self {
        Self {
            heartbeat,
            refresh: Arc::new(refresh),
            dispatcher,
            last_seen: None,
            refreshes: 0,
        }
    }

    /// Inspect one event; returns whether a refresh was dispatched
    pub fn observe(&mut self, event: &Arc<RawEvent>) -> bool {
        if self.last_seen.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, event)) {
            return false;
        }
        if !self.heartbeat.matches(&event.name) {
            return false;
        }

        self.last_seen = Some(event.clone());
        self.refreshes += 1;
        tracing::debug!("Heartbeat {} triggers refresh", event.name);
        self.dispatcher.dispatch((self.refresh)(event));
        true
    }

    /// Inspect a batch in order; returns the number of refreshes dispatched
    pub fn observe_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Arc<RawEvent>>) -> usize {
        events.into_iter().filter(|event| self.observe(event)).count()
    }

    /// Last heartbeat event that triggered a refresh
    pub fn last_seen(&self) -> Option<&Arc<RawEvent>> {
        self.last_seen.as_ref()
    }

    /// Refreshes dispatched so far
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    pub fn heartbeat(&self) -> &FilterRuleSet {
        &self.heartbeat
    }
}

impl std::fmt::Debug for ConnectionReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReactor")
            .field("heartbeat", &self.heartbeat.to_wire())
            .field("last_seen", &self.last_seen.as_ref().map(|e| e.name.as_str()))
            .field("refreshes", &self.refreshes)
            .finish()
    }
}
