//! Action Store
//!
//! Process-wide owner of [`ConsoleState`]. Every action is reduced under a
//! single write lock, published to subscribers, then handed to middleware
//! (request processors) after the lock is released, so middleware can
//! dispatch follow-up actions without deadlocking.
//!
//! ```text
//! dispatch(action)
//!    │
//!    ├─ assign seq (request phase)
//!    ├─ reduce   ── RwLock<ConsoleState>
//!    ├─ publish  ── broadcast::Sender<Action>
//!    └─ middleware ── RequestProcessor::handle ── spawn effect
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::broadcast;

use crate::eventing::{Action, Phase};
use crate::services::dispatcher::{Dispatch, PromiseDispatcher};
use crate::state::ConsoleState;

/// Capacity of the action broadcast channel
const ACTION_CHANNEL_CAPACITY: usize = 1024;

/// Observes dispatched actions after they were reduced
pub trait Middleware: Send + Sync {
    fn handle(&self, action: &Action, store: &Store);
}

struct StoreInner {
    state: RwLock<ConsoleState>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    seq: AtomicU64,
    actions: broadcast::Sender<Action>,
}

/// Shared handle to the action store
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store over an initial state
    pub fn new(state: ConsoleState) -> Self {
        let (actions, _) = broadcast::channel(ACTION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(state),
                middleware: RwLock::new(Vec::new()),
                seq: AtomicU64::new(0),
                actions,
            }),
        }
    }

    /// Add middleware to the end of the chain
    pub fn add_middleware(&self, middleware: impl Middleware + 'static) {
        self.inner.middleware.write().push(Arc::new(middleware));
    }

    /// Read the current state
    pub fn state(&self) -> RwLockReadGuard<'_, ConsoleState> {
        self.inner.state.read()
    }

    /// Run a selector against the current state
    pub fn select<R>(&self, selector: impl FnOnce(&ConsoleState) -> R) -> R {
        selector(&self.inner.state.read())
    }

    /// Mutate state outside the action flow (bulk event delivery)
    pub fn update<R>(&self, f: impl FnOnce(&mut ConsoleState) -> R) -> R {
        f(&mut self.inner.state.write())
    }

    /// Receive every action dispatched from now on
    ///
    /// Published copies never carry a resolver.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.inner.actions.subscribe()
    }

    /// Promise-attaching dispatcher over this store
    pub fn dispatcher(&self) -> PromiseDispatcher<Store> {
        PromiseDispatcher::new(self.clone())
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Dispatch for Store {
    fn dispatch(&self, mut action: Action) {
        {
            // Seq is taken under the write lock so reduce order follows seq order
            let mut state = self.inner.state.write();
            if action.phase() == Some(Phase::Request) && action.meta.seq.is_none() {
                action.meta.seq = Some(self.next_seq());
            }
            tracing::debug!(seq = ?action.meta.seq, "Dispatch {}", action.kind);
            state.reduce(&action);
        }

        if self.inner.actions.receiver_count() > 0 {
            let mut published = action.clone();
            published.meta.resolver = None;
            let _ = self.inner.actions.send(published);
        }

        let chain = self.inner.middleware.read().clone();
        for middleware in chain {
            middleware.handle(&action, self);
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("seq", &self.inner.seq.load(Ordering::SeqCst))
            .field("middleware", &self.inner.middleware.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::OperationDescriptor;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct Seen(Mutex<Vec<(String, bool)>>);

    impl Middleware for Arc<Seen> {
        fn handle(&self, action: &Action, store: &Store) {
            let fetching = store.select(|s| s.status.is_fetching("GET_APP"));
            self.0.lock().push((action.kind.to_string(), fetching));
        }
    }

    #[test]
    fn test_reduces_before_middleware() {
        let store = Store::new(ConsoleState::default());
        let seen = Arc::new(Seen::default());
        store.add_middleware(seen.clone());

        store.dispatch(OperationDescriptor::new("GET_APP").request(json!({})));
        assert_eq!(*seen.0.lock(), vec![("GET_APP_REQUEST".to_string(), true)]);
    }

    #[test]
    fn test_assigns_monotonic_seq_to_requests() {
        let store = Store::new(ConsoleState::default());
        let mut rx = store.subscribe();
        let op = OperationDescriptor::new("GET_APP");

        store.dispatch(op.request(json!({})));
        store.dispatch(op.success(json!({}), None));
        store.dispatch(op.request(json!({})));

        let seqs: Vec<Option<u64>> = (0..3)
            .map(|_| rx.try_recv().expect("published").meta.seq)
            .collect();
        assert_eq!(seqs, vec![Some(1), None, Some(2)]);
    }

    #[test]
    fn test_published_copies_drop_resolver() {
        let store = Store::new(ConsoleState::default());
        let mut rx = store.subscribe();
        let op = OperationDescriptor::new("GET_APP").attach_promise();

        let _promise = store.dispatcher().dispatch(op.request(json!({})));
        let published = rx.try_recv().expect("published");
        assert!(published.meta.resolver.is_none());
        assert!(published.meta.attach_promise);
    }

    #[derive(Default)]
    struct Requests(Mutex<Vec<(u64, Value)>>);

    impl Middleware for Arc<Requests> {
        fn handle(&self, action: &Action, _store: &Store) {
            if let (Some(seq), Some(payload)) = (action.meta.seq, &action.payload) {
                self.0.lock().push((seq, payload.clone()));
            }
        }
    }

    #[test]
    fn test_concurrent_list_requests_activate_highest_seq() {
        use crate::state::CollectionSpec;

        let list = OperationDescriptor::new("GET_DEVICES_LIST");
        let store = Store::new(ConsoleState::with_collections([CollectionSpec::new(
            "devices",
            "/ids/device_id",
            list.clone(),
        )]));
        let requests = Arc::new(Requests::default());
        store.add_middleware(requests.clone());

        let threads: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                let list = list.clone();
                std::thread::spawn(move || {
                    for page in 0..50 {
                        store.dispatch(list.request(json!({ "worker": worker, "page": page })));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("worker");
        }

        let requests = requests.0.lock();
        assert_eq!(requests.len(), 400);
        let (_, newest) = requests.iter().max_by_key(|(seq, _)| *seq).expect("requests");
        let devices = store.state();
        let devices = devices.entities.collection("devices").expect("registered");
        assert!(devices.is_active_filter(newest));
    }
}
