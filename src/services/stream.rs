//! Event Stream Controller
//!
//! Wires one live subscription end to end:
//!
//! ```text
//! EventSource ──► FilterRuleSet ──► EventBuffer ──┬─► EventsState::receive
//!                                                 ├─► EVENTS_RECEIVE
//!                                                 └─► ConnectionReactor ──► refresh
//! ```
//!
//! The subscription follows the `START_EVENTS_STREAM` lifecycle: request when
//! opening, success once connected, failure on transport errors, abort when
//! stopped. Buffered events are always flushed before the terminal action.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::constants::{EVENTS_CLEAR, EVENTS_PAUSE, EVENTS_RECEIVE, EVENTS_RESUME, EVENTS_STREAM_OPERATION};
use crate::domain::event::RawEvent;
use crate::error::{Error, RequestError};
use crate::eventing::{Action, BufferConfig, ConnectionReactor, EventBuffer, FilterRuleSet, OperationDescriptor};
use crate::services::dispatcher::Dispatch;
use crate::services::event_source::{EventSource, StreamSubscription};
use crate::services::runtime;
use crate::services::store::Store;

/// gRPC "unavailable"
const STREAM_CLOSED_CODE: i64 = 14;

type RefreshFn = Arc<dyn Fn(&RawEvent) -> Action + Send + Sync>;

/// Parameters of one subscription
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Key of the stream in [`crate::state::EventsState`]
    pub stream_id: String,
    pub identifiers: Vec<Value>,
    /// Sent to the server and re-checked locally; empty accepts everything
    pub filters: FilterRuleSet,
    pub heartbeat: FilterRuleSet,
    pub buffer: BufferConfig,
    pub tail: Option<u32>,
    pub after: Option<DateTime<Utc>>,
}

impl StreamOptions {
    pub fn new(stream_id: impl Into<String>, identifiers: Vec<Value>) -> Self {
        Self {
            stream_id: stream_id.into(),
            identifiers,
            filters: FilterRuleSet::default(),
            heartbeat: FilterRuleSet::default(),
            buffer: BufferConfig::default(),
            tail: None,
            after: None,
        }
    }

    pub fn filters(mut self, filters: FilterRuleSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn heartbeat(mut self, heartbeat: FilterRuleSet) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn tail(mut self, tail: Option<u32>) -> Self {
        self.tail = tail;
        self
    }
}

/// Opens subscriptions against one event source
#[derive(Clone)]
pub struct EventStreamController {
    store: Store,
    source: Arc<dyn EventSource>,
    descriptor: OperationDescriptor,
}

impl EventStreamController {
    pub fn new(store: Store, source: Arc<dyn EventSource>) -> Self {
        Self {
            store,
            source,
            descriptor: OperationDescriptor::new(EVENTS_STREAM_OPERATION),
        }
    }

    /// Start a subscription; `refresh` builds the action dispatched per heartbeat
    pub fn open(
        &self,
        options: StreamOptions,
        refresh: impl Fn(&RawEvent) -> Action + Send + Sync + 'static,
    ) -> StreamHandle {
        let subscription_id = Uuid::new_v4();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = runtime::spawn_task(run_stream(
            self.clone(),
            options.clone(),
            Arc::new(refresh),
            subscription_id,
            stop_rx,
        ));

        StreamHandle {
            stream_id: options.stream_id,
            subscription_id,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

impl std::fmt::Debug for EventStreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamController")
            .field("store", &self.store)
            .finish()
    }
}

/// Running subscription
///
/// Dropping the handle stops the subscription without waiting for it.
#[derive(Debug)]
pub struct StreamHandle {
    stream_id: String,
    subscription_id: Uuid,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn subscription_id(&self) -> Uuid {
        self.subscription_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the subscription and wait for the final flush
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join_task().await;
    }

    /// Wait until the stream ends on its own
    pub async fn join(mut self) {
        self.join_task().await;
    }

    async fn join_task(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::error!("Event stream task failed: {}", e);
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

enum StreamEnd {
    Stopped,
    Failed(RequestError),
    Closed,
}

async fn run_stream(
    controller: EventStreamController,
    options: StreamOptions,
    refresh: RefreshFn,
    subscription_id: Uuid,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let EventStreamController {
        store,
        source,
        descriptor,
    } = controller;
    let stream_id: Arc<str> = options.stream_id.as_str().into();
    let names = options.filters.to_wire();
    let origin = json!({
        "stream": &*stream_id,
        "subscription": subscription_id.to_string(),
        "identifiers": &options.identifiers,
        "names": &names,
    });
    store.dispatch(descriptor.request(origin.clone()));

    let subscription = StreamSubscription {
        identifiers: options.identifiers.clone(),
        tail: options.tail,
        after: options.after,
        names,
    };
    let subscribed = tokio::select! {
        biased;
        _ = &mut stop_rx => None,
        result = source.subscribe(subscription) => Some(result),
    };
    let mut events = match subscribed {
        None => {
            store.dispatch(stream_abort(&descriptor, &stream_id));
            return;
        }
        Some(Err(e)) => {
            tracing::warn!("Event stream {} failed to open: {}", stream_id, e);
            store.dispatch(descriptor.failure(e.into_request_error(), Some(&origin)));
            return;
        }
        Some(Ok(events)) => events,
    };

    tracing::info!(subscription = %subscription_id, "Event stream {} is live", stream_id);
    store.dispatch(descriptor.success(json!({ "stream": &*stream_id }), Some(&origin)));

    let reactor = ConnectionReactor::new(options.heartbeat, Arc::new(store.clone()), move |event: &RawEvent| {
        refresh(event)
    });
    let buffer = EventBuffer::with_config(deliver_batches(store.clone(), stream_id.clone(), reactor), options.buffer);

    let end = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break StreamEnd::Stopped,
            item = events.next() => match item {
                Some(Ok(event)) => {
                    if !options.filters.is_empty() && !options.filters.matches(&event.name) {
                        tracing::trace!("Dropped unmatched event {}", event.name);
                        continue;
                    }
                    if buffer.push(Arc::new(event)).is_err() {
                        break StreamEnd::Failed(RequestError::new("event buffer stopped"));
                    }
                }
                Some(Err(Error::Json { source })) => {
                    tracing::warn!("Skipping undecodable event on {}: {}", stream_id, source);
                }
                Some(Err(e)) => break StreamEnd::Failed(e.into_request_error()),
                None => break StreamEnd::Closed,
            },
        }
    };

    buffer.shutdown().await;

    match end {
        StreamEnd::Stopped => {
            tracing::info!("Event stream {} stopped", stream_id);
            store.dispatch(stream_abort(&descriptor, &stream_id));
        }
        StreamEnd::Failed(error) => {
            tracing::warn!("Event stream {} failed: {}", stream_id, error);
            store.dispatch(descriptor.failure(error, Some(&origin)));
        }
        StreamEnd::Closed => {
            tracing::warn!("Event stream {} closed by server", stream_id);
            let error = RequestError::new("event stream closed").code(STREAM_CLOSED_CODE);
            store.dispatch(descriptor.failure(error, Some(&origin)));
        }
    }
}

/// Flush handler: state first, then subscribers, then the reactor
fn deliver_batches(
    store: Store,
    stream_id: Arc<str>,
    mut reactor: ConnectionReactor,
) -> impl FnMut(Vec<Arc<RawEvent>>) + Send + 'static {
    move |batch: Vec<Arc<RawEvent>>| {
        tracing::debug!("Delivering {} events to stream {}", batch.len(), stream_id);
        store.update(|state| state.events.receive(&stream_id, batch.clone()));

        let events: Vec<&RawEvent> = batch.iter().map(Arc::as_ref).collect();
        store.dispatch(Action::new(EVENTS_RECEIVE).with_payload(json!({
            "stream": &*stream_id,
            "events": events,
        })));

        reactor.observe_batch(&batch);
    }
}

fn stream_abort(descriptor: &OperationDescriptor, stream_id: &str) -> Action {
    descriptor.abort().with_payload(json!({ "stream": stream_id }))
}

/// Hold incoming events of `stream_id` out of its visible history
pub fn pause(stream_id: &str) -> Action {
    Action::new(EVENTS_PAUSE).with_payload(json!({ "stream": stream_id }))
}

/// Append the events held while paused and continue live
pub fn resume(stream_id: &str) -> Action {
    Action::new(EVENTS_RESUME).with_payload(json!({ "stream": stream_id }))
}

/// Drop the visible history of `stream_id`
pub fn clear(stream_id: &str) -> Action {
    Action::new(EVENTS_CLEAR).with_payload(json!({ "stream": stream_id }))
}
