//! EventsState - Live Event Streams

use std::sync::Arc;

use ahash::AHashMap;
use serde_json::Value;

use crate::constants::{
    EVENTS_CLEAR, EVENTS_PAUSE, EVENTS_RESUME, EVENTS_STREAM_OPERATION,
    STREAM_EVENTS_CAPACITY,
};
use crate::domain::event::RawEvent;
use crate::error::RequestError;
use crate::eventing::{Action, Phase};
use crate::helpers::BoundedDeque;

/// Connection status of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Idle,
    Connecting,
    Live,
    Closed,
    Failed,
}

/// State of one event stream (one subscription)
#[derive(Debug, Clone)]
pub struct StreamState {
    /// Visible history, oldest first
    pub events: BoundedDeque<Arc<RawEvent>>,
    /// Events received while paused, bounded like the history
    pub paused_events: BoundedDeque<Arc<RawEvent>>,
    /// Whether older events were evicted from the history
    pub truncated: bool,
    pub paused: bool,
    pub status: StreamStatus,
    /// Last transport error
    pub error: Option<RequestError>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new(STREAM_EVENTS_CAPACITY)
    }
}

impl StreamState {
    /// Create a stream state keeping at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            events: BoundedDeque::new(capacity),
            paused_events: BoundedDeque::new(capacity),
            truncated: false,
            paused: false,
            status: StreamStatus::Idle,
            error: None,
        }
    }

    /// Most recent visible event
    pub fn latest(&self) -> Option<&Arc<RawEvent>> {
        self.events.last()
    }

    fn append(&mut self, events: impl IntoIterator<Item = Arc<RawEvent>>) {
        for event in events {
            if self.events.push(event).is_some() {
                self.truncated = true;
            }
        }
    }

    fn receive(&mut self, events: Vec<Arc<RawEvent>>) {
        if self.paused {
            for event in events {
                if self.paused_events.push(event).is_some() {
                    self.truncated = true;
                }
            }
        } else {
            self.append(events);
        }
    }

    fn resume(&mut self) {
        self.paused = false;
        let pending: Vec<_> = self.paused_events.drain().collect();
        self.append(pending);
    }

    fn clear(&mut self) {
        self.events.clear();
        self.paused_events.clear();
        self.truncated = false;
    }
}

/// All live event streams, keyed by stream id
#[derive(Debug, Clone, Default)]
pub struct EventsState {
    streams: AHashMap<Arc<str>, StreamState>,
    capacity: Option<usize>,
}

impl EventsState {
    /// Create a state whose streams keep at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            streams: AHashMap::new(),
            capacity: Some(capacity),
        }
    }

    /// A stream's state
    pub fn stream(&self, id: &str) -> Option<&StreamState> {
        self.streams.get(id)
    }

    /// Deliver a batch received from the event buffer
    pub fn receive(&mut self, stream: &str, events: Vec<Arc<RawEvent>>) {
        self.stream_mut(stream).receive(events);
    }

    fn stream_mut(&mut self, id: &str) -> &mut StreamState {
        let capacity = self.capacity.unwrap_or(STREAM_EVENTS_CAPACITY);
        self.streams
            .entry(id.into())
            .or_insert_with(|| StreamState::new(capacity))
    }

    /// Apply stream lifecycle and control actions
    ///
    /// Event batches are delivered through [`EventsState::receive`]
    /// by the stream controller, since their events are shared `Arc`s rather
    /// than JSON payloads.
    pub fn reduce(&mut self, action: &Action) {
        let stream_id = [action.payload.as_ref(), action.meta.origin.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|p| p.get("stream").and_then(Value::as_str).map(str::to_string));
        let Some(stream_id) = stream_id else {
            return;
        };

        if action.base() == Some(EVENTS_STREAM_OPERATION) {
            let stream = self.stream_mut(&stream_id);
            match action.phase() {
                Some(Phase::Request) => {
                    stream.status = StreamStatus::Connecting;
                    stream.error = None;
                }
                Some(Phase::Success) => stream.status = StreamStatus::Live,
                Some(Phase::Failure) => {
                    stream.status = StreamStatus::Failed;
                    stream.error = action.error.clone();
                }
                Some(Phase::Abort) => stream.status = StreamStatus::Closed,
                None => {}
            }
            return;
        }

        match action.kind.as_str() {
            EVENTS_PAUSE => self.stream_mut(&stream_id).paused = true,
            EVENTS_RESUME => self.stream_mut(&stream_id).resume(),
            EVENTS_CLEAR => self.stream_mut(&stream_id).clear(),
            _ => {}
        }
    }
}
