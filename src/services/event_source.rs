//! Event Sources
//!
//! An [`EventSource`] opens a filtered live event stream for a set of entity
//! identifiers. [`HttpEventSource`] posts the subscription to the backend's
//! events endpoint and decodes the newline-delimited JSON response;
//! [`ChannelEventSource`] feeds streams from in-process channels (replay,
//! tests).
//!
//! ```text
//! POST /events { identifiers, tail?, after?, names? }
//!        │
//!        ▼  chunked body
//! {"result": {"name": "gs.up.receive", ...}}\n
//! {"result": {"name": "gs.status.receive", ...}}\n
//!        │
//!        ▼  NdjsonDecoder
//! Stream<Item = Result<RawEvent>>
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use tokio::sync::mpsc;

use crate::domain::event::RawEvent;
use crate::error::{Error, HttpSnafu, RequestError, Result};
use crate::services::http::{ApiClient, error_from_body};

/// Upper bound on one stream connection; replaces the client's request timeout
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Decoded event stream
pub type EventStream = BoxStream<'static, Result<RawEvent>>;

/// Stream subscription request body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSubscription {
    /// Entity identifiers to receive events for
    pub identifiers: Vec<Value>,
    /// Number of historical events to replay first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<u32>,
    /// Only events after this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
    /// Name filters in wire form (`/^…$/`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
}

/// Opens live event streams
pub trait EventSource: Send + Sync {
    fn subscribe(&self, subscription: StreamSubscription) -> BoxFuture<'static, Result<EventStream>>;
}

/// Events endpoint of the backend API
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    api: ApiClient,
    path: String,
}

impl HttpEventSource {
    pub fn new(api: ApiClient) -> Self {
        Self::with_path(api, "/events")
    }

    pub fn with_path(api: ApiClient, path: impl Into<String>) -> Self {
        Self {
            api,
            path: path.into(),
        }
    }
}

impl EventSource for HttpEventSource {
    fn subscribe(&self, subscription: StreamSubscription) -> BoxFuture<'static, Result<EventStream>> {
        let api = self.api.clone();
        let url = api.url(&self.path);
        Box::pin(async move {
            tracing::info!(url = %url, identifiers = subscription.identifiers.len(), "Opening event stream");
            let request = api
                .client()
                .post(&url)
                .timeout(STREAM_REQUEST_TIMEOUT)
                .json(&subscription);
            let response = api.authorize(request).send().await.context(HttpSnafu)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.bytes().await.context(HttpSnafu)?;
                return Err(Error::Request {
                    source: error_from_body(status, &body),
                });
            }
            Ok(decode_ndjson(response.bytes_stream()).boxed())
        })
    }
}

/// One line of the stream body
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Result { result: RawEvent },
    Error { error: RequestError },
    Bare(RawEvent),
}

/// Incremental newline-delimited JSON decoder
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    partial: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed a chunk; returns every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<RawEvent>> {
        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| parse_line(&String::from_utf8_lossy(line)))
            .collect()
    }

    /// Decode a trailing line without newline, if any
    pub fn finish(&mut self) -> Option<Result<RawEvent>> {
        let partial = std::mem::take(&mut self.partial);
        parse_line(&String::from_utf8_lossy(&partial))
    }
}

/// Decode one stream line; blank lines yield nothing
pub fn parse_line(line: &str) -> Option<Result<RawEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<Envelope>(line) {
        Ok(Envelope::Result { result }) | Ok(Envelope::Bare(result)) => Ok(result),
        Ok(Envelope::Error { error }) => Err(Error::Request { source: error }),
        Err(source) => Err(Error::Json { source }),
    })
}

struct Decoding<S> {
    chunks: std::pin::Pin<Box<S>>,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<RawEvent>>,
    done: bool,
}

/// Decode a stream of byte chunks into events
///
/// A transport error ends the stream after being yielded.
pub fn decode_ndjson<S, B, E>(chunks: S) -> impl Stream<Item = Result<RawEvent>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    let state = Decoding {
        chunks: Box::pin(chunks),
        decoder: NdjsonDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.feed(chunk.as_ref())),
                Some(Err(e)) => {
                    state.done = true;
                    state.pending.push_back(Err(e.into()));
                }
                None => {
                    state.done = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
}

/// Event source fed from in-process channels
///
/// Each [`ChannelEventSource::connect`] queues one stream; every subscribe
/// takes the oldest queued stream.
#[derive(Debug, Default)]
pub struct ChannelEventSource {
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<RawEvent>>>>,
    subscriptions: Mutex<Vec<StreamSubscription>>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream and return its sending half
    pub fn connect(&self) -> mpsc::UnboundedSender<Result<RawEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push_back(rx);
        tx
    }

    /// Subscriptions received so far
    pub fn subscriptions(&self) -> Vec<StreamSubscription> {
        self.subscriptions.lock().clone()
    }
}

impl EventSource for ChannelEventSource {
    fn subscribe(&self, subscription: StreamSubscription) -> BoxFuture<'static, Result<EventStream>> {
        self.subscriptions.lock().push(subscription);
        let next = self.streams.lock().pop_front();
        Box::pin(async move {
            let rx = next.ok_or_else(|| Error::Request {
                source: RequestError::with_status(503, "no event stream available"),
            })?;
            let events = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(events.boxed())
        })
    }
}
