//! Service Layer
//!
//! Dispatch, side effects and live streams around the [`Store`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PromiseDispatcher                         │
//! │                 (attaches AttachedPromise)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ Action
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │   reduce ──► ConsoleState      publish ──► subscribers       │
//! │   middleware ──► RequestProcessor ──► ApiClient effect       │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ EVENTS_RECEIVE / START_EVENTS_STREAM_*
//! ┌─────────────────────────────────────────────────────────────┐
//! │  EventStreamController ◄── EventSource (HTTP NDJSON)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod event_source;
pub mod http;
pub mod processor;
pub mod recency;
pub mod runtime;
pub mod store;
pub mod stream;

pub use dispatcher::{Dispatch, PromiseDispatcher};
pub use event_source::{ChannelEventSource, EventSource, HttpEventSource, NdjsonDecoder, StreamSubscription};
pub use http::ApiClient;
pub use processor::{AbortSignal, Effect, EffectContext, EffectResult, RequestProcessor};
pub use recency::{Clock, ManualClock, RecencyConfig, RecencyTracker, SystemClock};
pub use runtime::{block_on, runtime_handle, spawn_named, spawn_task};
pub use store::{Middleware, Store};
pub use stream::{EventStreamController, StreamHandle, StreamOptions};
