//! Pipeline Constants
//!
//! Centralized defaults shared by the config layer and the pipeline parts.

/// Action type-tag suffixes
pub const REQUEST_SUFFIX: &str = "_REQUEST";
pub const SUCCESS_SUFFIX: &str = "_SUCCESS";
pub const FAILURE_SUFFIX: &str = "_FAILURE";
pub const ABORT_SUFFIX: &str = "_ABORT";

/// Event buffer defaults
pub const EVENT_BUFFER_MAX_ITEMS: usize = 20;
pub const EVENT_BUFFER_DELAY_MS: u64 = 200;

/// Bounded history of events kept per stream
pub const STREAM_EVENTS_CAPACITY: usize = 2000;

/// Recency-frequency ranking
pub const VISITED_STORAGE_KEY: &str = "frequentlyVisitedEntities";
pub const VISITED_TOP_N: usize = 5;
pub const VISITED_DECAY_MS: f64 = 1000.0;
pub const VISITED_MAX_RECORDS: usize = 100;

/// Compiled wildcard patterns kept in the process-wide cache
pub const PATTERN_CACHE_CAPACITY: usize = 256;

/// Gateway events after which connection statistics are refetched
pub const GATEWAY_HEARTBEAT_PATTERNS: &[&str] =
    &["gs.status.receive", "gs.gateway.connect", "gs.gateway.disconnect"];

/// Events stream lifecycle operation
pub const EVENTS_STREAM_OPERATION: &str = "START_EVENTS_STREAM";
/// Plain action carrying a flushed batch of stream events
pub const EVENTS_RECEIVE: &str = "EVENTS_RECEIVE";
/// Plain actions pausing and resuming a stream's visible history
pub const EVENTS_PAUSE: &str = "EVENTS_PAUSE";
pub const EVENTS_RESUME: &str = "EVENTS_RESUME";
pub const EVENTS_CLEAR: &str = "EVENTS_CLEAR";

/// HTTP request timeout
pub const HTTP_TIMEOUT_SECS: u64 = 30;
