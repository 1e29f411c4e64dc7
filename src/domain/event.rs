//! RawEvent - Live Stream Event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single event received from the live event stream
///
/// Immutable once received. The pipeline shares events as `Arc<RawEvent>`,
/// so two deliveries of the same event are the same allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Dot-separated event name, e.g. `gs.up.receive`
    pub name: String,
    /// Server timestamp
    pub time: DateTime<Utc>,
    /// Entity identifiers the event relates to
    #[serde(default)]
    pub identifiers: Vec<Value>,
    /// Event body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Server assigned id, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Correlation ids linking related events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlation_ids: Vec<String>,
}

impl RawEvent {
    /// Create an event with the given name stamped now
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time: Utc::now(),
            identifiers: Vec::new(),
            data: None,
            unique_id: None,
            correlation_ids: Vec::new(),
        }
    }

    /// Attach an event body
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach identifiers
    pub fn with_identifiers(mut self, identifiers: Vec<Value>) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// Whether this is a synthetic error event emitted by the stream itself
    pub fn is_error(&self) -> bool {
        self.name.ends_with(".fail") || self.name.ends_with(".error")
    }
}
