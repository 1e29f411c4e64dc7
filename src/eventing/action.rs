//! Lifecycle Actions
//!
//! Every request in the pipeline is modeled as up to four actions sharing a
//! base name: `<BASE>_REQUEST`, `<BASE>_SUCCESS`, `<BASE>_FAILURE` and
//! `<BASE>_ABORT`. Any tag maps to its siblings by suffix substitution, so
//! consumers never need a lookup table.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::constants::{ABORT_SUFFIX, FAILURE_SUFFIX, REQUEST_SUFFIX, SUCCESS_SUFFIX};
use crate::error::RequestError;
use crate::eventing::promise::Resolver;

/// Lifecycle phase encoded in a type tag suffix
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Request,
    Success,
    Failure,
    Abort,
}

impl Phase {
    /// All phases, in lifecycle order
    pub const ALL: [Phase; 4] = [Phase::Request, Phase::Success, Phase::Failure, Phase::Abort];

    /// Type tag suffix for this phase
    pub fn suffix(self) -> &'static str {
        match self {
            Phase::Request => REQUEST_SUFFIX,
            Phase::Success => SUCCESS_SUFFIX,
            Phase::Failure => FAILURE_SUFFIX,
            Phase::Abort => ABORT_SUFFIX,
        }
    }

    /// Whether this phase ends a lifecycle
    pub fn is_terminal(self) -> bool {
        !matches!(self, Phase::Request)
    }
}

/// An action type tag
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ActionType(Arc<str>);

impl ActionType {
    /// Create a type tag from a string
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    /// Build the tag for `base` in `phase`
    pub fn lifecycle(base: &str, phase: Phase) -> Self {
        Self::new(format!("{base}{}", phase.suffix()))
    }

    /// Get the underlying string reference
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lifecycle phase, if the tag follows the suffix convention
    pub fn phase(&self) -> Option<Phase> {
        self.split().map(|(_, phase)| phase)
    }

    /// Operation base name, if the tag follows the suffix convention
    pub fn base(&self) -> Option<&str> {
        self.split().map(|(base, _)| base)
    }

    /// Sibling tag of the same operation in another phase
    pub fn sibling(&self, phase: Phase) -> Option<ActionType> {
        self.base().map(|base| Self::lifecycle(base, phase))
    }

    fn split(&self) -> Option<(&str, Phase)> {
        Phase::ALL.into_iter().find_map(|phase| {
            self.0
                .strip_suffix(phase.suffix())
                .filter(|base| !base.is_empty())
                .map(|base| (base, phase))
        })
    }
}

impl From<&str> for ActionType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for ActionType {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ActionType {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action metadata
#[derive(Clone, Debug, Default, Serialize)]
pub struct ActionMeta {
    /// Ask the dispatcher to attach a promise to this request
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub attach_promise: bool,
    /// Settles the attached promise; injected by the dispatcher only
    #[serde(skip)]
    pub resolver: Option<Resolver>,
    /// Monotonic request sequence number assigned by the store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Payload of the request a success/failure answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Value>,
    /// Free-form metadata from meta creators
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A dispatched action
#[derive(Clone, Debug, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestError>,
    pub meta: ActionMeta,
}

impl Action {
    /// Create an action without payload
    pub fn new(kind: impl Into<ActionType>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
            error: None,
            meta: ActionMeta::default(),
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the error
    pub fn with_error(mut self, error: RequestError) -> Self {
        self.error = Some(error);
        self
    }

    /// Replace the metadata
    pub fn with_meta(mut self, meta: ActionMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Lifecycle phase of this action, if any
    pub fn phase(&self) -> Option<Phase> {
        self.kind.phase()
    }

    /// Operation base name of this action, if any
    pub fn base(&self) -> Option<&str> {
        self.kind.base()
    }

    /// Payload or `Value::Null`
    pub fn payload_or_null(&self) -> Value {
        self.payload.clone().unwrap_or(Value::Null)
    }

    /// Look up a string field on the payload
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.as_ref()?.get(field)?.as_str()
    }
}
