//! Operation Descriptors
//!
//! Builds the four canonical lifecycle action types and constructors for a
//! named operation. Descriptors are created once and shared immutably.
//!
//! ```
//! use console_pipeline::eventing::OperationDescriptor;
//! use serde_json::json;
//!
//! let get_gateway = OperationDescriptor::new("GET_GATEWAY")
//!     .payload_creator(|args| json!({ "id": args }))
//!     .attach_promise();
//!
//! let action = get_gateway.request(json!("gtw-1"));
//! assert_eq!(action.kind.as_str(), "GET_GATEWAY_REQUEST");
//! assert!(action.meta.attach_promise);
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::eventing::action::{Action, ActionMeta, ActionType, Phase};

type PayloadCreator = Arc<dyn Fn(Value) -> Value + Send + Sync>;
type MetaCreator = Arc<dyn Fn(Option<&Value>) -> Map<String, Value> + Send + Sync>;

/// Type tags and action constructors for one operation
#[derive(Clone)]
pub struct OperationDescriptor {
    base: Arc<str>,
    request_type: ActionType,
    success_type: ActionType,
    failure_type: ActionType,
    abort_type: ActionType,
    payload_creator: Option<PayloadCreator>,
    meta_creator: Option<MetaCreator>,
    attach_promise: bool,
}

impl OperationDescriptor {
    /// Create a descriptor for `base`
    pub fn new(base: impl Into<Arc<str>>) -> Self {
        let base = base.into();
        Self {
            request_type: ActionType::lifecycle(&base, Phase::Request),
            success_type: ActionType::lifecycle(&base, Phase::Success),
            failure_type: ActionType::lifecycle(&base, Phase::Failure),
            abort_type: ActionType::lifecycle(&base, Phase::Abort),
            base,
            payload_creator: None,
            meta_creator: None,
            attach_promise: false,
        }
    }

    /// Recover the descriptor from any of its four type tags
    pub fn from_type(tag: &ActionType) -> Option<Self> {
        tag.base().map(Self::new)
    }

    /// Shape request payloads from the request constructor's arguments
    pub fn payload_creator(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.payload_creator = Some(Arc::new(f));
        self
    }

    /// Shape success/failure metadata; receives the request payload
    pub fn meta_creator(
        mut self,
        f: impl Fn(Option<&Value>) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.meta_creator = Some(Arc::new(f));
        self
    }

    /// Mark request actions so the dispatcher attaches a promise
    pub fn attach_promise(mut self) -> Self {
        self.attach_promise = true;
        self
    }

    /// Operation base name
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn request_type(&self) -> &ActionType {
        &self.request_type
    }

    pub fn success_type(&self) -> &ActionType {
        &self.success_type
    }

    pub fn failure_type(&self) -> &ActionType {
        &self.failure_type
    }

    pub fn abort_type(&self) -> &ActionType {
        &self.abort_type
    }

    /// Type tag for `phase`
    pub fn type_for(&self, phase: Phase) -> &ActionType {
        match phase {
            Phase::Request => &self.request_type,
            Phase::Success => &self.success_type,
            Phase::Failure => &self.failure_type,
            Phase::Abort => &self.abort_type,
        }
    }

    /// Whether `tag` belongs to this operation
    pub fn owns(&self, tag: &ActionType) -> bool {
        tag.base() == Some(&*self.base)
    }

    /// Build a request action; the payload is derived from `args` on every call
    pub fn request(&self, args: Value) -> Action {
        let payload = match &self.payload_creator {
            Some(create) => create(args),
            None => args,
        };
        let meta = ActionMeta {
            attach_promise: self.attach_promise,
            ..ActionMeta::default()
        };
        Action::new(self.request_type.clone())
            .with_payload(payload)
            .with_meta(meta)
    }

    /// Build a success action answering a request with payload `origin`
    pub fn success(&self, result: Value, origin: Option<&Value>) -> Action {
        Action::new(self.success_type.clone())
            .with_payload(result)
            .with_meta(self.terminal_meta(origin))
    }

    /// Build a failure action answering a request with payload `origin`
    pub fn failure(&self, error: RequestError, origin: Option<&Value>) -> Action {
        Action::new(self.failure_type.clone())
            .with_error(error)
            .with_meta(self.terminal_meta(origin))
    }

    /// Build an abort action
    pub fn abort(&self) -> Action {
        Action::new(self.abort_type.clone())
    }

    fn terminal_meta(&self, origin: Option<&Value>) -> ActionMeta {
        ActionMeta {
            origin: origin.cloned(),
            extra: self
                .meta_creator
                .as_ref()
                .map(|create| create(origin))
                .unwrap_or_default(),
            ..ActionMeta::default()
        }
    }
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("base", &self.base)
            .field("attach_promise", &self.attach_promise)
            .finish()
    }
}
