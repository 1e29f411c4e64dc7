//! Eventing - Actions, Promises and the Live Event Flow
//!
//! ```text
//! OperationDescriptor ──► Action ──► PromiseDispatcher ──► Store
//!                                         │
//!                                   AttachedPromise
//!
//! stream ──► FilterRuleSet ──► EventBuffer ──► EVENTS_RECEIVE
//!                                    └──────► ConnectionReactor
//! ```

pub mod action;
pub mod buffer;
pub mod descriptor;
pub mod filter;
pub mod promise;
pub mod reactor;

pub use action::{Action, ActionMeta, ActionType, Phase};
pub use buffer::{BufferConfig, EventBuffer};
pub use descriptor::OperationDescriptor;
pub use filter::{FilterRule, FilterRuleSet, wildcard_to_regex};
pub use promise::{AttachedPromise, CancelHandle, Resolver};
pub use reactor::ConnectionReactor;
