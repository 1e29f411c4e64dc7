//! Console Pipeline Library
//!
//! Client-side request/action lifecycle and live event pipeline of a network
//! console: lifecycle action factories, promise-attaching dispatch, request
//! processors, paginated entity state, event batching, wildcard stream
//! filters, heartbeat-driven refreshes and a recency-frequency ranking of
//! visited entities.

pub mod constants;
pub mod domain;
pub mod error;
pub mod eventing;
pub mod helpers;
pub mod services;
pub mod state;
pub mod utils;

pub use error::{Error, RequestError, Result};
