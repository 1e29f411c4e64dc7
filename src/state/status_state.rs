//! StatusState - Fetching Flags and Error Map
//!
//! Tracks, per operation base name, whether a request is in flight and the
//! last error it failed with. Only the lifecycle transitions write here.

use std::sync::Arc;

use ahash::AHashMap;

use crate::error::RequestError;
use crate::eventing::{Action, Phase};

/// Fetching flag map and error map keyed by operation base name
#[derive(Debug, Clone, Default)]
pub struct StatusState {
    fetching: AHashMap<Arc<str>, bool>,
    errors: AHashMap<Arc<str>, RequestError>,
}

impl StatusState {
    /// Apply a lifecycle action
    pub fn reduce(&mut self, action: &Action) {
        let (Some(base), Some(phase)) = (action.base(), action.phase()) else {
            return;
        };
        let base: Arc<str> = base.into();

        match phase {
            Phase::Request => {
                self.fetching.insert(base.clone(), true);
                self.errors.remove(&base);
            }
            Phase::Success => {
                self.fetching.insert(base.clone(), false);
                self.errors.remove(&base);
            }
            Phase::Failure => {
                self.fetching.insert(base.clone(), false);
                let error = action
                    .error
                    .clone()
                    .unwrap_or_else(|| RequestError::new("unknown error"));
                self.errors.insert(base, error);
            }
            Phase::Abort => {
                self.fetching.insert(base, false);
            }
        }
    }

    /// Whether `base` has a request in flight
    pub fn is_fetching(&self, base: &str) -> bool {
        self.fetching.get(base).copied().unwrap_or(false)
    }

    /// Whether any of `bases` has a request in flight
    pub fn is_any_fetching(&self, bases: &[&str]) -> bool {
        bases.iter().any(|b| self.is_fetching(b))
    }

    /// Last error for `base`, until the next request or success
    pub fn error(&self, base: &str) -> Option<&RequestError> {
        self.errors.get(base)
    }

    /// First error among `bases`
    pub fn first_error(&self, bases: &[&str]) -> Option<&RequestError> {
        bases.iter().find_map(|b| self.error(b))
    }
}
