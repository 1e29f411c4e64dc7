//! ConsoleState - Root State
//!
//! State is split by concern: lifecycle status, paginated entities and live
//! event streams. Each slice reduces the same action stream.

use serde_json::Value;

use crate::error::RequestError;
use crate::eventing::Action;
use crate::state::entity_state::{CollectionSpec, EntityStore};
use crate::state::events_state::EventsState;
use crate::state::status_state::StatusState;

/// One page of a collection, as consumed by list views
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub total_count: Option<u64>,
    pub fetching: bool,
    pub error: Option<RequestError>,
}

/// Root state reduced by the store
#[derive(Debug, Clone, Default)]
pub struct ConsoleState {
    pub status: StatusState,
    pub entities: EntityStore,
    pub events: EventsState,
}

impl ConsoleState {
    /// Root state with the given collections registered
    pub fn with_collections(specs: impl IntoIterator<Item = CollectionSpec>) -> Self {
        let mut state = Self::default();
        for spec in specs {
            state.entities.register(spec);
        }
        state
    }

    /// Apply an action to every slice
    pub fn reduce(&mut self, action: &Action) {
        self.status.reduce(action);
        self.entities.reduce(action);
        self.events.reduce(action);
    }

    /// Page of `collection` for `query`
    ///
    /// Items are only returned when `query` is the most recently requested
    /// filter set; fetching and error reflect the collection's list operation.
    pub fn page(&self, collection: &str, query: &Value) -> Option<Page> {
        let spec = self.entities.spec(collection)?;
        let data = self.entities.collection(collection)?;
        let base = spec.list_op().base();

        let (items, total_count) = if data.is_active_filter(query) {
            (data.current_page(), data.total_count())
        } else {
            (Vec::new(), None)
        };

        Some(Page {
            items,
            total_count,
            fetching: self.status.is_fetching(base),
            error: self.status.error(base).cloned(),
        })
    }

    /// Cached entity of `collection`
    pub fn entity(&self, collection: &str, id: &str) -> Option<&Value> {
        self.entities.entity(collection, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::OperationDescriptor;
    use serde_json::json;

    #[test]
    fn test_page_selector() {
        let list = OperationDescriptor::new("GET_GATEWAYS_LIST");
        let mut state =
            ConsoleState::with_collections([CollectionSpec::new("gateways", "/ids/gateway_id", list.clone())]);
        let query = json!({ "page": 1, "limit": 10 });

        let mut request = list.request(query.clone());
        request.meta.seq = Some(1);
        state.reduce(&request);
        let page = state.page("gateways", &query).expect("registered");
        assert!(page.fetching);
        assert!(page.items.is_empty());

        let mut success = list.success(
            json!({ "entities": [{ "ids": { "gateway_id": "g1" } }], "totalCount": 1 }),
            Some(&query),
        );
        success.meta.seq = Some(1);
        state.reduce(&success);

        let page = state.page("gateways", &query).expect("registered");
        assert!(!page.fetching);
        assert_eq!(page.total_count, Some(1));
        assert_eq!(page.items.len(), 1);
        assert!(state.entity("gateways", "g1").is_some());

        // A different filter set has no page yet
        let other = state.page("gateways", &json!({ "page": 2 })).expect("registered");
        assert!(other.items.is_empty());
        assert!(state.page("unknown", &query).is_none());
    }
}
