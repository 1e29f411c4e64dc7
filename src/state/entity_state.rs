//! EntityState - Paginated Entity Store
//!
//! A uniform cache for list-type resources. Each registered collection keeps
//! every entity it has seen (across pages), the ids of the latest page for the
//! active filter set, and the server-reported total.
//!
//! Only success actions mutate a collection. List requests are versioned by
//! the store-assigned `seq`, and a list success older than the latest request
//! for its filter set is discarded.

use std::sync::Arc;

use ahash::AHashMap;
use hashlink::LinkedHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::eventing::{Action, OperationDescriptor, Phase};

/// Entity identifier
pub type EntityId = Arc<str>;

/// Body of a list success action
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResult {
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default, alias = "totalCount")]
    pub total_count: Option<u64>,
}

/// Which operations feed a collection
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    name: Arc<str>,
    id_pointer: Arc<str>,
    list: OperationDescriptor,
    get: Option<OperationDescriptor>,
    create: Option<OperationDescriptor>,
    update: Option<OperationDescriptor>,
    delete: Option<OperationDescriptor>,
    restore: Option<OperationDescriptor>,
}

/// Role an operation plays for a collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    List,
    Get,
    Create,
    Update,
    Delete,
    Restore,
}

impl CollectionSpec {
    /// A collection fed by `list`; entity ids live at JSON pointer `id_pointer`
    pub fn new(name: impl Into<Arc<str>>, id_pointer: impl Into<Arc<str>>, list: OperationDescriptor) -> Self {
        Self {
            name: name.into(),
            id_pointer: id_pointer.into(),
            list,
            get: None,
            create: None,
            update: None,
            delete: None,
            restore: None,
        }
    }

    pub fn get(mut self, op: OperationDescriptor) -> Self {
        self.get = Some(op);
        self
    }

    pub fn create(mut self, op: OperationDescriptor) -> Self {
        self.create = Some(op);
        self
    }

    pub fn update(mut self, op: OperationDescriptor) -> Self {
        self.update = Some(op);
        self
    }

    pub fn delete(mut self, op: OperationDescriptor) -> Self {
        self.delete = Some(op);
        self
    }

    pub fn restore(mut self, op: OperationDescriptor) -> Self {
        self.restore = Some(op);
        self
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The list operation
    pub fn list_op(&self) -> &OperationDescriptor {
        &self.list
    }

    fn roles(&self) -> impl Iterator<Item = (&OperationDescriptor, Role)> {
        [
            (Some(&self.list), Role::List),
            (self.get.as_ref(), Role::Get),
            (self.create.as_ref(), Role::Create),
            (self.update.as_ref(), Role::Update),
            (self.delete.as_ref(), Role::Delete),
            (self.restore.as_ref(), Role::Restore),
        ]
        .into_iter()
        .filter_map(|(op, role)| op.map(|op| (op, role)))
    }

    /// Extract an entity id from an entity or a request payload
    fn id_of(&self, value: &Value) -> Option<EntityId> {
        let raw = value.pointer(&self.id_pointer).or_else(|| value.get("id"))?;
        match raw {
            Value::String(s) => Some(s.as_str().into()),
            Value::Number(n) => Some(n.to_string().into()),
            _ => None,
        }
    }
}

/// Canonical key of a list request's filter set
fn filter_key(payload: Option<&Value>) -> String {
    // serde_json maps are sorted, so equal filters serialize identically
    payload.map(Value::to_string).unwrap_or_default()
}

/// Cached entities and current page of one collection
#[derive(Debug, Clone, Default)]
pub struct PaginatedCollection {
    entities: LinkedHashMap<EntityId, Value>,
    current_page_ids: Vec<EntityId>,
    total_count: Option<u64>,
    /// Entities removed by delete, kept for restore
    trash: AHashMap<EntityId, Value>,
    /// Latest list request seq per filter set
    latest_seq: AHashMap<String, u64>,
    /// Filter set of the most recent list request
    active_filter: Option<String>,
    /// Highest list request seq reduced so far
    max_list_seq: u64,
}

impl PaginatedCollection {
    /// Cached entity by id
    pub fn entity(&self, id: &str) -> Option<&Value> {
        self.entities.get(id)
    }

    /// Number of cached entities
    pub fn cached_len(&self) -> usize {
        self.entities.len()
    }

    /// Ids of the current page
    pub fn current_page_ids(&self) -> &[EntityId] {
        &self.current_page_ids
    }

    /// Entities of the current page, in page order
    pub fn current_page(&self) -> Vec<Value> {
        self.current_page_ids
            .iter()
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    /// Server-reported total for the active filter set
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    /// Whether `query` is the filter set of the most recent list request
    pub fn is_active_filter(&self, query: &Value) -> bool {
        self.active_filter.as_deref() == Some(filter_key(Some(query)).as_str())
    }

    fn reduce(&mut self, spec: &CollectionSpec, role: Role, action: &Action) {
        match (role, action.phase()) {
            (Role::List, Some(Phase::Request)) => self.on_list_request(action),
            (Role::List, Some(Phase::Success)) => self.on_list_success(spec, action),
            (Role::Get | Role::Create, Some(Phase::Success)) => {
                if let Some(entity) = &action.payload {
                    self.upsert(spec, entity.clone(), false);
                }
            }
            (Role::Update, Some(Phase::Success)) => {
                if let Some(entity) = &action.payload {
                    self.upsert(spec, entity.clone(), true);
                }
            }
            (Role::Delete, Some(Phase::Success)) => self.on_delete_success(spec, action),
            (Role::Restore, Some(Phase::Success)) => self.on_restore_success(spec, action),
            _ => {}
        }
    }

    fn on_list_request(&mut self, action: &Action) {
        let key = filter_key(action.payload.as_ref());
        let Some(seq) = action.meta.seq else {
            self.active_filter = Some(key);
            return;
        };

        let latest = self.latest_seq.entry(key.clone()).or_insert(seq);
        *latest = (*latest).max(seq);
        // A request reduced after a newer one does not take over the page
        if seq >= self.max_list_seq {
            self.max_list_seq = seq;
            self.active_filter = Some(key);
        }
    }

    fn on_list_success(&mut self, spec: &CollectionSpec, action: &Action) {
        let key = filter_key(action.meta.origin.as_ref());
        if let (Some(seq), Some(latest)) = (action.meta.seq, self.latest_seq.get(&key)) {
            if seq < *latest {
                tracing::warn!(
                    "Discarding stale {} page (seq {} < {})",
                    spec.name,
                    seq,
                    latest
                );
                return;
            }
        }

        let result: ListResult = match action.payload.clone().map(serde_json::from_value) {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                tracing::warn!("Malformed {} list result: {}", spec.name, e);
                return;
            }
            None => ListResult::default(),
        };

        let mut page = Vec::with_capacity(result.entities.len());
        for entity in result.entities {
            match self.upsert(spec, entity, false) {
                Some(id) => page.push(id),
                None => tracing::warn!("Skipping {} entity without id", spec.name),
            }
        }

        let is_active = match &self.active_filter {
            Some(active) => *active == key,
            None => true,
        };
        if is_active {
            self.total_count = result.total_count.or(Some(page.len() as u64));
            self.current_page_ids = page;
        }
    }

    fn on_delete_success(&mut self, spec: &CollectionSpec, action: &Action) {
        let Some(id) = Self::target_id(spec, action) else {
            tracing::warn!("{} delete without id", spec.name);
            return;
        };
        if self.trash.contains_key(&id) {
            return;
        }

        self.current_page_ids.retain(|p| p != &id);
        let removed = self.entities.remove(&id).unwrap_or(Value::Null);
        self.trash.insert(id, removed);
        self.total_count = self.total_count.map(|n| n.saturating_sub(1));
    }

    fn on_restore_success(&mut self, spec: &CollectionSpec, action: &Action) {
        let Some(id) = Self::target_id(spec, action) else {
            tracing::warn!("{} restore without id", spec.name);
            return;
        };

        let stashed = self.trash.remove(&id);
        let returning =
            stashed.is_some() || (!self.entities.contains_key(&id) && !self.current_page_ids.contains(&id));
        let entity = action
            .payload
            .clone()
            .filter(|p| spec.id_of(p).as_ref() == Some(&id))
            .or(stashed)
            .filter(|e| !e.is_null());

        if let Some(entity) = entity {
            self.entities.replace(id.clone(), entity);
            if !self.current_page_ids.contains(&id) {
                self.current_page_ids.push(id);
            }
        }
        if returning {
            self.total_count = self.total_count.map(|n| n + 1);
        }
    }

    /// Id of the entity a delete/restore acted on
    fn target_id(spec: &CollectionSpec, action: &Action) -> Option<EntityId> {
        action
            .payload
            .as_ref()
            .and_then(|p| spec.id_of(p))
            .or_else(|| action.meta.origin.as_ref().and_then(|o| spec.id_of(o)))
    }

    fn upsert(&mut self, spec: &CollectionSpec, entity: Value, merge: bool) -> Option<EntityId> {
        let id = spec.id_of(&entity)?;
        self.trash.remove(&id);
        let merged = match (merge, self.entities.get(&id), entity) {
            (true, Some(Value::Object(existing)), Value::Object(patch)) => {
                let mut merged = existing.clone();
                merged.extend(patch);
                Value::Object(merged)
            }
            (_, _, entity) => entity,
        };
        self.entities.replace(id.clone(), merged);
        Some(id)
    }
}

/// All paginated collections, routed by operation base name
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    collections: AHashMap<Arc<str>, (CollectionSpec, PaginatedCollection)>,
    routes: AHashMap<Arc<str>, (Arc<str>, Role)>,
}

impl EntityStore {
    /// Register a collection
    pub fn register(&mut self, spec: CollectionSpec) {
        for (op, role) in spec.roles() {
            self.routes
                .insert(op.base().into(), (spec.name.clone(), role));
        }
        tracing::debug!("Registered collection {}", spec.name);
        self.collections
            .insert(spec.name.clone(), (spec, PaginatedCollection::default()));
    }

    /// Builder-style registration
    pub fn with(mut self, spec: CollectionSpec) -> Self {
        self.register(spec);
        self
    }

    /// Apply an action
    pub fn reduce(&mut self, action: &Action) {
        let Some(base) = action.base() else {
            return;
        };
        let Some((name, role)) = self.routes.get(base).cloned() else {
            return;
        };
        if let Some((spec, collection)) = self.collections.get_mut(&name) {
            collection.reduce(spec, role, action);
        }
    }

    /// A collection by name
    pub fn collection(&self, name: &str) -> Option<&PaginatedCollection> {
        self.collections.get(name).map(|(_, c)| c)
    }

    /// A collection's spec by name
    pub fn spec(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.get(name).map(|(s, _)| s)
    }

    /// Cached entity
    pub fn entity(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collection(collection)?.entity(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use serde_json::json;

    fn ops() -> (OperationDescriptor, OperationDescriptor, OperationDescriptor) {
        (
            OperationDescriptor::new("GET_DEVICES_LIST"),
            OperationDescriptor::new("DELETE_DEVICE"),
            OperationDescriptor::new("RESTORE_DEVICE"),
        )
    }

    fn store() -> EntityStore {
        let (list, delete, restore) = ops();
        EntityStore::default().with(
            CollectionSpec::new("devices", "/ids/device_id", list)
                .get(OperationDescriptor::new("GET_DEVICE"))
                .update(OperationDescriptor::new("UPDATE_DEVICE"))
                .delete(delete)
                .restore(restore),
        )
    }

    fn device(id: &str) -> Value {
        json!({ "ids": { "device_id": id }, "name": format!("Device {id}") })
    }

    fn list_request(query: Value, seq: u64) -> Action {
        let mut action = ops().0.request(query);
        action.meta.seq = Some(seq);
        action
    }

    fn list_success(query: Value, seq: u64, ids: &[&str], total: u64) -> Action {
        let entities: Vec<Value> = ids.iter().map(|id| device(id)).collect();
        let mut action = ops()
            .0
            .success(json!({ "entities": entities, "totalCount": total }), Some(&query));
        action.meta.seq = Some(seq);
        action
    }

    fn assert_invariants(store: &EntityStore) {
        let devices = store.collection("devices").expect("registered");
        for id in devices.current_page_ids() {
            assert!(devices.entity(id).is_some(), "page id {id} missing from cache");
        }
    }

    #[test]
    fn test_list_success_sets_page_and_accumulates_cache() {
        let mut store = store();
        let page1 = json!({ "page": 1, "limit": 2 });
        let page2 = json!({ "page": 2, "limit": 2 });

        store.reduce(&list_request(page1.clone(), 1));
        store.reduce(&list_success(page1, 1, &["a", "b"], 3));
        store.reduce(&list_request(page2.clone(), 2));
        store.reduce(&list_success(page2, 2, &["c"], 3));

        let devices = store.collection("devices").expect("registered");
        let page: Vec<&str> = devices.current_page_ids().iter().map(|id| &**id).collect();
        assert_eq!(page, vec!["c"]);
        assert_eq!(devices.cached_len(), 3);
        assert_eq!(devices.total_count(), Some(3));
        assert_invariants(&store);
    }

    #[test]
    fn test_stale_list_success_is_discarded() {
        let mut store = store();
        let query = json!({ "page": 1 });

        store.reduce(&list_request(query.clone(), 1));
        store.reduce(&list_request(query.clone(), 2));
        store.reduce(&list_success(query.clone(), 2, &["fresh"], 1));
        store.reduce(&list_success(query, 1, &["stale"], 9));

        let devices = store.collection("devices").expect("registered");
        assert_eq!(devices.current_page_ids(), &[EntityId::from("fresh")]);
        assert_eq!(devices.total_count(), Some(1));
        assert!(devices.entity("stale").is_none());
    }

    #[test]
    fn test_inactive_filter_only_feeds_cache() {
        let mut store = store();
        let old = json!({ "query": "old" });
        let new = json!({ "query": "new" });

        store.reduce(&list_request(old.clone(), 1));
        store.reduce(&list_request(new.clone(), 2));
        store.reduce(&list_success(new.clone(), 2, &["n"], 1));
        store.reduce(&list_success(old, 1, &["o"], 5));

        let devices = store.collection("devices").expect("registered");
        assert_eq!(devices.current_page_ids(), &[EntityId::from("n")]);
        assert_eq!(devices.total_count(), Some(1));
        assert!(devices.entity("o").is_some());
        assert!(devices.is_active_filter(&new));
    }

    #[test]
    fn test_delete_and_restore() {
        let (_, delete, restore) = ops();
        let mut store = store();
        let query = json!({});
        store.reduce(&list_request(query.clone(), 1));
        store.reduce(&list_success(query, 1, &["a", "b"], 2));

        let origin = json!({ "id": "a" });
        store.reduce(&delete.request(origin.clone()));
        // Nothing changes before the server confirms
        assert_eq!(store.collection("devices").map(|c| c.current_page_ids().len()), Some(2));
        store.reduce(&delete.success(Value::Null, Some(&origin)));

        let devices = store.collection("devices").expect("registered");
        assert_eq!(devices.current_page_ids(), &[EntityId::from("b")]);
        assert_eq!(devices.total_count(), Some(1));
        assert!(devices.entity("a").is_none());

        // Duplicate delete success does not decrement twice
        store.reduce(&delete.success(Value::Null, Some(&origin)));
        assert_eq!(store.collection("devices").and_then(|c| c.total_count()), Some(1));

        store.reduce(&restore.success(Value::Null, Some(&origin)));
        let devices = store.collection("devices").expect("registered");
        assert_eq!(devices.total_count(), Some(2));
        assert_eq!(devices.entity("a"), Some(&device("a")));
        assert!(devices.current_page_ids().contains(&EntityId::from("a")));
        assert_invariants(&store);
    }

    #[test]
    fn test_duplicate_restore_counts_once() {
        let (_, delete, restore) = ops();
        let mut store = store();
        let query = json!({});
        store.reduce(&list_request(query.clone(), 1));
        store.reduce(&list_success(query, 1, &["a", "b"], 2));

        let origin = json!({ "id": "a" });
        store.reduce(&delete.success(Value::Null, Some(&origin)));
        store.reduce(&restore.success(Value::Null, Some(&origin)));
        store.reduce(&restore.success(Value::Null, Some(&origin)));

        let devices = store.collection("devices").expect("registered");
        assert_eq!(devices.total_count(), Some(2));
        let page: Vec<&str> = devices.current_page_ids().iter().map(|id| &**id).collect();
        assert_eq!(page, vec!["b", "a"]);

        // Restoring an entity that was never deleted changes nothing
        store.reduce(&restore.success(device("b"), None));
        assert_eq!(store.collection("devices").and_then(|c| c.total_count()), Some(2));
        assert_invariants(&store);
    }

    #[test]
    fn test_out_of_order_list_request_keeps_newer_filter() {
        let mut store = store();
        let x = json!({ "query": "x" });
        let y = json!({ "query": "y" });

        store.reduce(&list_request(y.clone(), 2));
        store.reduce(&list_request(x.clone(), 1));
        store.reduce(&list_success(x.clone(), 1, &["x1"], 1));
        store.reduce(&list_success(y.clone(), 2, &["y1", "y2"], 2));

        let devices = store.collection("devices").expect("registered");
        assert!(devices.is_active_filter(&y));
        assert!(!devices.is_active_filter(&x));
        let page: Vec<&str> = devices.current_page_ids().iter().map(|id| &**id).collect();
        assert_eq!(page, vec!["y1", "y2"]);
        assert_eq!(devices.total_count(), Some(2));
    }

    #[test]
    fn test_delete_list_interleavings_keep_invariants() {
        let (_, delete, _) = ops();
        let query = json!({});

        // Every ordering of: list request, delete success, list success (stale or not)
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut store = store();
            store.reduce(&list_request(query.clone(), 1));
            store.reduce(&list_success(query.clone(), 1, &["a"], 1));

            let steps = [
                list_request(query.clone(), 2),
                delete.success(json!({ "id": "a" }), None),
                list_success(query.clone(), 2, &["a"], 1),
            ];
            for i in order {
                store.reduce(&steps[i]);
                store.reduce(&delete.success(json!({ "id": "a" }), None));
                assert_invariants(&store);
            }
            let total = store.collection("devices").and_then(|c| c.total_count());
            assert!(total.is_some_and(|n| n <= 1));
        }
    }

    #[test]
    fn test_update_merges_and_get_inserts() {
        let mut store = store();
        store.reduce(&OperationDescriptor::new("GET_DEVICE").success(device("x"), None));
        store.reduce(&OperationDescriptor::new("UPDATE_DEVICE").success(
            json!({ "ids": { "device_id": "x" }, "description": "updated" }),
            None,
        ));

        let entity = store.entity("devices", "x").expect("cached");
        assert_eq!(entity["name"], "Device x");
        assert_eq!(entity["description"], "updated");
    }

    #[test]
    fn test_failures_do_not_mutate() {
        let (list, delete, _) = ops();
        let mut store = store();
        store.reduce(&list_request(json!({}), 1));
        store.reduce(&list_success(json!({}), 1, &["a"], 1));
        store.reduce(&list.failure(RequestError::new("x"), Some(&json!({}))));
        store.reduce(&delete.failure(RequestError::new("x"), Some(&json!({ "id": "a" }))));

        let devices = store.collection("devices").expect("registered");
        assert_eq!(devices.current_page_ids().len(), 1);
        assert_eq!(devices.total_count(), Some(1));
    }
}
