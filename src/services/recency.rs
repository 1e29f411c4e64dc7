//! Recency-Frequency Tracker
//!
//! Keeps a persisted, decay-scored ranking of the entities a user opens.
//! Scores are never stored: they are recomputed from the current clock on
//! every read. The stored map is capped at write time so it cannot grow
//! without bound over a long session.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::constants::{VISITED_DECAY_MS, VISITED_MAX_RECORDS, VISITED_STORAGE_KEY, VISITED_TOP_N};
use crate::domain::visited::{ScoredEntity, VisitedRecord, entity_key};
use crate::error::{Error, Result};
use crate::utils::storage::{KeyValueStorage, load_json, save_json};

/// Persisted ranking document
type VisitedMap = BTreeMap<String, VisitedRecord>;

/// Wall clock in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// System clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ranking parameters
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    /// How many entities `top_n` surfaces
    pub top_n: usize,
    /// Decay constant τ in milliseconds
    pub decay_ms: f64,
    /// Upper bound on stored records
    pub max_records: usize,
    /// Durable storage key
    pub storage_key: String,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            top_n: VISITED_TOP_N,
            decay_ms: VISITED_DECAY_MS,
            max_records: VISITED_MAX_RECORDS,
            storage_key: VISITED_STORAGE_KEY.to_string(),
        }
    }
}

/// Ranking order: score descending, then key ascending
fn rank(a: &ScoredEntity, b: &ScoredEntity) -> CmpOrdering {
    b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key))
}

/// Tracks entity accesses and ranks them by decayed frequency
pub struct RecencyTracker {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    config: RecencyConfig,
    /// Serializes read-modify-write of the persisted map
    lock: Mutex<()>,
}

impl RecencyTracker {
    /// Create a tracker over `storage` using the system clock
    pub fn new(storage: Arc<dyn KeyValueStorage>, config: RecencyConfig) -> Result<Self> {
        Self::with_clock(storage, Arc::new(SystemClock), config)
    }

    /// Create a tracker with an explicit clock
    pub fn with_clock(
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
        config: RecencyConfig,
    ) -> Result<Self> {
        if !(config.decay_ms.is_finite() && config.decay_ms > 0.0) {
            return Err(Error::Invalid {
                message: format!("decay constant must be positive, got {}", config.decay_ms),
            });
        }
        Ok(Self {
            storage,
            clock,
            config,
            lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RecencyConfig {
        &self.config
    }

    /// Stored map; an undecodable document counts as empty and is overwritten on the next write
    fn load(&self) -> Result<VisitedMap> {
        match load_json(self.storage.as_ref(), &self.config.storage_key) {
            Err(Error::Json { source }) => {
                tracing::warn!("Ignoring corrupt {}: {}", self.config.storage_key, source);
                Ok(VisitedMap::new())
            }
            other => other,
        }
    }

    fn scored(&self, map: VisitedMap, now: i64) -> Vec<ScoredEntity> {
        let mut scored: Vec<ScoredEntity> = map
            .into_iter()
            .map(|(key, record)| ScoredEntity {
                score: record.score(now, self.config.decay_ms),
                key,
                record,
            })
            .collect();
        scored.sort_by(rank);
        scored
    }

    /// Record one access to `kind:id`
    pub fn track_access(&self, kind: &str, id: &str) -> Result<VisitedRecord> {
        let _guard = self.lock.lock();
        let now = self.clock.now_ms();
        let key = entity_key(kind, id);

        let mut map = self.load()?;
        let record = map
            .entry(key.clone())
            .and_modify(|r| {
                r.frequency += 1;
                r.last_accessed = now;
            })
            .or_insert(VisitedRecord {
                frequency: 1,
                last_accessed: now,
            });
        let record = *record;

        if map.len() > self.config.max_records {
            map = self.prune(map, &key, now);
        }

        save_json(self.storage.as_ref(), &self.config.storage_key, &map)?;
        tracing::debug!("Tracked access to {} (frequency {})", key, record.frequency);
        Ok(record)
    }

    /// Keep the best `max_records` records, always including `keep`
    fn prune(&self, map: VisitedMap, keep: &str, now: i64) -> VisitedMap {
        let before = map.len();
        let mut pruned = VisitedMap::new();
        let mut slots = self.config.max_records.saturating_sub(1);
        for entity in self.scored(map, now) {
            if entity.key == keep {
                pruned.insert(entity.key, entity.record);
            } else if slots > 0 {
                slots -= 1;
                pruned.insert(entity.key, entity.record);
            }
        }
        tracing::debug!("Evicted {} visited records", before - pruned.len());
        pruned
    }

    /// Highest scoring entities, best first
    pub fn top_n(&self) -> Result<Vec<ScoredEntity>> {
        let map = {
            let _guard = self.lock.lock();
            self.load()?
        };
        let mut scored = self.scored(map, self.clock.now_ms());
        scored.truncate(self.config.top_n);
        Ok(scored)
    }

    /// Stored record of `kind:id`
    pub fn record(&self, kind: &str, id: &str) -> Result<Option<VisitedRecord>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.get(&entity_key(kind, id)).copied())
    }

    /// Drop the record of `kind:id` (e.g. after the entity was deleted)
    pub fn forget(&self, kind: &str, id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.load()?;
        if map.remove(&entity_key(kind, id)).is_some() {
            save_json(self.storage.as_ref(), &self.config.storage_key, &map)?;
        }
        Ok(())
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        Ok(self.load()?.len())
    }
}

impl std::fmt::Debug for RecencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyTracker")
            .field("config", &self.config)
            .finish()
    }
}
