//! Visited - Frequently Visited Entities

use serde::{Deserialize, Serialize};

/// Access record of one entity, persisted under its `type:id` key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitedRecord {
    /// Number of recorded accesses, at least 1
    pub frequency: u64,
    /// Last access, milliseconds since epoch
    pub last_accessed: i64,
}

impl VisitedRecord {
    /// Decay score at `now_ms`: `frequency * exp(-(now - last_accessed) / tau)`
    pub fn score(&self, now_ms: i64, tau_ms: f64) -> f64 {
        let elapsed = (now_ms - self.last_accessed).max(0) as f64;
        self.frequency as f64 * (-elapsed / tau_ms).exp()
    }
}

/// Build the storage key of an entity
pub fn entity_key(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

/// A ranked entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntity {
    /// `type:id`
    pub key: String,
    pub score: f64,
    pub record: VisitedRecord,
}

impl ScoredEntity {
    /// Entity type part of the key
    pub fn kind(&self) -> &str {
        self.key.split_once(':').map_or(self.key.as_str(), |(kind, _)| kind)
    }

    /// Entity id part of the key
    pub fn id(&self) -> &str {
        self.key.split_once(':').map_or("", |(_, id)| id)
    }
}
