use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::RemainingSubmissions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub address: String,
    pub data: RemainingSubmissions,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(address: String, data: RemainingSubmissions, now: DateTime<Utc>) -> Self {
        Self {
            address,
            data,
            created_at: now,
        }
    }

    /// Age in whole milliseconds; entries from the future count as fresh.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds().max(0)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_ms: i64) -> bool {
        self.age_ms(now) < ttl_ms
    }
}
