use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ethereum_types::H160;
use lru::LruCache;
use shared::RemainingSubmissions;

use crate::cache::models::CacheEntry;
use crate::contract::abi::format_address;

/// Address-keyed read-through cache for remaining-submission counts.
///
/// Bounded: the least recently used address is dropped once `capacity` is reached.
/// Entries are never invalidated by writes, only replaced after they go stale.
#[derive(Clone)]
pub struct SubmissionCache {
    entries: Arc<Mutex<LruCache<String, CacheEntry>>>,
    ttl_ms: i64,
}

impl SubmissionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn key(address: &H160) -> String {
        format_address(address)
    }

    /// Returns the cached value if it is younger than the TTL at `now`.
    pub fn get(&self, address: &H160, now: DateTime<Utc>) -> Option<RemainingSubmissions> {
        let key = Self::key(address);
        let mut entries = self.lock();
        let entry = entries.get(&key)?;
        if entry.is_fresh(now, self.ttl_ms) {
            log::info!(
                "Using cached data for {}, age: {}s",
                entry.address,
                entry.age_ms(now) / 1000
            );
            Some(entry.data)
        } else {
            None
        }
    }

    pub fn insert(&self, address: &H160, data: RemainingSubmissions, now: DateTime<Utc>) {
        let key = Self::key(address);
        let entry = CacheEntry::new(key.clone(), data, now);
        if let Some((evicted, _)) = self.lock().push(key, entry) {
            if evicted != Self::key(address) {
                log::debug!("Evicted cached submissions for {}", evicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn data(remaining: u32) -> RemainingSubmissions {
        RemainingSubmissions { remaining, max: 5 }
    }

    #[test]
    fn fresh_entry_is_returned_unchanged() {
        let cache = SubmissionCache::new(10, Duration::from_secs(300));
        let addr = H160::repeat_byte(1);
        cache.insert(&addr, data(3), at(0));
        assert_eq!(cache.get(&addr, at(0)), Some(data(3)));
        assert_eq!(cache.get(&addr, at(299_999)), Some(data(3)));
    }

    #[test]
    fn entry_goes_stale_at_ttl() {
        let cache = SubmissionCache::new(10, Duration::from_secs(300));
        let addr = H160::repeat_byte(1);
        cache.insert(&addr, data(3), at(0));
        assert_eq!(cache.get(&addr, at(300_000)), None);

        cache.insert(&addr, data(2), at(300_000));
        assert_eq!(cache.get(&addr, at(300_001)), Some(data(2)));
    }

    #[test]
    fn miss_for_unknown_address() {
        let cache = SubmissionCache::new(10, Duration::from_secs(300));
        assert_eq!(cache.get(&H160::repeat_byte(9), at(0)), None);
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = SubmissionCache::new(2, Duration::from_secs(300));
        for byte in 1..=3u8 {
            cache.insert(&H160::repeat_byte(byte), data(byte as u32), at(0));
        }
        assert_eq!(cache.lock().len(), 2);
        assert_eq!(cache.get(&H160::repeat_byte(1), at(1)), None);
        assert_eq!(cache.get(&H160::repeat_byte(3), at(1)), Some(data(3)));
    }

    #[test]
    fn keys_are_lowercase_hex() {
        assert_eq!(
            SubmissionCache::key(&H160::repeat_byte(0xab)),
            format!("0x{}", "ab".repeat(20))
        );
    }
}
