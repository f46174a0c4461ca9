use bytes::Bytes;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dns_types::protocol::types::*;

/// How often the eviction task sweeps expired entries by default.
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(10);

/// A convenience wrapper around a `Cache` which lets it be shared
/// between threads.
///
/// Invoking `clone` on a `SharedCache` gives a new instance which
/// refers to the same underlying `Cache` object.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<RwLock<Cache>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache lock poisoned, cannot recover from this - aborting";

impl SharedCache {
    /// Make a new, empty, shared cache.
    pub fn new() -> Self {
        SharedCache {
            cache: Arc::new(RwLock::new(Cache::new())),
        }
    }

    /// Get an unexpired entry from the cache.
    ///
    /// The TTL in the returned `ResourceRecord` is relative to the
    /// current time - not when the record was inserted into the
    /// cache.
    ///
    /// # Panics
    ///
    /// If the lock has been poisoned.
    pub fn get(&self, rtype: RecordType, name: &DomainName) -> Option<ResourceRecord> {
        self.cache
            .read()
            .expect(MUTEX_POISON_MESSAGE)
            .get(rtype, name)
    }

    /// Insert an entry into the cache, replacing any previous entry
    /// for the same type and name.
    ///
    /// # Panics
    ///
    /// If the lock has been poisoned.
    pub fn insert(&self, record: &ResourceRecord) {
        self.cache
            .write()
            .expect(MUTEX_POISON_MESSAGE)
            .insert(record);
    }

    /// Delete all expired entries.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Panics
    ///
    /// If the lock has been poisoned.
    pub fn remove_expired(&self) -> usize {
        self.cache
            .write()
            .expect(MUTEX_POISON_MESSAGE)
            .remove_expired()
    }

    /// # Panics
    ///
    /// If the lock has been poisoned.
    pub fn len(&self) -> usize {
        self.cache.read().expect(MUTEX_POISON_MESSAGE).len()
    }

    /// # Panics
    ///
    /// If the lock has been poisoned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Delete expired cache entries every `interval`, until `shutdown`
/// is cancelled.
pub async fn evict_expired_task(cache: SharedCache, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::debug!("cache eviction stopped");
                break;
            }
            _ = ticker.tick() => {
                let expired = cache.remove_expired();
                tracing::debug!(%expired, remaining = %cache.len(), "swept cache");
            }
        }
    }
}

type CacheKey = (RecordType, DomainName);

/// Address answers learned from upstream, one per (type, name).
///
/// You probably want to use `SharedCache` instead.
#[derive(Debug, Clone)]
pub struct Cache {
    /// Keyed by the lowercased name.
    entries: HashMap<CacheKey, CachedAnswer>,

    /// Priority queue of keys ordered by expiry time.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    expiry_priority: PriorityQueue<CacheKey, Reverse<Instant>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct CachedAnswer {
    /// The name with the case it was learned with.
    name: DomainName,
    rclass: RecordClass,
    rdata: Bytes,
    expires: Instant,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            expiry_priority: PriorityQueue::new(),
        }
    }

    /// Get an entry, if there is one and it expires strictly after
    /// now.  An expired entry which has not been swept yet is
    /// treated as absent.
    pub fn get(&self, rtype: RecordType, name: &DomainName) -> Option<ResourceRecord> {
        let now = Instant::now();
        let entry = self.entries.get(&(rtype, name.to_lowercase()))?;

        if entry.expires <= now {
            return None;
        }

        let remaining = entry.expires.duration_since(now).as_millis().div_ceil(1000);

        Some(ResourceRecord {
            name: entry.name.clone(),
            rtype,
            rclass: entry.rclass,
            ttl: u32::try_from(remaining).unwrap_or(u32::MAX),
            rdata: entry.rdata.clone(),
        })
    }

    /// Insert an entry, overwriting any existing one for the same
    /// type and name.  A TTL with the top bit set counts as zero, so
    /// the entry is expired on arrival.
    pub fn insert(&mut self, record: &ResourceRecord) {
        let ttl = if record.ttl > i32::MAX as u32 {
            0
        } else {
            record.ttl
        };
        let expires = Instant::now() + Duration::from_secs(ttl.into());
        let key = (record.rtype, record.name.to_lowercase());

        self.expiry_priority.push(key.clone(), Reverse(expires));
        self.entries.insert(
            key,
            CachedAnswer {
                name: record.name.clone(),
                rclass: record.rclass,
                rdata: record.rdata.clone(),
                expires,
            },
        );
    }

    /// Delete every entry which expires at or before now, soonest
    /// first.
    ///
    /// Returns the number of entries deleted.
    pub fn remove_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        while let Some((_, Reverse(expires))) = self.expiry_priority.peek() {
            if *expires > now {
                break;
            }

            if let Some((key, _)) = self.expiry_priority.pop() {
                self.entries.remove(&key);
                removed += 1;
            }
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
