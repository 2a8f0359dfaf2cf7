pub mod key;
pub mod policy;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, trace};

use crate::events::{Subscription, TokenEvent, TokenEventBus};

pub use self::key::CacheKey;
pub use self::policy::{CachePlan, PolicyRegistry};
pub use self::types::{CacheEntry, CachePolicy, CacheStats, CacheStatsSnapshot, PolicyRule};

// ---------------------------------------------------------------------------
// ResultCache -- public facade
// ---------------------------------------------------------------------------

/// In-memory store of query results, shared by every caller of the pipeline.
///
/// Session-scoped entries are evicted whenever the token pair changes;
/// [`CachePolicy::StaticRetain`] entries are kept for the life of the process.
#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    stats: CacheStats,
    /// Bumped under the entries lock on every token event. A user-scoped
    /// result fetched under an earlier generation may belong to another
    /// identity.
    generation: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, counting a hit or miss.
    pub fn read(&self, key: &CacheKey) -> Option<Value> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|e| e.value.clone());

        match found {
            Some(value) => {
                trace!(%key, "Cache hit");
                self.stats.record_hit();
                Some(value)
            }
            None => {
                trace!(%key, "Cache miss");
                self.stats.record_miss();
                None
            }
        }
    }

    /// Full entry for `key`, without touching the stats.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Fold `value` into the entry at `key` according to `policy`.
    ///
    /// Returns the value now stored, which is what the caller should see:
    /// the merged value for [`CachePolicy::KeyedByArgs`] and the retained one
    /// for [`CachePolicy::StaticRetain`].
    pub fn write(&self, key: CacheKey, value: Value, policy: CachePolicy) -> Value {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.write_locked(&mut entries, key, value, policy)
    }

    /// Like [`ResultCache::write`], but only while the cache is still at
    /// `generation`. A stale result is handed back untouched in `Err`.
    pub fn write_if_current(
        &self,
        key: CacheKey,
        value: Value,
        policy: CachePolicy,
        generation: u64,
    ) -> Result<Value, Value> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(%key, "Token changed since the request started; result not cached");
            return Err(value);
        }
        Ok(self.write_locked(&mut entries, key, value, policy))
    }

    fn write_locked(
        &self,
        entries: &mut HashMap<CacheKey, CacheEntry>,
        key: CacheKey,
        value: Value,
        policy: CachePolicy,
    ) -> Value {
        let now = chrono::Utc::now();
        self.stats.record_write();

        match entries.get_mut(&key) {
            Some(existing) => {
                match policy {
                    CachePolicy::Replace => existing.value = value,
                    CachePolicy::KeyedByArgs => merge(&mut existing.value, value),
                    CachePolicy::StaticRetain => {
                        trace!(%key, "Retaining existing reference entry");
                        return existing.value.clone();
                    }
                }
                existing.policy = policy;
                existing.written_at = now;
                existing.writes += 1;
                debug!(%key, %policy, writes = existing.writes, "Cache entry updated");
                existing.value.clone()
            }
            None => {
                debug!(%key, %policy, "Cache entry created");
                entries.insert(
                    key,
                    CacheEntry {
                        value: value.clone(),
                        policy,
                        written_at: now,
                        writes: 1,
                    },
                );
                value
            }
        }
    }

    /// Remove every entry matching `predicate`. Returns how many were removed.
    pub fn evict<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey, &CacheEntry) -> bool,
    {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|k, e| !predicate(k, e));
        let removed = before - entries.len();
        self.stats.record_evictions(removed);
        removed
    }

    /// Handle a token lifecycle event: advance the generation and drop
    /// session-scoped entries in one critical section.
    pub fn on_token_event(&self, event: TokenEvent) -> usize {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let before = entries.len();
        entries.retain(|_, e| e.policy.survives_session_change());
        let removed = before - entries.len();
        self.stats.record_evictions(removed);
        debug!(topic = %event, generation, removed, "Evicted session-scoped cache entries");
        removed
    }

    /// Subscribe this cache to both token topics on `bus`.
    ///
    /// Eviction runs for as long as the returned subscriptions are held.
    pub fn attach(self: &Arc<Self>, bus: &TokenEventBus) -> Vec<Subscription> {
        [TokenEvent::Updated, TokenEvent::Removed]
            .into_iter()
            .map(|topic| {
                let cache = Arc::downgrade(self);
                bus.subscribe(topic, move |event| {
                    if let Some(cache) = cache.upgrade() {
                        cache.on_token_event(event);
                    }
                })
            })
            .collect()
    }

    /// Number of token events seen so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of cached keys.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Drop every entry, reference data included.
    pub fn clear(&self) {
        let removed = self.evict(|_, _| true);
        debug!(removed, "Cache cleared");
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Deep merge: objects merge field by field, arrays append, anything else
/// is replaced by `incoming`.
fn merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(next)) => {
            for (field, value) in next {
                match current.get_mut(&field) {
                    Some(slot) => merge(slot, value),
                    None => {
                        current.insert(field, value);
                    }
                }
            }
        }
        (Value::Array(current), Value::Array(next)) => current.extend(next),
        (slot, incoming) => *slot = incoming,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
