//! Rendered-preview cache with negative entries and single-flight population.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "html", rename_all = "snake_case")]
pub enum CachePayload {
    Rendered(String),
    /// No preview could be produced for this key.
    Unavailable,
}

impl CachePayload {
    pub fn outcome(&self) -> OutcomeKind {
        match self {
            CachePayload::Rendered(_) => OutcomeKind::Success,
            CachePayload::Unavailable => OutcomeKind::Negative,
        }
    }
}

/// One cached resolution. Entries are immutable; a refresh replaces the
/// whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachePayload,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub outcome: OutcomeKind,
}

impl CacheEntry {
    pub fn new(key: String, payload: CachePayload, ttl: Duration) -> Self {
        let created_at = SystemTime::now();
        Self {
            key,
            outcome: payload.outcome(),
            payload,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_live(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries. Zero disables storage; single-flight still applies.
    pub capacity: usize,
    pub success_ttl: Duration,
    pub negative_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            success_ttl: Duration::from_secs(24 * 60 * 60),
            negative_ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct Slot {
    entry: Arc<CacheEntry>,
    last_access: AtomicU64,
}

type InFlight = Shared<BoxFuture<'static, Arc<CacheEntry>>>;

#[derive(Clone)]
pub struct Cache {
    entries: Arc<DashMap<String, Slot>>,
    in_flight: Arc<DashMap<String, InFlight>>,
    config: Arc<CacheConfig>,
    clock: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::with_capacity(config.capacity)),
            in_flight: Arc::new(DashMap::new()),
            config: Arc::new(config),
            clock: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(CacheConfig {
            capacity,
            ..CacheConfig::default()
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live entry for `key`, if any. Counts as a hit or a miss.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let live = self.entries.get(key).and_then(|slot| {
            slot.entry.is_live(SystemTime::now()).then(|| {
                slot.last_access.store(self.tick(), Ordering::Relaxed);
                slot.entry.clone()
            })
        });

        let counter = if live.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        live
    }

    /// Returns the live entry for `key`, or runs `make` to produce one.
    ///
    /// At most one `make` future runs per key at a time; concurrent callers
    /// await the same result. The future runs as its own task, so dropping a
    /// caller never cancels it: it finishes and populates the cache.
    pub async fn get_or_resolve<F, Fut>(&self, key: String, make: F) -> Arc<CacheEntry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachePayload> + Send + 'static,
    {
        if let Some(entry) = self.get(&key) {
            return entry;
        }

        let pending = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!(key = %key, "Joining in-flight resolution");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                // A cycle may have finished between the lookup above and
                // taking the slot: it stores before it releases.
                if let Some(entry) = self.peek_live(&key) {
                    return entry;
                }
                let pending = self.spawn_cycle(key.clone(), make());
                vacant.insert(pending.clone());
                pending
            }
        };

        pending.await
    }

    fn spawn_cycle<Fut>(&self, key: String, work: Fut) -> InFlight
    where
        Fut: Future<Output = CachePayload> + Send + 'static,
    {
        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
        };
        let fallback_key = key.clone();
        let task_cache = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let payload = work.await;
            task_cache.store(key, payload)
        });

        let cache = self.clone();
        async move {
            match handle.await {
                Ok(entry) => entry,
                Err(e) => {
                    error!(key = %fallback_key, error = %e, "Preview resolution task failed");
                    cache.store(fallback_key, CachePayload::Unavailable)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Stores a payload with the TTL its outcome calls for.
    pub fn store(&self, key: String, payload: CachePayload) -> Arc<CacheEntry> {
        let ttl = match payload.outcome() {
            OutcomeKind::Success => self.config.success_ttl,
            OutcomeKind::Negative => self.config.negative_ttl,
        };
        let entry = Arc::new(CacheEntry::new(key, payload, ttl));
        self.insert(entry.clone());
        entry
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Live entries, for persisting outside the process.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let now = SystemTime::now();
        self.entries
            .iter()
            .filter(|slot| slot.entry.is_live(now))
            .map(|slot| slot.entry.as_ref().clone())
            .collect()
    }

    /// Loads persisted entries. Expired records are skipped.
    pub fn restore(&self, entries: impl IntoIterator<Item = CacheEntry>) -> usize {
        let now = SystemTime::now();
        let mut restored = 0;
        for entry in entries.into_iter().filter(|e| e.is_live(now)) {
            self.insert(Arc::new(entry));
            restored += 1;
        }
        restored
    }

    fn peek_live(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries
            .get(key)
            .filter(|slot| slot.entry.is_live(SystemTime::now()))
            .map(|slot| slot.entry.clone())
    }

    fn insert(&self, entry: Arc<CacheEntry>) {
        if self.config.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&entry.key) {
            self.make_room();
        }
        let slot = Slot {
            entry: entry.clone(),
            last_access: AtomicU64::new(self.tick()),
        };
        self.entries.insert(entry.key.clone(), slot);
    }

    /// Drops expired entries, then least recently used ones, until a new
    /// entry fits.
    fn make_room(&self) {
        if self.entries.len() < self.config.capacity {
            return;
        }

        let now = SystemTime::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.entry.is_live(now));
        let mut evicted = before.saturating_sub(self.entries.len()) as u64;

        while self.entries.len() >= self.config.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|slot| slot.last_access.load(Ordering::Relaxed))
                .map(|slot| slot.key().clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "Evicting least recently used preview");
                    self.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

/// Clears the in-flight marker when the cycle task ends, panics included.
struct InFlightGuard {
    in_flight: Arc<DashMap<String, InFlight>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Cache key for a URL: lower-cased scheme and host, no default port, no
/// fragment. The query string is kept.
///
/// `Url` already lower-cases scheme and host and drops default ports while
/// parsing; this strips what it keeps.
pub fn normalize_key(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if let Some(host) = normalized.host_str() {
        let trimmed = host.trim_end_matches('.').to_ascii_lowercase();
        if trimmed != host {
            let _ = normalized.set_host(Some(&trimmed));
        }
    }
    normalized.to_string()
}
