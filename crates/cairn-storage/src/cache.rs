//! Process-local display cache for content items
//!
//! Entries slide forward on every hit and are dropped once their signal is
//! raised. A signal is a named generation counter: an entry remembers the
//! generation it was inserted under and is stale as soon as it moves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

/// Default sliding expiration of display entries
pub const DEFAULT_SLIDING_MINUTES: i64 = 30;

/// Cache key of a rendered content item
pub fn display_key(content_item_id: &str) -> String {
    format!("ContentItemDisplay_{}", content_item_id)
}

/// Signal name that evicts a rendered content item
pub fn signal_key(content_item_id: &str) -> String {
    format!("ContentItemDisplaySignal_{}", content_item_id)
}

/// Generation of a signal at the time a token was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeToken {
    name: String,
    generation: u64,
}

impl ChangeToken {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named invalidation signals
#[derive(Debug, Default)]
pub struct Signal {
    generations: RwLock<HashMap<String, u64>>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for the current generation of `name`
    pub fn token(&self, name: &str) -> ChangeToken {
        let generation = self
            .generations
            .read()
            .map(|g| g.get(name).copied().unwrap_or(0))
            .unwrap_or(0);
        ChangeToken {
            name: name.to_string(),
            generation,
        }
    }

    /// Raise `name`, invalidating every token taken before
    pub fn signal(&self, name: &str) {
        if let Ok(mut generations) = self.generations.write() {
            *generations.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    pub fn is_current(&self, token: &ChangeToken) -> bool {
        self.token(&token.name).generation == token.generation
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

struct CacheEntry<V> {
    value: V,
    token: ChangeToken,
    last_access: DateTime<Utc>,
}

/// Rendered content items keyed by content item id
pub struct DisplayCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    signal: Arc<Signal>,
    sliding: Duration,
    stats: CacheStats,
}

impl<V: Clone> DisplayCache<V> {
    pub fn new(signal: Arc<Signal>) -> Self {
        Self::with_sliding_expiration(signal, Duration::minutes(DEFAULT_SLIDING_MINUTES))
    }

    pub fn with_sliding_expiration(signal: Arc<Signal>, sliding: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            signal,
            sliding,
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, content_item_id: &str) -> Option<V> {
        self.get_at(content_item_id, Utc::now())
    }

    pub fn insert(&self, content_item_id: &str, value: V) {
        self.insert_at(content_item_id, value, Utc::now());
    }

    /// Raise the item's signal; the entry is dropped on its next lookup
    pub fn invalidate(&self, content_item_id: &str) {
        self.signal.signal(&signal_key(content_item_id));
    }

    pub(crate) fn get_at(&self, content_item_id: &str, now: DateTime<Utc>) -> Option<V> {
        let key = display_key(content_item_id);
        let mut entries = self.entries.write().ok()?;

        let live = match entries.get_mut(&key) {
            Some(entry) if now - entry.last_access <= self.sliding && self.signal.is_current(&entry.token) => {
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        };

        match live {
            Some(_) => self.stats.hits.fetch_add(1, Ordering::Relaxed),
            None => self.stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        live
    }

    pub(crate) fn insert_at(&self, content_item_id: &str, value: V, now: DateTime<Utc>) {
        let token = self.signal.token(&signal_key(content_item_id));
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                display_key(content_item_id),
                CacheEntry {
                    value,
                    token,
                    last_access: now,
                },
            );
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
