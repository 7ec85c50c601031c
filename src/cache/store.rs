//! TTL-bounded query result store.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::sync::{Arc, Mutex, MutexGuard};

use super::keys::QueryKey;
use super::traits::{Clock, SystemClock};
use crate::config::CacheConfig;

/// A cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub key: QueryKey,
  pub data: T,
  pub inserted_at: DateTime<Utc>,
}

/// In-memory query cache shared between clones.
///
/// Entries are kept in insertion order. Reads never change that order, so
/// the eviction pass on a full cache drops the entries written longest ago,
/// not the ones read least recently.
pub struct QueryCache<T> {
  entries: Arc<Mutex<LruCache<QueryKey, CacheEntry<T>>>>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
  max_entries: usize,
  evict_fraction: f64,
}

impl<T: Clone> QueryCache<T> {
  pub fn new(config: &CacheConfig) -> Self {
    Self::with_clock(config, Arc::new(SystemClock))
  }

  pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Arc::new(Mutex::new(LruCache::unbounded())),
      clock,
      ttl: Duration::seconds(config.ttl_secs as i64),
      max_entries: config.max_entries.max(1),
      evict_fraction: config.evict_fraction.clamp(0.0, 1.0),
    }
  }

  fn lock(&self) -> MutexGuard<'_, LruCache<QueryKey, CacheEntry<T>>> {
    // Every mutation leaves the map consistent, so a poisoned lock is still usable
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn is_expired(&self, entry: &CacheEntry<T>, now: DateTime<Utc>) -> bool {
    now - entry.inserted_at > self.ttl
  }

  /// Look up a live entry. An expired entry is removed and reported as a miss.
  pub fn get(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
    let now = self.clock.now();
    let mut entries = self.lock();

    let expired = match entries.peek(key) {
      Some(entry) if !self.is_expired(entry, now) => return Some(entry.clone()),
      Some(_) => true,
      None => false,
    };

    if expired {
      entries.pop(key);
      tracing::debug!(key = %key, "cache entry expired");
    }
    None
  }

  /// Insert or replace an entry.
  pub fn set(&self, key: QueryKey, data: T) {
    let now = self.clock.now();
    let mut entries = self.lock();

    let expired: Vec<QueryKey> = entries
      .iter()
      .filter(|(_, entry)| self.is_expired(entry, now))
      .map(|(key, _)| key.clone())
      .collect();
    for stale in &expired {
      entries.pop(stale);
    }

    if !entries.contains(&key) && entries.len() >= self.max_entries {
      let target = ((self.max_entries as f64) * self.evict_fraction).ceil() as usize;
      let target = target.max(1);
      let mut evicted = 0;
      while evicted < target && entries.pop_lru().is_some() {
        evicted += 1;
      }
      tracing::debug!(
        evicted,
        expired = expired.len(),
        remaining = entries.len(),
        "cache full, evicted oldest entries"
      );
    }

    entries.push(
      key.clone(),
      CacheEntry {
        key,
        data,
        inserted_at: now,
      },
    );
  }

  /// Remove every entry whose key starts with `prefix`. Returns how many were removed.
  pub fn invalidate(&self, prefix: &str) -> usize {
    let mut entries = self.lock();
    let doomed: Vec<QueryKey> = entries
      .iter()
      .filter(|(key, _)| key.starts_with(prefix))
      .map(|(key, _)| key.clone())
      .collect();
    for key in &doomed {
      entries.pop(key);
    }
    if !doomed.is_empty() {
      tracing::debug!(prefix, removed = doomed.len(), "cache invalidated");
    }
    doomed.len()
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T> Clone for QueryCache<T> {
  fn clone(&self) -> Self {
    Self {
      entries: Arc::clone(&self.entries),
      clock: Arc::clone(&self.clock),
      ttl: self.ttl,
      max_entries: self.max_entries,
      evict_fraction: self.evict_fraction,
    }
  }
}
