//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

/// Source of the current time for TTL checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
  now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: std::sync::Mutex::new(start),
    }
  }

  pub fn advance(&self, by: chrono::Duration) {
    let mut now = self.now.lock().unwrap();
    *now += by;
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result from canned mock-mode data.
  pub fn mocked(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Mock,
      cached_at: None,
    }
  }
}

/// Indicates where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from a live cache entry
  Cache,
  /// Mock mode, no network involved
  Mock,
}
