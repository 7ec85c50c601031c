//! In-memory query result cache.
//!
//! This module provides the memoization layer for the query protocol:
//! - Deterministic query keys built from sanitized query inputs
//! - A time-to-live checked lazily on read and swept on write
//! - A hard size bound with insertion-order eviction of a fixed fraction
//! - Prefix invalidation by query name after mutations

mod keys;
mod store;
mod traits;

pub use keys::QueryKey;
pub use store::{CacheEntry, QueryCache};
pub use traits::{CacheResult, CacheSource, Clock, SystemClock};

#[cfg(test)]
pub use traits::ManualClock;
