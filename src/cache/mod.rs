//! Versioned key-value caches.
//!
//! Every cache stores [`Versioned`] entries: the entity plus a version token that increases on
//! each write. [`KeyValueCache::cache_atomic`] only writes when the caller's expected version is
//! still current, which lets concurrent writers detect conflicts and re-run their
//! read-modify-write cycle.
//!
//! Implementations: [`MemoryCache`] for tests and single-process runs, [`FileCache`] for state
//! that must survive restarts and be shared between processes, and [`NoopCache`] for flows that
//! deliberately skip caching.

mod bookkeeper;
mod entities;
mod file;
mod lock;
mod memory;
mod noop;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core::fmt::Debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use bookkeeper::EventsBookkeeper;
pub use entities::{
    ConditionalRequestEntry, EventStatsEntry, EventsTimelineEntry, OnboardingEntry, PointCollectorEntry, RateLimitEntry,
    RecordEntry, RepositoryItemEntry,
};
pub use file::FileCache;
pub use memory::MemoryCache;
pub use noop::NoopCache;

/// Two-part key, mirroring a partitioned table layout
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub partition: String,
    pub row: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(partition: impl Into<String>, row: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            row: row.into(),
        }
    }
}

/// A value that knows which table it lives in and which key it is stored under
pub trait CacheEntity: Serialize + DeserializeOwned + Clone + Send + Sync + Debug + 'static {
    const TABLE: &'static str;

    fn key(&self) -> CacheKey;
}

/// Upper bound on read-modify-write rounds lost to concurrent writers before giving up
pub(crate) const MAX_CONFLICT_ATTEMPTS: usize = 16;

/// A stored entity together with its version token and the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "E: CacheEntity")]
pub struct Versioned<E> {
    pub entity: E,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

impl<E> Versioned<E> {
    #[must_use]
    pub fn new(entity: E, version: u64) -> Self {
        Self {
            entity,
            version,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait KeyValueCache<E: CacheEntity>: Send + Sync + Debug {
    /// Prepare backing storage; safe to call repeatedly
    async fn initialize(&self) -> Result<()>;

    async fn retrieve(&self, key: &CacheKey) -> Result<Option<Versioned<E>>>;

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.retrieve(key).await?.is_some())
    }

    /// Insert or overwrite unconditionally
    async fn cache(&self, entity: E) -> Result<()>;

    /// Write `entity` only if the stored version still equals `expected_version`.
    ///
    /// `None` means "only if absent". Returns `false` on conflict.
    async fn cache_atomic(&self, expected_version: Option<u64>, entity: E) -> Result<bool>;
}

/// Decide whether a compare-and-swap may proceed and which version the new entry gets
pub(crate) fn next_version(stored: Option<u64>, expected: Option<u64>) -> Option<u64> {
    match (stored, expected) {
        (None, None) => Some(1),
        (Some(stored), Some(expected)) if stored == expected => Some(stored + 1),
        _ => None,
    }
}
