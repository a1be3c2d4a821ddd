use super::{CacheEntity, CacheKey, KeyValueCache, Versioned, next_version};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct MemoryCache<E> {
    entries: Mutex<HashMap<CacheKey, Versioned<E>>>,
}

impl<E> MemoryCache<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl<E> Default for MemoryCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: CacheEntity> KeyValueCache<E> for MemoryCache<E> {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn retrieve(&self, key: &CacheKey) -> Result<Option<Versioned<E>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn cache(&self, entity: E) -> Result<()> {
        let key = entity.key();
        let mut entries = self.entries.lock().await;
        let version = entries.get(&key).map_or(1, |v| v.version + 1);
        let _ = entries.insert(key, Versioned::new(entity, version));
        Ok(())
    }

    async fn cache_atomic(&self, expected_version: Option<u64>, entity: E) -> Result<bool> {
        let key = entity.key();
        let mut entries = self.entries.lock().await;
        let Some(version) = next_version(entries.get(&key).map(|v| v.version), expected_version) else {
            return Ok(false);
        };
        let _ = entries.insert(key, Versioned::new(entity, version));
        Ok(true)
    }
}
