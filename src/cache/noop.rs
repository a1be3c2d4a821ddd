use super::{CacheEntity, CacheKey, KeyValueCache, Versioned};
use crate::Result;
use async_trait::async_trait;
use core::marker::PhantomData;

/// Remembers nothing: lookups always miss and writes always succeed
#[derive(Debug)]
pub struct NoopCache<E> {
    _entity: PhantomData<fn() -> E>,
}

impl<E> NoopCache<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self { _entity: PhantomData }
    }
}

impl<E> Default for NoopCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: CacheEntity> KeyValueCache<E> for NoopCache<E> {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn retrieve(&self, _key: &CacheKey) -> Result<Option<Versioned<E>>> {
        Ok(None)
    }

    async fn cache(&self, _entity: E) -> Result<()> {
        Ok(())
    }

    async fn cache_atomic(&self, _expected_version: Option<u64>, _entity: E) -> Result<bool> {
        Ok(true)
    }
}
