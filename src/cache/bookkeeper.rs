use super::{EventStatsEntry, KeyValueCache, MAX_CONFLICT_ATTEMPTS};
use crate::Result;
use crate::io::{Queue, Telemetry, put_object};
use crate::model::Repository;
use ohno::bail;
use std::sync::Arc;

const LOG_TARGET: &str = "bookkeeper";

/// Counts webhook events per repository and signals downstream once enough have accumulated.
///
/// Every failure here is reported through telemetry and swallowed: bookkeeping never fails the
/// webhook it is counting.
#[derive(Debug, Clone)]
pub struct EventsBookkeeper {
    cache: Arc<dyn KeyValueCache<EventStatsEntry>>,
    queue: Arc<dyn Queue>,
    telemetry: Arc<dyn Telemetry>,
}

impl EventsBookkeeper {
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueCache<EventStatsEntry>>, queue: Arc<dyn Queue>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self { cache, queue, telemetry }
    }

    /// Add one to the repository's count and return the new value, or `None` if bookkeeping failed
    pub async fn increment_count(&self, repository: &Repository) -> Option<u32> {
        match self.try_increment(repository).await {
            Ok(count) => Some(count),
            Err(e) => {
                self.report("IncrementCount", repository, &e);
                None
            }
        }
    }

    pub async fn reset_count(&self, repository: &Repository) {
        if let Err(e) = self.cache.cache(EventStatsEntry::new(repository.clone(), 0)).await {
            self.report("ResetCount", repository, &e);
        }
    }

    /// Enqueue the repository on the event-stats queue
    pub async fn signal_count(&self, repository: &Repository) {
        if let Err(e) = put_object(self.queue.as_ref(), repository, None).await {
            self.report("SignalCount", repository, &e);
        }
    }

    async fn try_increment(&self, repository: &Repository) -> Result<u32> {
        let key = EventStatsEntry::key_for(repository);

        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            let current = self.cache.retrieve(&key).await?;
            let (count, version) = current.map_or((0, None), |v| (v.entity.event_count, Some(v.version)));
            let next = count.saturating_add(1);

            if self
                .cache
                .cache_atomic(version, EventStatsEntry::new(repository.clone(), next))
                .await?
            {
                return Ok(next);
            }

            log::debug!(target: LOG_TARGET, "Event count for {repository} changed concurrently (attempt {attempt})");
        }

        bail!("event count for {repository} kept changing concurrently after {MAX_CONFLICT_ATTEMPTS} attempts")
    }

    fn report(&self, operation: &str, repository: &Repository, error: &ohno::AppError) {
        log::warn!(target: LOG_TARGET, "Bookkeeping failed for {repository}: {error:#}");
        self.telemetry.track_event(
            "BookkeepingError",
            &[
                ("Operation", operation.to_string()),
                ("OrganizationId", repository.organization_id().to_string()),
                ("RepositoryId", repository.repository_id().to_string()),
                ("Error", error.to_string()),
            ],
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, MemoryCache, Versioned};
    use crate::io::{MemoryQueue, MemoryTelemetry};
    use async_trait::async_trait;

    fn repo() -> Repository {
        Repository::new(1, "contoso", 2, "widgets")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let cache = Arc::new(MemoryCache::<EventStatsEntry>::new());
        let bookkeeper = Arc::new(EventsBookkeeper::new(
            Arc::clone(&cache) as Arc<dyn KeyValueCache<EventStatsEntry>>,
            Arc::new(MemoryQueue::new()),
            Arc::new(MemoryTelemetry::new()),
        ));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let bookkeeper = Arc::clone(&bookkeeper);
                tokio::spawn(async move { bookkeeper.increment_count(&repo()).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }

        let stored = cache.retrieve(&EventStatsEntry::key_for(&repo())).await.unwrap().unwrap();
        assert_eq!(stored.entity.event_count, 10);
    }

    #[tokio::test]
    async fn test_reset_and_signal() {
        let cache = Arc::new(MemoryCache::<EventStatsEntry>::new());
        let queue = Arc::new(MemoryQueue::new());
        let bookkeeper = EventsBookkeeper::new(
            Arc::clone(&cache) as Arc<dyn KeyValueCache<EventStatsEntry>>,
            Arc::clone(&queue) as Arc<dyn Queue>,
            Arc::new(MemoryTelemetry::new()),
        );

        assert_eq!(bookkeeper.increment_count(&repo()).await, Some(1));
        assert_eq!(bookkeeper.increment_count(&repo()).await, Some(2));
        bookkeeper.signal_count(&repo()).await;
        bookkeeper.reset_count(&repo()).await;
        assert_eq!(bookkeeper.increment_count(&repo()).await, Some(1));

        let payloads = queue.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["RepositoryName"], "widgets");
    }

    /// Always reports a conflict
    #[derive(Debug)]
    struct ContendedCache;

    #[async_trait]
    impl KeyValueCache<EventStatsEntry> for ContendedCache {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn retrieve(&self, _key: &CacheKey) -> Result<Option<Versioned<EventStatsEntry>>> {
            Ok(None)
        }

        async fn cache(&self, _entity: EventStatsEntry) -> Result<()> {
            Ok(())
        }

        async fn cache_atomic(&self, _expected_version: Option<u64>, _entity: EventStatsEntry) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported_not_fatal() {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let bookkeeper = EventsBookkeeper::new(
            Arc::new(ContendedCache),
            Arc::new(MemoryQueue::new()),
            Arc::clone(&telemetry) as Arc<dyn Telemetry>,
        );

        assert_eq!(bookkeeper.increment_count(&repo()).await, None);

        let errors = telemetry.events_named("BookkeepingError");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].property("Operation"), Some("IncrementCount"));
    }
}
