use super::path_utils::sanitize_path_component;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use core::fmt::Debug;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use ohno::IntoAppError;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

const LOG_TARGET: &str = "     queue";

/// Hand-off point for follow-up work discovered during collection
#[async_trait]
pub trait Queue: Send + Sync + Debug {
    async fn put_json(&self, item: &Value, visibility_delay: Option<Duration>) -> Result<()>;
}

/// Serialize `item` and put it on the queue
pub async fn put_object<T: Serialize + Sync>(queue: &dyn Queue, item: &T, visibility_delay: Option<Duration>) -> Result<()> {
    let value = serde_json::to_value(item).into_app_err("serializing queue item")?;
    queue.put_json(&value, visibility_delay).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedItem {
    pub payload: Value,
    pub visibility_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<Vec<QueuedItem>>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn items(&self) -> Vec<QueuedItem> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn payloads(&self) -> Vec<Value> {
        self.items().into_iter().map(|i| i.payload).collect()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn put_json(&self, item: &Value, visibility_delay: Option<Duration>) -> Result<()> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).push(QueuedItem {
            payload: item.clone(),
            visibility_delay,
        });
        Ok(())
    }
}

/// Stores each item as its own JSON file in a directory.
///
/// File names sort in enqueue order. A visibility delay is recorded in the file name as the
/// earliest time (epoch milliseconds) the item should be picked up.
#[derive(Debug)]
pub struct DirectoryQueue {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl DirectoryQueue {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            dir: root.into().join(sanitize_path_component(name)),
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl Queue for DirectoryQueue {
    async fn put_json(&self, item: &Value, visibility_delay: Option<Duration>) -> Result<()> {
        fs::create_dir_all(&self.dir).into_app_err_with(|| format!("unable to create queue directory '{}'", self.dir.display()))?;

        let now = Utc::now().timestamp_millis();
        let delay_ms = visibility_delay.map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        let visible_at = now.saturating_add(delay_ms);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let path = self.dir.join(format!("{now:016}-{sequence:06}-{visible_at}.json"));
        let text = serde_json::to_string(item).into_app_err("serializing queue item")?;
        fs::write(&path, text).into_app_err_with(|| format!("unable to write queue item '{}'", path.display()))?;

        log::debug!(target: LOG_TARGET, "Queued item at '{}'", path.display());
        Ok(())
    }
}
