use crate::Result;
use fs4::fs_std::FileExt;
use ohno::IntoAppError;
use std::fs::{File, OpenOptions};
use std::path::Path;

const LOG_TARGET: &str = "     cache";

/// Releases the table lock when dropped
#[derive(Debug)]
pub struct TableLockGuard(File);

impl Drop for TableLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            log::warn!(target: LOG_TARGET, "Could not unlock cache table: {e:#}");
        }
    }
}

/// Take the advisory lock serializing writers of one cache table, across tasks and processes
pub async fn lock_table(table_dir: &Path) -> Result<TableLockGuard> {
    let lock_path = table_dir.join("table.lock");

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .into_app_err_with(|| format!("opening cache lock file at '{}'", lock_path.display()))?;

    // may block for as long as another writer holds the table
    let file = tokio::task::spawn_blocking(move || {
        file.lock_exclusive()
            .into_app_err_with(|| format!("acquiring exclusive lock on cache table at '{}'", lock_path.display()))?;
        log::trace!(target: LOG_TARGET, "Acquired table lock at '{}'", lock_path.display());
        Ok::<_, ohno::AppError>(file)
    })
    .await
    .into_app_err("lock task panicked")??;

    Ok(TableLockGuard(file))
}
