use super::lock::{TableLockGuard, lock_table};
use super::{CacheEntity, CacheKey, KeyValueCache, Versioned, next_version};
use crate::Result;
use crate::io::path_utils::sanitize_path_component;
use async_trait::async_trait;
use core::marker::PhantomData;
use ohno::IntoAppError;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "     cache";

/// One JSON document per key under `<root>/<table>/<partition>/<row>.json`.
///
/// Reads are lock-free since documents are replaced by rename. Writes hold an advisory lock on
/// the table so compare-and-swap is safe between processes sharing the directory.
#[derive(Debug)]
pub struct FileCache<E> {
    table_dir: PathBuf,
    _entity: PhantomData<fn() -> E>,
}

impl<E: CacheEntity> FileCache<E> {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            table_dir: root.as_ref().join(E::TABLE),
            _entity: PhantomData,
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.table_dir
            .join(sanitize_path_component(&key.partition))
            .join(format!("{}.json", sanitize_path_component(&key.row)))
    }

    async fn lock(&self) -> Result<TableLockGuard> {
        fs::create_dir_all(&self.table_dir)
            .into_app_err_with(|| format!("unable to create cache directory '{}'", self.table_dir.display()))?;
        lock_table(&self.table_dir).await
    }

    fn load(path: &Path) -> Result<Option<Versioned<E>>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).into_app_err_with(|| format!("unable to open cache file '{}'", path.display())),
        };

        let entry = serde_json::from_reader(BufReader::new(file))
            .into_app_err_with(|| format!("unable to parse cache file '{}'", path.display()))?;
        Ok(Some(entry))
    }

    fn store(path: &Path, entry: &Versioned<E>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).into_app_err_with(|| format!("unable to create directory '{}'", parent.display()))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let file = File::create(&temp_path).into_app_err_with(|| format!("unable to create cache file '{}'", temp_path.display()))?;
        let mut writer = BufWriter::new(file);

        #[cfg(debug_assertions)]
        let result = serde_json::to_writer_pretty(&mut writer, entry);
        #[cfg(not(debug_assertions))]
        let result = serde_json::to_writer(&mut writer, entry);

        result.into_app_err_with(|| format!("unable to write cache file '{}'", temp_path.display()))?;
        writer
            .flush()
            .into_app_err_with(|| format!("unable to flush cache file '{}'", temp_path.display()))?;
        drop(writer);

        fs::rename(&temp_path, path).into_app_err_with(|| format!("unable to replace cache file '{}'", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl<E: CacheEntity> KeyValueCache<E> for FileCache<E> {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.table_dir)
            .into_app_err_with(|| format!("unable to create cache directory '{}'", self.table_dir.display()))
    }

    async fn retrieve(&self, key: &CacheKey) -> Result<Option<Versioned<E>>> {
        let entry = Self::load(&self.entry_path(key))?;
        log::trace!(
            target: LOG_TARGET,
            "{} {}/{}: {}",
            E::TABLE,
            key.partition,
            key.row,
            if entry.is_some() { "hit" } else { "miss" }
        );
        Ok(entry)
    }

    async fn cache(&self, entity: E) -> Result<()> {
        let path = self.entry_path(&entity.key());
        let _guard = self.lock().await?;
        let version = Self::load(&path)?.map_or(1, |v| v.version + 1);
        Self::store(&path, &Versioned::new(entity, version))
    }

    async fn cache_atomic(&self, expected_version: Option<u64>, entity: E) -> Result<bool> {
        let path = self.entry_path(&entity.key());
        let _guard = self.lock().await?;
        let stored = Self::load(&path)?.map(|v| v.version);
        let Some(version) = next_version(stored, expected_version) else {
            log::debug!(target: LOG_TARGET, "Version conflict writing '{}'", path.display());
            return Ok(false);
        };
        Self::store(&path, &Versioned::new(entity, version))?;
        Ok(true)
    }
}
