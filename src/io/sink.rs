use super::path_utils::sanitize_path_component;
use crate::Result;
use crate::model::RecordContext;
use async_trait::async_trait;
use core::fmt::Debug;
use ohno::IntoAppError;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const LOG_TARGET: &str = "      sink";

/// Destination for collected records
#[async_trait]
pub trait RecordSink: Send + Sync + Debug {
    /// Announce that records of the given type are about to be written
    async fn new_output(&self, record_type: &str) -> Result<()>;

    async fn write_record(&self, record: &Value, context: &RecordContext) -> Result<()>;

    fn set_output_path_prefix(&self, prefix: &str);

    /// Where the records written so far can be found
    fn output_locator(&self) -> String;

    /// Flush everything and return the output locator
    async fn finalize(&self) -> Result<String>;
}

#[derive(Debug, Default)]
struct JsonLinesState {
    prefix: String,
    writers: HashMap<String, BufWriter<File>>,
}

/// Writes one `<record type>.jsonl` file per record type under `<root>/<prefix>/`.
///
/// Each line is `{"RecordType": ..., "Metadata": {...}, "Record": {...}}`.
#[derive(Debug)]
pub struct JsonLinesSink {
    root: PathBuf,
    state: Mutex<JsonLinesState>,
}

impl JsonLinesSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(JsonLinesState::default()),
        }
    }

    fn output_dir(root: &Path, prefix: &str) -> PathBuf {
        prefix
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(root.to_path_buf(), |dir, component| dir.join(sanitize_path_component(component)))
    }

    fn open_writer(dir: &Path, record_type: &str) -> Result<BufWriter<File>> {
        fs::create_dir_all(dir).into_app_err_with(|| format!("unable to create output directory '{}'", dir.display()))?;
        let path = dir.join(format!("{}.jsonl", sanitize_path_component(record_type)));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .into_app_err_with(|| format!("unable to open output file '{}'", path.display()))?;
        log::debug!(target: LOG_TARGET, "Writing '{record_type}' records to '{}'", path.display());
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn new_output(&self, record_type: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.writers.contains_key(record_type) {
            let writer = Self::open_writer(&Self::output_dir(&self.root, &state.prefix), record_type)?;
            let _ = state.writers.insert(record_type.to_string(), writer);
        }
        Ok(())
    }

    async fn write_record(&self, record: &Value, context: &RecordContext) -> Result<()> {
        let line = json!({
            "RecordType": context.record_type,
            "Metadata": context.metadata,
            "Record": record,
        });

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = Self::output_dir(&self.root, &state.prefix);
        let writer = match state.writers.entry(context.record_type.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(Self::open_writer(&dir, &context.record_type)?),
        };

        serde_json::to_writer(&mut *writer, &line).into_app_err("unable to serialize record")?;
        writer.write_all(b"\n").into_app_err("unable to write record")?;
        Ok(())
    }

    fn set_output_path_prefix(&self, prefix: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.prefix != prefix {
            for writer in state.writers.values_mut() {
                if let Err(e) = writer.flush() {
                    log::warn!(target: LOG_TARGET, "Could not flush output: {e:#}");
                }
            }
            state.writers.clear();
            state.prefix = prefix.to_string();
        }
    }

    fn output_locator(&self) -> String {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::output_dir(&self.root, &state.prefix).display().to_string()
    }

    async fn finalize(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for writer in state.writers.values_mut() {
            writer.flush().into_app_err("unable to flush output")?;
        }
        state.writers.clear();
        Ok(Self::output_dir(&self.root, &state.prefix).display().to_string())
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    prefix: String,
    outputs: Vec<String>,
    records: Vec<(Value, RecordContext)>,
}

/// Keeps records in memory so tests can assert on them
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<(Value, RecordContext)> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).records.clone()
    }

    #[must_use]
    pub fn records_of_type(&self, record_type: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|(_, c)| c.record_type == record_type)
            .map(|(r, _)| r)
            .collect()
    }

    /// Record types announced through `new_output`, in order
    #[must_use]
    pub fn outputs(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).outputs.clone()
    }

    #[must_use]
    pub fn prefix(&self) -> String {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).prefix.clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn new_output(&self, record_type: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outputs
            .push(record_type.to_string());
        Ok(())
    }

    async fn write_record(&self, record: &Value, context: &RecordContext) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .push((record.clone(), context.clone()));
        Ok(())
    }

    fn set_output_path_prefix(&self, prefix: &str) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).prefix = prefix.to_string();
    }

    fn output_locator(&self) -> String {
        format!("memory://{}", self.prefix())
    }

    async fn finalize(&self) -> Result<String> {
        Ok(self.output_locator())
    }
}
