use core::fmt::Debug;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

const LOG_TARGET: &str = " telemetry";

/// Best-effort structured diagnostics.
///
/// Methods return nothing: a telemetry backend that fails must never fail the flow reporting to it.
pub trait Telemetry: Send + Sync + Debug {
    fn track_event(&self, name: &str, properties: &[(&str, String)]);

    fn track_exception(&self, error: &str, properties: &[(&str, String)]);
}

/// Renders telemetry as `log` lines
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn track_event(&self, name: &str, properties: &[(&str, String)]) {
        log::info!(target: LOG_TARGET, "{name} {}", render(properties));
    }

    fn track_exception(&self, error: &str, properties: &[(&str, String)]) {
        log::warn!(target: LOG_TARGET, "{error} {}", render(properties));
    }
}

fn render(properties: &[(&str, String)]) -> String {
    let parts: Vec<_> = properties.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub name: String,
    pub exception: bool,
    pub properties: BTreeMap<String, String>,
}

impl TelemetryRecord {
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Keeps every call in memory so tests can assert on it
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemoryTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events (not exceptions) with the given name
    #[must_use]
    pub fn events_named(&self, name: &str) -> Vec<TelemetryRecord> {
        self.records()
            .into_iter()
            .filter(|r| !r.exception && r.name == name)
            .collect()
    }

    #[must_use]
    pub fn exceptions(&self) -> Vec<TelemetryRecord> {
        self.records().into_iter().filter(|r| r.exception).collect()
    }

    fn push(&self, name: &str, exception: bool, properties: &[(&str, String)]) {
        let record = TelemetryRecord {
            name: name.to_string(),
            exception,
            properties: properties.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
        };
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }
}

impl Telemetry for MemoryTelemetry {
    fn track_event(&self, name: &str, properties: &[(&str, String)]) {
        self.push(name, false, properties);
    }

    fn track_exception(&self, error: &str, properties: &[(&str, String)]) {
        self.push(error, true, properties);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_memory_telemetry_separates_events_and_exceptions() {
        let telemetry = MemoryTelemetry::new();
        telemetry.track_event("CapturedEvent", &[("EventId", "1".into())]);
        telemetry.track_exception("boom", &[("Fatal", "false".into())]);
        telemetry.track_event("CapturedEvent", &[("EventId", "2".into())]);

        let events = telemetry.events_named("CapturedEvent");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].property("EventId"), Some("2"));

        let exceptions = telemetry.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].name, "boom");
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&[("A", "1".into()), ("B", "x".into())]), "A=1 B=x");
        assert_eq!(render(&[]), "");
    }
}
