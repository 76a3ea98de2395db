//! # Performance Statistics
//!
//! [`PerfStatsCollector`] accumulates named timing events for one test method
//! at a time. The runner resets it before each method, enables it only when
//! at least one [`PerfStatsReporter`] is registered, and hands the metrics to
//! every reporter after the method finished.
//!
//! Events are aggregated per (name, success) pair into a [`Metric`] holding
//! the count and the total, minimum and maximum duration.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::BoxError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub count: u64,
    pub elapsed_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub success: bool,
}

impl Metric {
    fn new(name: &str, success: bool) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            elapsed_ns: 0,
            min_ns: 0,
            max_ns: 0,
            success,
        }
    }

    fn record(&mut self, elapsed_ns: u64) {
        if self.count == 0 || elapsed_ns < self.min_ns {
            self.min_ns = elapsed_ns;
        }
        self.max_ns = self.max_ns.max(elapsed_ns);
        self.elapsed_ns = self.elapsed_ns.saturating_add(elapsed_ns);
        self.count += 1;
    }
}

/// Free-form metadata attached to one report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, serde_json::Value>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Default)]
struct CollectorState {
    enabled: bool,
    metrics: HashMap<(String, bool), Metric>,
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Shared handle to one collector. Clones observe the same state, so events
/// started on the caller's thread can finish on a sandbox thread.
#[derive(Debug, Clone)]
pub struct PerfStatsCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl Default for PerfStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfStatsCollector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectorState {
                enabled: true,
                ..CollectorState::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Starts timing `name`. Nothing is recorded until the event finishes.
    pub fn start_event(&self, name: &str) -> Event {
        Event {
            collector: self.clone(),
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Times `f` as event `name`; an `Err` result records an unsuccessful
    /// event.
    pub fn measure<T, E>(&self, name: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let event = self.start_event(name);
        let result = f();
        event.finished_with(result.is_ok());
        result
    }

    /// Counts an occurrence of `name` without timing it.
    pub fn increment_count(&self, name: &str) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        state
            .metrics
            .entry((name.to_string(), true))
            .or_insert_with(|| Metric::new(name, true))
            .record(0);
    }

    pub fn put_metadata(&self, key: &str, value: serde_json::Value) {
        let mut state = self.lock();
        if state.enabled {
            state.metadata.insert(key.to_string(), value);
        }
    }

    pub fn metadata(&self) -> Metadata {
        Metadata(self.lock().metadata.clone())
    }

    /// Metrics sorted by name, successful ones first.
    pub fn metrics(&self) -> Vec<Metric> {
        let mut metrics: Vec<_> = self.lock().metrics.values().cloned().collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name).then(b.success.cmp(&a.success)));
        metrics
    }

    /// Clears events and metadata. The enabled flag is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.metrics.clear();
        state.metadata.clear();
    }

    fn record(&self, name: &str, success: bool, elapsed_ns: u64) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        state
            .metrics
            .entry((name.to_string(), success))
            .or_insert_with(|| Metric::new(name, success))
            .record(elapsed_ns);
    }
}

/// A running timing interval.
#[must_use = "an event records nothing until it is finished"]
#[derive(Debug)]
pub struct Event {
    collector: PerfStatsCollector,
    name: String,
    started: Instant,
}

impl Event {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn finished(self) {
        self.finished_with(true);
    }

    pub fn finished_with(self, success: bool) {
        let elapsed_ns = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.collector.record(&self.name, success, elapsed_ns);
    }
}

// ============================================================================
// REPORTERS
// ============================================================================

/// Receives the metrics of one method execution. Failures are logged by the
/// runner and never affect the test outcome.
pub trait PerfStatsReporter: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn report(&self, metadata: &Metadata, metrics: &[Metric]) -> Result<(), BoxError>;
}

/// Writes each report through the `log` facade at info level.
#[derive(Debug, Default)]
pub struct LogReporter;

impl PerfStatsReporter for LogReporter {
    fn name(&self) -> &str {
        "log"
    }

    fn report(&self, metadata: &Metadata, metrics: &[Metric]) -> Result<(), BoxError> {
        for metric in metrics {
            log::info!(
                "perf {} count={} total={}ns min={}ns max={}ns success={} metadata={}",
                metric.name,
                metric.count,
                metric.elapsed_ns,
                metric.min_ns,
                metric.max_ns,
                metric.success,
                serde_json::to_string(metadata)?,
            );
        }
        Ok(())
    }
}

/// Writes one JSON object per report to a writer.
pub struct JsonLinesReporter<W: Write + Send> {
    out: Mutex<W>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    metadata: &'a Metadata,
    metrics: &'a [Metric],
}

impl<W: Write + Send> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> PerfStatsReporter for JsonLinesReporter<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn report(&self, metadata: &Metadata, metrics: &[Metric]) -> Result<(), BoxError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *out, &JsonReport { metadata, metrics })?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_aggregate_by_name_and_success() {
        let collector = PerfStatsCollector::new();
        collector.start_event("inflate").finished();
        collector.start_event("inflate").finished();
        collector.start_event("inflate").finished_with(false);
        let metrics = collector.metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].count, 2);
        assert!(metrics[0].success);
        assert_eq!(metrics[1].count, 1);
        assert!(metrics[0].min_ns <= metrics[0].max_ns);
    }

    #[test]
    fn disabled_collector_records_nothing() {
        let collector = PerfStatsCollector::new();
        collector.set_enabled(false);
        collector.start_event("initialization").finished();
        collector.increment_count("calls");
        collector.put_metadata("sdk", serde_json::json!(33));
        assert!(collector.metrics().is_empty());
        assert!(collector.metadata().is_empty());
    }

    #[test]
    fn measure_marks_failures() {
        let collector = PerfStatsCollector::new();
        let result: Result<(), &str> = collector.measure("load", || Err("nope"));
        assert!(result.is_err());
        assert_eq!(collector.metrics()[0].success, false);
    }

    #[test]
    fn reset_clears_metrics_and_metadata() {
        let collector = PerfStatsCollector::new();
        collector.increment_count("calls");
        collector.put_metadata("sdk", serde_json::json!(33));
        collector.reset();
        assert!(collector.metrics().is_empty());
        assert!(collector.metadata().is_empty());
        assert!(collector.is_enabled());
    }

    #[test]
    fn json_lines_reporter_writes_one_line_per_report() {
        let reporter = JsonLinesReporter::new(Vec::new());
        let collector = PerfStatsCollector::new();
        collector.increment_count("calls");
        collector.put_metadata("class", serde_json::json!("app.ButtonTest"));
        reporter
            .report(&collector.metadata(), &collector.metrics())
            .unwrap();
        reporter
            .report(&collector.metadata(), &collector.metrics())
            .unwrap();
        let written = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["metadata"]["class"], "app.ButtonTest");
        assert_eq!(parsed["metrics"][0]["name"], "calls");
    }
}
