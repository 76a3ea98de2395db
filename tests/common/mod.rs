//! Shared fixtures for the integration tests: a small simulated platform,
//! its shadows, and helpers to record what test code observed.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use shadowbox::perf::{Metadata, Metric, PerfStatsReporter};
use shadowbox::prelude::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// JOURNAL
// ============================================================================

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// A hook body that appends `entry` to the journal.
pub fn record(
    journal: &Journal,
    entry: &str,
) -> impl Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static {
    let journal = journal.clone();
    let entry = entry.to_string();
    move |_| {
        journal.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

// ============================================================================
// SIMULATED PLATFORM
// ============================================================================

/// Platform types, their shadows, and a few infrastructure types under
/// `core.`.
pub fn platform_types() -> TypeRegistry {
    TypeRegistry::new()
        .with(
            TypeDef::builder("platform.os.Clock")
                .method("now", 0, |_| Ok(Value::Int(1_000)))
                .build(),
        )
        .with(
            TypeDef::builder("shadows.ShadowClock")
                .substitutes("platform.os.Clock")
                .method("now", 0, |_| Ok(Value::Int(42)))
                .build(),
        )
        .with(
            TypeDef::builder("platform.io.Foo")
                .method("name", 0, |_| Ok(Value::from("real foo")))
                .build(),
        )
        .with(
            TypeDef::builder("shadows.ShadowFoo")
                .substitutes("platform.io.Foo")
                .method("name", 0, |_| Ok(Value::from("shadow foo")))
                .build(),
        )
        .with(
            TypeDef::builder("platform.io.Bar")
                .method("name", 0, |_| Ok(Value::from("real bar")))
                .build(),
        )
        .with(
            TypeDef::builder("shadows.ShadowBar")
                .substitutes("platform.io.Bar")
                .method("name", 0, |_| Ok(Value::from("shadow bar")))
                .build(),
        )
        .with(counter("core.Counter"))
        .with(counter("app.Counter"))
        .with(
            TypeDef::builder("core.Special")
                .method("kind", 0, |_| Ok(Value::from("real special")))
                .build(),
        )
        .with(
            TypeDef::builder("shadows.ShadowSpecial")
                .substitutes("core.Special")
                .method("kind", 0, |_| Ok(Value::from("shadow special")))
                .build(),
        )
        .with(TypeDef::builder("core.Other").build())
}

/// A type whose `bump` increments a static field and returns the new value.
pub fn counter(name: &str) -> TypeDef {
    TypeDef::builder(name)
        .method("bump", 0, |inv| {
            let next = inv.get_static("count").as_int().unwrap_or(0) + 1;
            inv.set_static("count", next);
            Ok(Value::Int(next))
        })
        .build()
}

/// The base table every runner in the tests starts from.
pub fn base_table() -> Arc<SubstitutionTable> {
    Arc::new(
        SubstitutionTable::empty()
            .builder()
            .map("platform.os.Clock", "shadows.ShadowClock")
            .build(),
    )
}

/// A runner over `host` that never touches process-wide state.
pub fn runner(host: TypeRegistry) -> SandboxTestRunner {
    init_logging();
    SandboxTestRunner::builder(host)
        .base_table(base_table())
        .settings(EngineSettings::default())
        .build()
        .expect("runner should build")
}

// ============================================================================
// REPORTERS
// ============================================================================

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(Metadata, Vec<Metric>)>>,
}

impl RecordingReporter {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl PerfStatsReporter for RecordingReporter {
    fn name(&self) -> &str {
        "recording"
    }

    fn report(&self, metadata: &Metadata, metrics: &[Metric]) -> Result<(), shadowbox::errors::BoxError> {
        self.reports
            .lock()
            .unwrap()
            .push((metadata.clone(), metrics.to_vec()));
        Ok(())
    }
}

pub struct FailingReporter;

impl PerfStatsReporter for FailingReporter {
    fn name(&self) -> &str {
        "failing"
    }

    fn report(&self, _: &Metadata, _: &[Metric]) -> Result<(), shadowbox::errors::BoxError> {
        Err("metrics backend unavailable".into())
    }
}

pub struct PanickingReporter;

impl PerfStatsReporter for PanickingReporter {
    fn name(&self) -> &str {
        "panicking"
    }

    fn report(&self, _: &Metadata, _: &[Metric]) -> Result<(), shadowbox::errors::BoxError> {
        panic!("reporter exploded")
    }
}

/// A writer whose bytes stay readable after it has been handed away.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
