mod common;

use std::sync::Arc;

use common::*;
use shadowbox::perf::JsonLinesReporter;
use shadowbox::prelude::*;
use termcolor::NoColor;

fn passing_host() -> TypeRegistry {
    platform_types().with(
        TypeDef::builder("app.ReportedTest")
            .hook("m1", |_| Ok(()))
            .hook("m2", |_| Err(SandboxError::failure("expected 1, got 2")))
            .build(),
    )
}

fn reported_class() -> TestClass {
    TestClass::new("app.ReportedTest")
        .method(TestMethod::new("m1"))
        .method(TestMethod::new("m2"))
}

#[test]
fn failing_reporter_does_not_stop_later_reporters_or_fail_the_test() {
    init_logging();
    let recording = Arc::new(RecordingReporter::default());
    let runner = SandboxTestRunner::builder(passing_host())
        .base_table(base_table())
        .settings(EngineSettings::default())
        .reporter(Arc::new(FailingReporter))
        .reporter(Arc::new(PanickingReporter))
        .reporter(recording.clone())
        .build()
        .unwrap();
    let class = reported_class();

    let outcome = runner.run_method(&class, &class.methods[0]);

    assert!(outcome.passed());
    assert_eq!(recording.count(), 1);
    let reporters: Vec<_> = outcome
        .secondary
        .iter()
        .map(|e| match e {
            SandboxError::Reporter { reporter, .. } => reporter.as_str(),
            _ => "unexpected",
        })
        .collect();
    assert_eq!(reporters, vec!["failing", "panicking"]);
    assert!(outcome.secondary[0]
        .to_string()
        .contains("metrics backend unavailable"));
}

#[test]
fn every_method_is_reported_with_its_initialization_event() {
    let recording = Arc::new(RecordingReporter::default());
    let runner = SandboxTestRunner::builder(passing_host())
        .base_table(base_table())
        .settings(EngineSettings::default())
        .reporter(recording.clone())
        .build()
        .unwrap();

    let report = runner.run(&[reported_class()]);

    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 1);
    let reports = recording.reports.lock().unwrap();
    assert_eq!(reports.len(), 2);
    let (metadata, metrics) = &reports[1];
    assert_eq!(metadata.get("method").unwrap(), "m2");
    assert_eq!(metadata.get("class").unwrap(), "app.ReportedTest");
    let init = metrics.iter().find(|m| m.name == "initialization").unwrap();
    assert_eq!(init.count, 1);
    assert!(init.success);
    // Reset between methods.
    assert!(runner.perf().metrics().is_empty());
}

#[test]
fn collector_is_disabled_without_reporters() {
    let runner = runner(passing_host());
    let class = reported_class();

    runner.run_method(&class, &class.methods[0]);

    assert!(!runner.perf().is_enabled());
    assert!(runner.perf().metrics().is_empty());
}

#[test]
fn json_lines_reporter_writes_one_line_per_method() {
    let buffer = SharedBuffer::default();
    let runner = SandboxTestRunner::builder(passing_host())
        .base_table(base_table())
        .settings(EngineSettings::default())
        .reporter(Arc::new(JsonLinesReporter::new(buffer.clone())))
        .build()
        .unwrap();

    runner.run(&[reported_class()]);

    let written = buffer.contents();
    let lines: Vec<serde_json::Value> = written
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["metadata"]["method"], "m1");
    assert_eq!(lines[1]["metadata"]["method"], "m2");
}

#[test]
fn summary_reports_passes_failures_and_teardown_problems() {
    let host = passing_host().with(
        TypeDef::builder("app.LeakyTest")
            .hook("m", |_| Ok(()))
            .hook("tearDownClass", |_| Err(SandboxError::failure("temp dir left behind")))
            .build(),
    );
    let leaky = TestClass::new("app.LeakyTest")
        .after_class("tearDownClass")
        .method(TestMethod::new("m"));

    let report = runner(host).run(&[reported_class(), leaky]);
    let mut out = NoColor::new(Vec::new());
    report.print_summary(&mut out).unwrap();
    let text = String::from_utf8(out.into_inner()).unwrap();

    assert!(text.contains("PASS app.ReportedTest#m1"));
    assert!(text.contains("FAIL app.ReportedTest#m2"));
    assert!(text.contains("class teardown failed for app.LeakyTest"));
    assert!(text.contains("2 passed, 1 failed, 1 class teardown failure(s)"));
}
