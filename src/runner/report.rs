//! Outcomes of a run and their console summary.

use std::io::{self, Write};
use std::time::Duration;

use termcolor::{Color, ColorSpec, WriteColor};

use crate::errors::{Result, SandboxError};
use crate::types::TypeName;

/// The result of one test method. `result` is the primary outcome; the
/// secondary failures come from teardown and reporting and never turn a
/// pass into a failure.
#[derive(Debug)]
pub struct MethodOutcome {
    pub class: TypeName,
    pub method: String,
    pub result: Result<()>,
    pub secondary: Vec<SandboxError>,
    pub elapsed: Duration,
}

impl MethodOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&SandboxError> {
        self.result.as_ref().err()
    }

    /// The primary outcome with secondary failures attached to a failure.
    pub fn into_result(self) -> Result<()> {
        self.result.map_err(|e| e.with_secondary(self.secondary))
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<MethodOutcome>,
    /// Class teardown failures at the end of the run.
    pub class_teardown_failures: Vec<SandboxError>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.class_teardown_failures.is_empty()
    }

    pub fn outcome(&self, class: &str, method: &str) -> Option<&MethodOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.class.as_str() == class && o.method == method)
    }

    /// Writes one line per method and one per class teardown failure, then
    /// the totals.
    pub fn print_summary(&self, out: &mut dyn WriteColor) -> io::Result<()> {
        for outcome in &self.outcomes {
            let (label, color) = match &outcome.result {
                Ok(()) => ("PASS", Color::Green),
                Err(e) if e.is_timeout() => ("TIME", Color::Yellow),
                Err(_) => ("FAIL", Color::Red),
            };
            out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
            write!(out, "{label}")?;
            out.reset()?;
            writeln!(
                out,
                " {}#{} ({} ms)",
                outcome.class,
                outcome.method,
                outcome.elapsed.as_millis()
            )?;
            if let Err(e) = &outcome.result {
                writeln!(out, "    {e}")?;
            }
            for secondary in &outcome.secondary {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
                write!(out, "    warning:")?;
                out.reset()?;
                writeln!(out, " {secondary}")?;
            }
        }
        for failure in &self.class_teardown_failures {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
            write!(out, "FAIL")?;
            out.reset()?;
            writeln!(out, " {failure}")?;
        }

        let color = if self.is_success() { Color::Green } else { Color::Red };
        out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
        writeln!(
            out,
            "{} passed, {} failed, {} class teardown failure(s)",
            self.passed(),
            self.failed(),
            self.class_teardown_failures.len()
        )?;
        out.reset()
    }
}
