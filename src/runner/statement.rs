//! The per-method statement: before hooks, the body under its time limit,
//! then after hooks.
//!
//! Everything here runs on the sandbox thread. A failing before hook skips
//! the body, but after hooks always run. After-hook failures never replace
//! the primary outcome; they come back as secondary failures.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::domain::{Deadline, Domain, Resolved};
use crate::errors::{Result, SandboxError};

/// Runs `f`, turning a panic into a failure.
pub(crate) fn guarded(f: impl FnOnce() -> Result<()>) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(SandboxError::from_panic(payload)))
}

/// Calls a zero-argument hook on `target`.
pub(crate) fn invoke_hook(domain: &Domain, target: &Resolved, hook: &str) -> Result<()> {
    guarded(|| domain.invoke(target, hook, &[]).map(|_| ()))
}

/// Outcome of one evaluated statement.
#[derive(Debug)]
pub(crate) struct Evaluated {
    pub result: Result<()>,
    pub secondary: Vec<SandboxError>,
}

pub(crate) struct MethodStatement<'a> {
    pub domain: &'a Domain,
    pub instance: &'a Resolved,
    pub before: &'a [String],
    pub body: &'a str,
    pub after: &'a [String],
    pub timeout: Option<Duration>,
}

impl MethodStatement<'_> {
    pub fn evaluate(&self) -> Evaluated {
        let result = self.run_befores().and_then(|()| self.run_body());
        let secondary = self.run_afters();
        Evaluated { result, secondary }
    }

    fn run_befores(&self) -> Result<()> {
        for hook in self.before {
            invoke_hook(self.domain, self.instance, hook)?;
        }
        Ok(())
    }

    fn run_afters(&self) -> Vec<SandboxError> {
        let mut failures = Vec::new();
        for hook in self.after {
            if let Err(e) = invoke_hook(self.domain, self.instance, hook) {
                log::warn!("after hook {}#{} failed: {}", self.instance.name(), hook, e);
                failures.push(e);
            }
        }
        failures
    }

    /// Runs the body with the deadline installed in the domain. Calls made
    /// past the deadline fail, and a body that returns late is failed even
    /// if it never made one.
    fn run_body(&self) -> Result<()> {
        let Some(timeout) = self.timeout else {
            return invoke_hook(self.domain, self.instance, self.body);
        };
        let deadline = Deadline::new(timeout);
        let result = {
            let _guard = self.domain.install_deadline(deadline);
            invoke_hook(self.domain, self.instance, self.body)
        };
        let elapsed = deadline.elapsed();
        if elapsed <= timeout {
            return result;
        }
        let expired = SandboxError::Timeout { timeout, elapsed };
        match result {
            Err(e) if !e.is_timeout() => Err(expired.with_secondary(vec![e])),
            _ => Err(expired),
        }
    }
}
