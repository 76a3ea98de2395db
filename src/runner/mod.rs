//! # Sandboxed Test Runner
//!
//! [`SandboxTestRunner`] executes test methods, each in a fresh [`Sandbox`].
//!
//! ## Per method
//! 1. Reset the perf collector and start the `initialization` event.
//! 2. Build the [`IsolationConfig`] and the substitution table (base plus the
//!    scope's extra substitutes). Configuration errors fail the method here,
//!    before a sandbox exists.
//! 3. Create and configure the sandbox.
//! 4. On the sandbox thread: enter the domain as the ambient context, adapt
//!    the test class, run class setup the first time the class is seen, run
//!    `before_test`, evaluate before hooks, body and after hooks, run
//!    `after_test`, leave the ambient context, then `finally_after_test`.
//! 5. Back on the caller's thread: hand metrics to every reporter and reset
//!    the collector.
//!
//! ## End of run
//! [`SandboxTestRunner::finish_run`] runs every tracked class's teardown
//! hooks exactly once, in the order the classes were first seen.

mod hooks;
mod model;
mod report;
mod statement;

pub use hooks::{DefaultHooks, MethodContext, RunnerHooks};
pub use model::{TestClass, TestMethod};
pub use report::{MethodOutcome, RunReport};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::ambient::AmbientContext;
use crate::config::{EngineSettings, IsolationConfig};
use crate::domain::Domain;
use crate::errors::{Result, SandboxError};
use crate::lifecycle::{LifecycleTracker, TrackedClass};
use crate::perf::{Event, PerfStatsCollector, PerfStatsReporter};
use crate::sandbox::Sandbox;
use crate::shadow::{Interceptors, SubstitutionTable};
use crate::types::{TypeName, TypeRegistry};

use statement::{guarded, invoke_hook, Evaluated, MethodStatement};

// ============================================================================
// BUILDER
// ============================================================================

pub struct RunnerBuilder<H: RunnerHooks = DefaultHooks> {
    host: Arc<TypeRegistry>,
    base: Option<Arc<SubstitutionTable>>,
    settings: Option<EngineSettings>,
    reporters: Vec<Arc<dyn PerfStatsReporter>>,
    hooks: H,
}

impl<H: RunnerHooks> RunnerBuilder<H> {
    /// Uses `table` as the base instead of asking the hooks for one.
    pub fn base_table(mut self, table: Arc<SubstitutionTable>) -> Self {
        self.base = Some(table);
        self
    }

    /// Overrides the process-wide settings read from the environment.
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn PerfStatsReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn hooks<H2: RunnerHooks>(self, hooks: H2) -> RunnerBuilder<H2> {
        RunnerBuilder {
            host: self.host,
            base: self.base,
            settings: self.settings,
            reporters: self.reporters,
            hooks,
        }
    }

    /// Fails if the base table cannot be built, for example on a provider
    /// collision.
    pub fn build(self) -> Result<SandboxTestRunner<H>> {
        let base = match self.base {
            Some(table) => table,
            None => self.hooks.create_substitution_table()?,
        };
        let interceptors = Arc::new(self.hooks.find_interceptors());
        log::debug!(
            "runner ready: {} base substitution(s), {} interceptor ref(s), {} reporter(s)",
            base.len(),
            interceptors.len(),
            self.reporters.len()
        );
        Ok(SandboxTestRunner {
            host: self.host,
            base,
            settings: self
                .settings
                .unwrap_or_else(|| EngineSettings::global().clone()),
            hooks: Arc::new(self.hooks),
            interceptors,
            reporters: self.reporters,
            perf: PerfStatsCollector::new(),
            tracker: Arc::new(Mutex::new(LifecycleTracker::new())),
        })
    }
}

// ============================================================================
// RUNNER
// ============================================================================

pub struct SandboxTestRunner<H: RunnerHooks = DefaultHooks> {
    host: Arc<TypeRegistry>,
    base: Arc<SubstitutionTable>,
    settings: EngineSettings,
    hooks: Arc<H>,
    interceptors: Arc<Interceptors>,
    reporters: Vec<Arc<dyn PerfStatsReporter>>,
    perf: PerfStatsCollector,
    tracker: Arc<Mutex<LifecycleTracker>>,
}

impl SandboxTestRunner<DefaultHooks> {
    pub fn builder(host: impl Into<Arc<TypeRegistry>>) -> RunnerBuilder<DefaultHooks> {
        RunnerBuilder {
            host: host.into(),
            base: None,
            settings: None,
            reporters: Vec::new(),
            hooks: DefaultHooks,
        }
    }
}

impl<H: RunnerHooks> SandboxTestRunner<H> {
    pub fn host(&self) -> &Arc<TypeRegistry> {
        &self.host
    }

    pub fn base_table(&self) -> &Arc<SubstitutionTable> {
        &self.base
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn perf(&self) -> &PerfStatsCollector {
        &self.perf
    }

    /// Classes whose setup has run and whose teardown is still pending.
    pub fn tracked_classes(&self) -> Vec<TypeName> {
        lock(&self.tracker).classes()
    }

    /// Runs every method of every class in order, then finishes the run.
    pub fn run(&self, classes: &[TestClass]) -> RunReport {
        let mut report = RunReport::default();
        for class in classes {
            for method in &class.methods {
                report.outcomes.push(self.run_method(class, method));
            }
        }
        report.class_teardown_failures = self.finish_run();
        report
    }

    pub fn isolation_config_for(&self, class: &TestClass, method: &TestMethod) -> Result<IsolationConfig> {
        self.hooks
            .create_isolation_config(&self.settings, &self.host, class, method)
    }

    /// The base table plus the extra substitutes of both scopes.
    pub fn substitution_table_for(&self, class: &TestClass, method: &TestMethod) -> Result<SubstitutionTable> {
        let extras = self.hooks.extra_substitutes(class, method);
        self.base.with_extras(&self.host, &extras)
    }

    /// Runs one method in its own sandbox.
    pub fn run_method(&self, class: &TestClass, method: &TestMethod) -> MethodOutcome {
        let started = Instant::now();
        self.perf.reset();
        self.perf.set_enabled(!self.reporters.is_empty());
        self.perf
            .put_metadata("class", serde_json::json!(class.name.as_str()));
        self.perf.put_metadata("method", serde_json::json!(method.name));
        let initialization = self.perf.start_event("initialization");

        let (result, mut secondary) = match self.prepare(class, method) {
            Ok(sandbox) => self.execute(sandbox, class, method, initialization),
            Err(e) => {
                initialization.finished_with(false);
                log::error!("{}#{}: sandbox configuration failed: {}", class.name, method.name, e);
                (Err(e), Vec::new())
            }
        };

        secondary.extend(self.report_perf());
        self.perf.reset();

        MethodOutcome {
            class: class.name.clone(),
            method: method.name.clone(),
            result,
            secondary,
            elapsed: started.elapsed(),
        }
    }

    fn prepare(&self, class: &TestClass, method: &TestMethod) -> Result<Sandbox> {
        let config = self.isolation_config_for(class, method)?;
        let table = Arc::new(self.substitution_table_for(class, method)?);
        let sandbox = Sandbox::new(config, self.host.clone());
        let dispatcher = self
            .hooks
            .create_dispatcher(self.host.clone(), self.interceptors.clone());
        sandbox.configure(table, dispatcher);
        Ok(sandbox)
    }

    fn execute(
        &self,
        sandbox: Sandbox,
        class: &TestClass,
        method: &TestMethod,
        initialization: Event,
    ) -> (Result<()>, Vec<SandboxError>) {
        log::debug!("{}: running {}#{}", sandbox.domain().id(), class.name, method.name);
        let domain = sandbox.domain().clone();
        let hooks = self.hooks.clone();
        let tracker = self.tracker.clone();
        let class = class.clone();
        let method = method.clone();
        let outcome = sandbox.run_on_dedicated_thread(move || {
            run_in_sandbox(domain, &*hooks, &tracker, &class, &method, initialization)
        });
        match outcome {
            Ok(Evaluated { result, secondary }) => (result, secondary),
            Err(e) => (Err(e), Vec::new()),
        }
    }

    /// Hands the collected metrics to every reporter. A failing reporter is
    /// logged and the rest still run.
    fn report_perf(&self) -> Vec<SandboxError> {
        if self.reporters.is_empty() {
            return Vec::new();
        }
        let metadata = self.perf.metadata();
        let metrics = self.perf.metrics();
        let mut failures = Vec::new();
        for reporter in &self.reporters {
            let outcome = guarded(|| {
                reporter
                    .report(&metadata, &metrics)
                    .map_err(SandboxError::User)
            });
            if let Err(e) = outcome {
                let message = match e {
                    SandboxError::User(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                log::warn!("reporter {} failed: {}", reporter.name(), message);
                failures.push(SandboxError::Reporter {
                    reporter: reporter.name().to_string(),
                    message,
                });
            }
        }
        failures
    }

    /// Runs class teardown for every class seen since the last call, then
    /// the `after_class` hook. Every teardown runs even if an earlier one
    /// failed; the failures are returned.
    pub fn finish_run(&self) -> Vec<SandboxError> {
        let classes = lock(&self.tracker).drain();
        let mut failures = Vec::new();
        for tracked in classes {
            log::debug!("{}: class teardown for {}", tracked.domain.id(), tracked.name());
            for hook in &tracked.teardown_hooks {
                if let Err(cause) = invoke_hook(&tracked.domain, &tracked.class, hook) {
                    log::error!("class teardown {}#{} failed: {}", tracked.name(), hook, cause);
                    failures.push(SandboxError::ClassTeardown {
                        class: tracked.name().clone(),
                        cause: Box::new(cause),
                    });
                }
            }
        }
        if let Err(e) = guarded(|| self.hooks.after_class()) {
            log::error!("after_class hook failed: {}", e);
            failures.push(e);
        }
        failures
    }
}

fn lock(tracker: &Mutex<LifecycleTracker>) -> MutexGuard<'_, LifecycleTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SANDBOX THREAD
// ============================================================================

fn run_in_sandbox<H: RunnerHooks>(
    domain: Arc<Domain>,
    hooks: &H,
    tracker: &Mutex<LifecycleTracker>,
    class: &TestClass,
    method: &TestMethod,
    initialization: Event,
) -> Evaluated {
    let scope = AmbientContext::enter(domain.clone());
    let instance = match domain.resolve(&class.name) {
        Ok(instance) => instance,
        Err(e) => {
            initialization.finished_with(false);
            return Evaluated {
                result: Err(e),
                secondary: Vec::new(),
            };
        }
    };
    let ctx = MethodContext {
        class,
        method,
        domain: &domain,
        instance: &instance,
    };

    let mut evaluated = run_test(hooks, tracker, &ctx, initialization);
    drop(scope);

    if let Err(e) = guarded(|| hooks.finally_after_test(&ctx)) {
        log::warn!("{}#{}: finally_after_test failed: {}", class.name, method.name, e);
        evaluated.secondary.push(e);
    }
    evaluated
}

fn run_test<H: RunnerHooks>(
    hooks: &H,
    tracker: &Mutex<LifecycleTracker>,
    ctx: &MethodContext<'_>,
    initialization: Event,
) -> Evaluated {
    let ready = set_up_class(tracker, ctx).and_then(|()| guarded(|| hooks.before_test(ctx)));
    if let Err(e) = ready {
        initialization.finished_with(false);
        return Evaluated {
            result: Err(e),
            secondary: Vec::new(),
        };
    }
    initialization.finished();

    let mut evaluated = MethodStatement {
        domain: ctx.domain,
        instance: ctx.instance,
        before: &ctx.class.before,
        body: &ctx.method.name,
        after: &ctx.class.after,
        timeout: ctx.method.timeout,
    }
    .evaluate();

    if let Err(e) = guarded(|| hooks.after_test(ctx)) {
        log::warn!("{}#{}: after_test failed: {}", ctx.class.name, ctx.method.name, e);
        evaluated.secondary.push(e);
    }
    evaluated
}

/// Runs class setup if this is the first method of the class in the run.
/// The class is recorded before its hooks run, so teardown happens even
/// when setup fails. A failed setup fails only the method that ran it;
/// later methods of the class skip setup and run as usual.
fn set_up_class(tracker: &Mutex<LifecycleTracker>, ctx: &MethodContext<'_>) -> Result<()> {
    let first = lock(tracker).record(TrackedClass {
        class: ctx.instance.clone(),
        domain: ctx.domain.clone(),
        teardown_hooks: ctx.class.after_class.clone(),
    });
    if !first {
        return Ok(());
    }
    log::debug!("{}: class setup for {}", ctx.domain.id(), ctx.class.name);
    for hook in &ctx.class.before_class {
        invoke_hook(ctx.domain, ctx.instance, hook)?;
    }
    Ok(())
}
