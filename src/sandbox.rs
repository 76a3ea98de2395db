//! # Sandbox
//!
//! A sandbox owns one [`Domain`] and the single thread its code runs on.
//!
//! ## Thread affinity
//! Simulated platform code routinely asks "am I on the expected thread?".
//! Every piece of test code belonging to a sandbox (class setup, hooks, the
//! body, timeout enforcement) therefore runs through
//! [`Sandbox::run_on_dedicated_thread`]. The thread is spawned on first use
//! and reused until the sandbox is dropped.
//!
//! ## Configuration window
//! [`Sandbox::configure`] and [`Sandbox::replace_substitution_table`] are
//! only legal before the first job runs. Calling them afterwards panics.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use once_cell::sync::OnceCell;

use crate::config::IsolationConfig;
use crate::domain::{Domain, Resolved};
use crate::errors::{Result, SandboxError};
use crate::shadow::{Dispatcher, SubstitutionTable};
use crate::types::{TypeName, TypeRegistry};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct SandboxThread {
    jobs: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

pub struct Sandbox {
    domain: Arc<Domain>,
    thread: OnceCell<SandboxThread>,
}

impl Sandbox {
    /// Builds the isolation boundary described by `config` over `host`.
    pub fn new(config: IsolationConfig, host: Arc<TypeRegistry>) -> Self {
        let domain = Arc::new(Domain::new(config, host));
        log::debug!("{}: sandbox created", domain.id());
        Self {
            domain,
            thread: OnceCell::new(),
        }
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn substitution_table(&self) -> Arc<SubstitutionTable> {
        self.domain.substitution_table()
    }

    /// Swaps the active table. Panics once code has run in the domain.
    pub fn replace_substitution_table(&self, table: Arc<SubstitutionTable>) {
        self.domain.replace_table(table);
    }

    /// Installs the table and interception runtime. Panics once code has run
    /// in the domain.
    pub fn configure(&self, table: Arc<SubstitutionTable>, dispatcher: Arc<dyn Dispatcher>) {
        self.domain.install(table, dispatcher);
    }

    /// The domain-local counterpart of a host type.
    pub fn adapt(&self, external: &TypeName) -> Result<Resolved> {
        self.domain.resolve(external)
    }

    /// The dedicated thread, if it has been started.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.get().map(|t| t.handle.thread().id())
    }

    /// Runs `job` to completion on the sandbox thread and returns its
    /// result. A panic inside `job` comes back as
    /// [`SandboxError::Panicked`] and leaves the thread usable.
    pub fn run_on_dedicated_thread<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let thread = self.thread.get_or_try_init(|| self.spawn_thread())?;
        self.domain.mark_started(thread.handle.thread().id());

        let (done_tx, done_rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            // The caller may have stopped waiting; nothing to do then.
            let _ = done_tx.send(outcome);
        });
        thread
            .jobs
            .send(wrapped)
            .map_err(|_| SandboxError::ThreadLost(format!("{} no longer accepts work", self.domain.id())))?;

        match done_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(SandboxError::from_panic(payload)),
            Err(_) => Err(SandboxError::ThreadLost(format!(
                "{} exited before finishing its job",
                self.domain.id()
            ))),
        }
    }

    fn spawn_thread(&self) -> Result<SandboxThread> {
        let (jobs, inbox) = mpsc::channel::<Job>();
        let name = format!("shadowbox-{}", self.domain.id());
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(job) = inbox.recv() {
                    job();
                }
            })
            .map_err(|e| SandboxError::ThreadLost(format!("could not spawn {name}: {e}")))?;
        log::debug!("{}: dedicated thread {:?} started", self.domain.id(), handle.thread().id());
        Ok(SandboxThread { jobs, handle })
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Some(SandboxThread { jobs, handle }) = self.thread.take() {
            drop(jobs);
            if handle.join().is_err() {
                log::warn!("{}: dedicated thread panicked during shutdown", self.domain.id());
            }
        }
        log::debug!("{}: sandbox torn down", self.domain.id());
    }
}
