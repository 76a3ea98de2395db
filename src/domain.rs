//! # Execution Domain
//!
//! A [`Domain`] is the isolation boundary of one sandbox: its own namespace of
//! type bindings layered over the host [`TypeRegistry`]. Types the
//! [`IsolationConfig`] excludes resolve to the shared host binding; every
//! other type gets a domain-local binding with fresh static state, and calls
//! on it go through the installed [`Dispatcher`].
//!
//! All calls enter through [`Domain::call`] or [`Domain::invoke`], which is
//! also where the test-body deadline is checked.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use crate::config::IsolationConfig;
use crate::errors::{Result, SandboxError};
use crate::shadow::{Dispatcher, SubstitutionTable};
use crate::types::{MethodKey, StaticStore, TypeDef, TypeName, TypeRegistry};
use crate::value::Value;

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u64);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain-{}", self.0)
    }
}

// ============================================================================
// TYPE BINDINGS
// ============================================================================

/// The domain-local counterpart of a host type.
#[derive(Debug)]
pub struct LocalType {
    def: Arc<TypeDef>,
    domain: DomainId,
    statics: StaticStore,
}

impl LocalType {
    pub fn def(&self) -> &TypeDef {
        &self.def
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }
}

/// How a type name resolved inside a domain.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Excluded from isolation: the shared host binding.
    Host(Arc<TypeDef>),
    /// Loaded by the domain itself and eligible for substitution.
    Local(Arc<LocalType>),
}

impl Resolved {
    pub fn name(&self) -> &TypeName {
        self.def().name()
    }

    pub fn def(&self) -> &TypeDef {
        match self {
            Resolved::Host(def) => def,
            Resolved::Local(local) => &local.def,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Resolved::Local(_))
    }

    pub fn statics(&self) -> &StaticStore {
        match self {
            Resolved::Host(def) => def.host_statics(),
            Resolved::Local(local) => &local.statics,
        }
    }

    /// True when both resolve to the very same binding.
    pub fn same_binding(&self, other: &Resolved) -> bool {
        match (self, other) {
            (Resolved::Host(a), Resolved::Host(b)) => Arc::ptr_eq(a, b),
            (Resolved::Local(a), Resolved::Local(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ============================================================================
// DEADLINE
// ============================================================================

/// A running time limit for one test body.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<()> {
        let elapsed = self.elapsed();
        if elapsed > self.timeout {
            return Err(SandboxError::Timeout {
                timeout: self.timeout,
                elapsed,
            });
        }
        Ok(())
    }
}

/// Keeps a deadline installed on a domain; removes it when dropped.
pub(crate) struct DeadlineGuard<'a> {
    domain: &'a Domain,
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        *self
            .domain
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ============================================================================
// DOMAIN
// ============================================================================

pub struct Domain {
    id: DomainId,
    config: IsolationConfig,
    host: Arc<TypeRegistry>,
    loaded: Mutex<HashMap<TypeName, Arc<LocalType>>>,
    table: RwLock<Arc<SubstitutionTable>>,
    dispatcher: RwLock<Option<Arc<dyn Dispatcher>>>,
    started: AtomicBool,
    sandbox_thread: OnceCell<ThreadId>,
    deadline: Mutex<Option<Deadline>>,
}

impl Domain {
    pub fn new(config: IsolationConfig, host: Arc<TypeRegistry>) -> Self {
        Self {
            id: DomainId(NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed)),
            config,
            host,
            loaded: Mutex::new(HashMap::new()),
            table: RwLock::new(Arc::new(SubstitutionTable::empty())),
            dispatcher: RwLock::new(None),
            started: AtomicBool::new(false),
            sandbox_thread: OnceCell::new(),
            deadline: Mutex::new(None),
        }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<TypeRegistry> {
        &self.host
    }

    pub fn is_isolated(&self, name: &TypeName) -> bool {
        self.config.should_isolate(name)
    }

    /// Resolves a name the way code running inside the domain sees it.
    /// Local bindings are created on first use and cached for the domain's
    /// lifetime.
    pub fn resolve(&self, name: &TypeName) -> Result<Resolved> {
        let def = self.host.require(name)?;
        if !self.config.should_isolate(name) {
            return Ok(Resolved::Host(def));
        }
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        let local = loaded
            .entry(name.clone())
            .or_insert_with(|| {
                log::trace!("{}: loading {}", self.id, name);
                Arc::new(LocalType {
                    def,
                    domain: self.id,
                    statics: StaticStore::default(),
                })
            })
            .clone();
        Ok(Resolved::Local(local))
    }

    /// Number of domain-local bindings created so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn substitution_table(&self) -> Arc<SubstitutionTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The thread that runs this domain's code, once it has started.
    pub fn sandbox_thread(&self) -> Option<ThreadId> {
        self.sandbox_thread.get().copied()
    }

    pub(crate) fn replace_table(&self, table: Arc<SubstitutionTable>) {
        assert!(
            !self.has_started(),
            "{}: substitution table replaced after code started running in the domain",
            self.id
        );
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    pub(crate) fn install(&self, table: Arc<SubstitutionTable>, dispatcher: Arc<dyn Dispatcher>) {
        assert!(
            !self.has_started(),
            "{}: configure called after code started running in the domain",
            self.id
        );
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
        *self.dispatcher.write().unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);
    }

    pub(crate) fn mark_started(&self, thread: ThreadId) {
        let _ = self.sandbox_thread.set(thread);
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) fn install_deadline(&self, deadline: Deadline) -> DeadlineGuard<'_> {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(deadline);
        DeadlineGuard { domain: self }
    }

    /// Fails with a timeout if the running test body is past its deadline.
    pub fn check_deadline(&self) -> Result<()> {
        let deadline = *self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        match deadline {
            Some(deadline) => deadline.check(),
            None => Ok(()),
        }
    }

    fn dispatcher(&self) -> Option<Arc<dyn Dispatcher>> {
        self.dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves `type_name` and calls `method` on it.
    pub fn call(&self, type_name: &TypeName, method: &str, args: &[Value]) -> Result<Value> {
        let target = self.resolve(type_name)?;
        self.invoke(&target, method, args)
    }

    /// Calls `method` on an already resolved binding. Local bindings go
    /// through the dispatcher; host bindings always run their own body.
    ///
    /// The first call closes the configuration window, wherever it comes
    /// from.
    pub fn invoke(&self, target: &Resolved, method: &str, args: &[Value]) -> Result<Value> {
        if !self.started.swap(true, Ordering::SeqCst) {
            log::trace!("{}: first call, configuration is now closed", self.id);
        }
        if let Some(owner) = self.sandbox_thread() {
            if owner != std::thread::current().id() {
                log::debug!("{}: {}#{} called off the sandbox thread", self.id, target.name(), method);
            }
        }
        self.check_deadline()?;
        let invocation = Invocation {
            domain: self,
            target,
            key: MethodKey::new(method, args.len()),
            args,
        };
        match (target, self.dispatcher()) {
            (Resolved::Local(_), Some(dispatcher)) => dispatcher.dispatch(&invocation),
            _ => invocation.call_original(),
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id)
            .field("started", &self.has_started())
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

// ============================================================================
// INVOCATION
// ============================================================================

/// One call in flight, handed to method bodies, substitutes and
/// interceptors.
pub struct Invocation<'a> {
    domain: &'a Domain,
    target: &'a Resolved,
    key: MethodKey,
    args: &'a [Value],
}

impl<'a> Invocation<'a> {
    pub fn domain(&self) -> &'a Domain {
        self.domain
    }

    pub fn target(&self) -> &'a Resolved {
        self.target
    }

    pub fn type_name(&self) -> &'a TypeName {
        self.target.name()
    }

    pub fn method(&self) -> &MethodKey {
        &self.key
    }

    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    pub fn arg(&self, index: usize) -> Option<&'a Value> {
        self.args.get(index)
    }

    /// Runs the target's own body, bypassing substitution.
    pub fn call_original(&self) -> Result<Value> {
        match self.target.def().method(&self.key) {
            Some(body) => body(self),
            None => Err(SandboxError::MissingMethod {
                type_name: self.type_name().clone(),
                method: self.key.name.clone(),
                arity: self.key.arity,
            }),
        }
    }

    /// Makes a further call from inside the domain.
    pub fn call(&self, type_name: impl Into<TypeName>, method: &str, args: &[Value]) -> Result<Value> {
        self.domain.call(&type_name.into(), method, args)
    }

    /// Reads a static field of the target binding.
    pub fn get_static(&self, key: &str) -> Value {
        self.target.statics().get(key)
    }

    /// Writes a static field of the target binding, returning the old value.
    pub fn set_static(&self, key: &str, value: impl Into<Value>) -> Value {
        self.target.statics().set(key, value.into())
    }

    /// Cooperative cancellation point for long-running bodies.
    pub fn checkpoint(&self) -> Result<()> {
        self.domain.check_deadline()
    }

    /// True when running on the thread that owns this domain.
    pub fn on_sandbox_thread(&self) -> bool {
        self.domain.sandbox_thread() == Some(std::thread::current().id())
    }
}
