//! Test classes and methods as the runner sees them.
//!
//! Hooks and bodies are zero-argument methods on the class's host
//! [`TypeDef`](crate::types::TypeDef), referenced here by name. The runner
//! resolves them inside each method's sandbox so they run against the
//! domain-local binding.

use std::time::Duration;

use crate::config::SandboxConfig;
use crate::types::TypeName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMethod {
    pub name: String,
    /// `None` runs the body without a deadline.
    pub timeout: Option<Duration>,
    pub config: Option<SandboxConfig>,
}

impl TestMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            config: None,
        }
    }

    /// Limits the body, not the hooks, to `timeout`. A zero timeout means no
    /// deadline.
    ///
    /// The limit is enforced cooperatively on the sandbox thread: once it
    /// has passed, the body's next call through the domain or
    /// [`Invocation::checkpoint`](crate::domain::Invocation::checkpoint)
    /// fails with a timeout, and a body that returns late is failed as well.
    /// A body that neither calls through the domain nor checkpoints is never
    /// interrupted and can run past its limit indefinitely.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestClass {
    pub name: TypeName,
    pub config: Option<SandboxConfig>,
    /// Run once, before the first method of the class.
    pub before_class: Vec<String>,
    /// Run once, when the whole run is over.
    pub after_class: Vec<String>,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub methods: Vec<TestMethod>,
}

impl TestClass {
    pub fn new(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            config: None,
            before_class: Vec::new(),
            after_class: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn before_class(mut self, hook: impl Into<String>) -> Self {
        self.before_class.push(hook.into());
        self
    }

    pub fn after_class(mut self, hook: impl Into<String>) -> Self {
        self.after_class.push(hook.into());
        self
    }

    pub fn before(mut self, hook: impl Into<String>) -> Self {
        self.before.push(hook.into());
        self
    }

    pub fn after(mut self, hook: impl Into<String>) -> Self {
        self.after.push(hook.into());
        self
    }

    pub fn method(mut self, method: TestMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn find_method(&self, name: &str) -> Option<&TestMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}
