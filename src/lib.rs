//! # shadowbox
//!
//! A sandboxed test-execution engine. Every test method runs inside its own
//! isolation boundary, a [`Domain`] with private type bindings layered over
//! a shared host [`TypeRegistry`], on one dedicated thread. Calls on isolated
//! types are routed through a substitution table, so shadow implementations
//! can stand in for the real ones.

pub use crate::domain::{Domain, Invocation, Resolved};
pub use crate::errors::{ErrorCategory, Result, SandboxError};
pub use crate::runner::{
    MethodOutcome, RunReport, RunnerBuilder, RunnerHooks, SandboxTestRunner, TestClass, TestMethod,
};
pub use crate::sandbox::Sandbox;
pub use crate::types::{TypeDef, TypeName, TypeRegistry};
pub use crate::value::Value;

pub mod ambient;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod perf;
pub mod runner;
pub mod sandbox;
pub mod shadow;
pub mod types;
pub mod value;

pub mod prelude {
    pub use crate::ambient::AmbientContext;
    pub use crate::config::{EngineSettings, IsolationConfig, SandboxConfig};
    pub use crate::domain::{Domain, Invocation, Resolved};
    pub use crate::errors::{Result, SandboxError};
    pub use crate::perf::{PerfStatsCollector, PerfStatsReporter};
    pub use crate::runner::{
        MethodContext, MethodOutcome, RunReport, RunnerHooks, SandboxTestRunner, TestClass, TestMethod,
    };
    pub use crate::sandbox::Sandbox;
    pub use crate::shadow::{ShadowProvider, SubstitutionTable};
    pub use crate::types::{TypeDef, TypeName, TypeRegistry};
    pub use crate::value::Value;
    pub use crate::{ensure, fail};
}
