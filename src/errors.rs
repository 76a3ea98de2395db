//! Shadowbox Error Handling
//!
//! Every failure the engine can produce is a [`SandboxError`]. Errors are
//! classified into an [`ErrorCategory`] so the runner can decide whether a
//! failure decides a method's outcome (configuration, test body, timeout) or
//! is only a side channel (teardown, reporting).

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::types::TypeName;

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

/// Boxed user error accepted by [`SandboxError::User`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Type-safe error classification, used instead of matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid extras, provider collisions, missing types or methods
    Configuration,
    /// Assertion failures, user errors and panics from test code
    TestFailure,
    /// Test body exceeded its declared timeout
    Timeout,
    /// After-hooks, finally-hooks, reporters and class teardown
    Teardown,
    /// Engine faults such as a lost sandbox thread
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "Configuration",
            ErrorCategory::TestFailure => "TestFailure",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::Teardown => "Teardown",
            ErrorCategory::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Error, Diagnostic, Debug)]
pub enum SandboxError {
    #[error("substitute collision: {target} is substituted by both {first} and {second}")]
    #[diagnostic(
        code(shadowbox::config::provider_collision),
        help("each target type may be substituted by exactly one provider entry")
    )]
    ProviderCollision {
        target: TypeName,
        first: TypeName,
        second: TypeName,
    },

    #[error("{substitute} does not declare a valid target type")]
    #[diagnostic(
        code(shadowbox::config::invalid_substitute),
        help("declare the substituted type with `TypeDef::builder(..).substitutes(..)`")
    )]
    InvalidSubstitute { substitute: TypeName },

    #[error("type {0} is not known to the host registry")]
    #[diagnostic(code(shadowbox::config::unknown_type))]
    UnknownType(TypeName),

    #[error("no method {method}/{arity} on {type_name}")]
    #[diagnostic(code(shadowbox::config::missing_method))]
    MissingMethod {
        type_name: TypeName,
        method: String,
        arity: usize,
    },

    #[error("invalid sandbox configuration: {0}")]
    #[diagnostic(code(shadowbox::config::invalid))]
    InvalidConfig(String),

    #[error("assertion failed: {0}")]
    #[diagnostic(code(shadowbox::test::assertion))]
    Assertion(String),

    #[error("test code panicked: {0}")]
    #[diagnostic(code(shadowbox::test::panicked))]
    Panicked(String),

    #[error("{0}")]
    #[diagnostic(code(shadowbox::test::user))]
    User(BoxError),

    #[error("test body exceeded its timeout of {timeout:?} (ran for {elapsed:?})")]
    #[diagnostic(
        code(shadowbox::test::timeout),
        help("long-running bodies are only interrupted at dispatched calls or explicit checkpoints")
    )]
    Timeout { timeout: Duration, elapsed: Duration },

    #[error("class teardown failed for {class}: {cause}")]
    #[diagnostic(code(shadowbox::teardown::class))]
    ClassTeardown {
        class: TypeName,
        #[source]
        cause: Box<SandboxError>,
    },

    #[error("reporter {reporter} failed: {message}")]
    #[diagnostic(code(shadowbox::teardown::reporter))]
    Reporter { reporter: String, message: String },

    #[error("{primary} (plus {} teardown failure(s))", .secondary.len())]
    #[diagnostic(code(shadowbox::test::multiple))]
    Multiple {
        primary: Box<SandboxError>,
        #[related]
        secondary: Vec<SandboxError>,
    },

    #[error("sandbox thread is gone: {0}")]
    #[diagnostic(code(shadowbox::internal::thread))]
    ThreadLost(String),
}

impl SandboxError {
    /// Builds an assertion failure from a message.
    pub fn failure(message: impl Into<String>) -> Self {
        SandboxError::Assertion(message.into())
    }

    /// Wraps any user error.
    pub fn user(err: impl Into<BoxError>) -> Self {
        SandboxError::User(err.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SandboxError::ProviderCollision { .. }
            | SandboxError::InvalidSubstitute { .. }
            | SandboxError::UnknownType(_)
            | SandboxError::MissingMethod { .. }
            | SandboxError::InvalidConfig(_) => ErrorCategory::Configuration,
            SandboxError::Assertion(_) | SandboxError::Panicked(_) | SandboxError::User(_) => {
                ErrorCategory::TestFailure
            }
            SandboxError::Timeout { .. } => ErrorCategory::Timeout,
            SandboxError::ClassTeardown { .. } | SandboxError::Reporter { .. } => {
                ErrorCategory::Teardown
            }
            SandboxError::Multiple { primary, .. } => primary.category(),
            SandboxError::ThreadLost(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    /// Attaches secondary failures to a primary one. Returns `self` untouched
    /// when there is nothing to attach.
    pub fn with_secondary(self, mut more: Vec<SandboxError>) -> Self {
        if more.is_empty() {
            return self;
        }
        match self {
            SandboxError::Multiple {
                primary,
                mut secondary,
            } => {
                secondary.append(&mut more);
                SandboxError::Multiple { primary, secondary }
            }
            other => SandboxError::Multiple {
                primary: Box::new(other),
                secondary: more,
            },
        }
    }

    /// Converts a payload caught by `catch_unwind` into a failure.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        SandboxError::Panicked(message)
    }
}

// ============================================================================
// ASSERTION MACROS
// ============================================================================

/// Returns early with an assertion failure.
///
/// ```rust
/// use shadowbox::{fail, Result};
/// fn check(n: i64) -> Result<()> {
///     if n < 0 {
///         fail!("negative input {}", n);
///     }
///     Ok(())
/// }
/// assert!(check(-1).is_err());
/// ```
#[macro_export]
macro_rules! fail {
    ($($arg:tt)*) => {
        return Err($crate::SandboxError::failure(format!($($arg)*)).into())
    };
}

/// Fails with an assertion error unless the condition holds.
///
/// ```rust
/// use shadowbox::{ensure, Result};
/// fn positive(n: i64) -> Result<()> {
///     ensure!(n > 0, "expected a positive number, got {}", n);
///     Ok(())
/// }
/// assert!(positive(3).is_ok());
/// assert!(positive(0).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::fail!("condition failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fail!($($arg)+);
        }
    };
}
