//! Secondary interceptors.
//!
//! Interceptors are consulted before the substitution table and may
//! short-circuit a call completely. They exist for the handful of calls that
//! cannot be expressed as "route this type to that substitute", such as
//! natives or one specific method on an otherwise real type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::Invocation;
use crate::errors::Result;
use crate::types::{MethodKey, TypeName};
use crate::value::Value;

/// Wildcard method name matching every method of a type.
pub const ANY_METHOD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    pub type_name: TypeName,
    pub method: String,
}

impl MethodRef {
    pub fn new(type_name: impl Into<TypeName>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
        }
    }

    /// Matches every method of `type_name`.
    pub fn any(type_name: impl Into<TypeName>) -> Self {
        Self::new(type_name, ANY_METHOD)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.method)
    }
}

pub trait Interceptor: Send + Sync {
    /// Methods this interceptor claims.
    fn method_refs(&self) -> Vec<MethodRef>;

    fn intercept(&self, invocation: &Invocation<'_>) -> Result<Value>;
}

type InterceptFn = dyn Fn(&Invocation<'_>) -> Result<Value> + Send + Sync;

/// Interceptor built from a closure.
pub struct FnInterceptor {
    refs: Vec<MethodRef>,
    handler: Box<InterceptFn>,
}

impl FnInterceptor {
    pub fn new<F>(refs: Vec<MethodRef>, handler: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            refs,
            handler: Box::new(handler),
        }
    }
}

impl Interceptor for FnInterceptor {
    fn method_refs(&self) -> Vec<MethodRef> {
        self.refs.clone()
    }

    fn intercept(&self, invocation: &Invocation<'_>) -> Result<Value> {
        (self.handler)(invocation)
    }
}

/// Interceptors indexed by the method refs they claim. When two claim the
/// same ref the later one wins.
#[derive(Clone, Default)]
pub struct Interceptors {
    by_ref: HashMap<MethodRef, Arc<dyn Interceptor>>,
}

impl Interceptors {
    pub fn new(interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        let mut by_ref = HashMap::new();
        for interceptor in interceptors {
            for method_ref in interceptor.method_refs() {
                by_ref.insert(method_ref, interceptor.clone());
            }
        }
        Self { by_ref }
    }

    /// Exact method refs take precedence over wildcard ones.
    pub fn find(&self, type_name: &TypeName, method: &MethodKey) -> Option<&Arc<dyn Interceptor>> {
        self.by_ref
            .get(&MethodRef::new(type_name.clone(), method.name.clone()))
            .or_else(|| self.by_ref.get(&MethodRef::any(type_name.clone())))
    }

    pub fn method_refs(&self) -> Vec<MethodRef> {
        let mut refs: Vec<_> = self.by_ref.keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("refs", &self.method_refs())
            .finish()
    }
}
