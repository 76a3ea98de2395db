//! # Type Model
//!
//! Logical types are the unit of isolation and substitution. A [`TypeDef`] is
//! a named table of method bodies; the host [`TypeRegistry`] plays the role of
//! the outer (non-isolated) namespace that every sandbox domain resolves from.
//!
//! Type names are dotted paths (`platform.widget.TextView`) so package-prefix
//! rules can be applied to them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use im::HashMap;
use serde::{Deserialize, Serialize};

use crate::domain::Invocation;
use crate::errors::{Result, SandboxError};
use crate::value::Value;

// ============================================================================
// NAMES
// ============================================================================

/// Fully qualified, dotted type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Package part of the name, without the trailing dot. Empty for
    /// top-level names.
    ///
    /// ```rust
    /// use shadowbox::TypeName;
    /// assert_eq!(TypeName::new("platform.widget.Button").package(), "platform.widget");
    /// assert_eq!(TypeName::new("Main").package(), "");
    /// ```
    pub fn package(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    pub fn simple_name(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&TypeName> for TypeName {
    fn from(t: &TypeName) -> Self {
        t.clone()
    }
}

/// Method signature used for dispatch: name plus arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub name: String,
    pub arity: usize,
}

impl MethodKey {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

// ============================================================================
// METHOD BODIES AND STATIC STATE
// ============================================================================

/// A method body. Receives the invocation it serves, which gives access to
/// arguments, static state and further dispatched calls.
pub type MethodFn = Arc<dyn Fn(&Invocation<'_>) -> Result<Value> + Send + Sync>;

/// Static fields of one type binding. Host bindings share one store for the
/// whole process; domain-local bindings get a fresh store per domain.
#[derive(Clone, Default)]
pub struct StaticStore(Arc<Mutex<HashMap<String, Value>>>);

impl StaticStore {
    pub fn get(&self, key: &str) -> Value {
        let fields = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        fields.get(key).cloned().unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: Value) -> Value {
        let mut fields = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        fields.insert(key.to_string(), value).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

impl fmt::Debug for StaticStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticStore").field("len", &self.len()).finish()
    }
}

// ============================================================================
// TYPE DEFINITIONS
// ============================================================================

/// A type as it exists in the host namespace.
///
/// A definition that declares [`substitutes`](TypeDef::substitutes) is a
/// substitute (shadow) type for exactly one target.
#[derive(Clone)]
pub struct TypeDef {
    name: TypeName,
    substitutes: Option<TypeName>,
    methods: HashMap<MethodKey, MethodFn>,
    host_statics: StaticStore,
}

impl TypeDef {
    pub fn builder(name: impl Into<TypeName>) -> TypeDefBuilder {
        TypeDefBuilder {
            name: name.into(),
            substitutes: None,
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &TypeName {
        &self.name
    }

    /// The target this type substitutes, if it is a substitute.
    pub fn substitutes(&self) -> Option<&TypeName> {
        self.substitutes.as_ref()
    }

    pub fn method(&self, key: &MethodKey) -> Option<&MethodFn> {
        self.methods.get(key)
    }

    pub fn has_method(&self, key: &MethodKey) -> bool {
        self.methods.contains_key(key)
    }

    pub fn method_keys(&self) -> Vec<MethodKey> {
        let mut keys: Vec<_> = self.methods.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn host_statics(&self) -> &StaticStore {
        &self.host_statics
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("substitutes", &self.substitutes)
            .field("methods", &self.method_keys())
            .finish()
    }
}

pub struct TypeDefBuilder {
    name: TypeName,
    substitutes: Option<TypeName>,
    methods: HashMap<MethodKey, MethodFn>,
}

impl TypeDefBuilder {
    /// Declares the single target type this definition substitutes.
    pub fn substitutes(mut self, target: impl Into<TypeName>) -> Self {
        self.substitutes = Some(target.into());
        self
    }

    /// Adds a method body. A later body with the same name and arity
    /// replaces the earlier one.
    pub fn method<F>(mut self, name: &str, arity: usize, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(MethodKey::new(name, arity), Arc::new(body));
        self
    }

    /// Adds a zero-argument method whose body returns nothing, the shape of
    /// test hooks and test bodies.
    pub fn hook<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.method(name, 0, move |inv| body(inv).map(|()| Value::Nil))
    }

    pub fn build(self) -> TypeDef {
        TypeDef {
            name: self.name,
            substitutes: self.substitutes,
            methods: self.methods,
            host_statics: StaticStore::default(),
        }
    }
}

// ============================================================================
// HOST REGISTRY
// ============================================================================

/// The outer namespace: every type a sandbox can resolve.
#[derive(Clone, Default, Debug)]
pub struct TypeRegistry {
    types: HashMap<TypeName, Arc<TypeDef>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type, replacing any earlier definition with the same name.
    pub fn register(&mut self, def: TypeDef) -> Option<Arc<TypeDef>> {
        self.types.insert(def.name.clone(), Arc::new(def))
    }

    pub fn with(mut self, def: TypeDef) -> Self {
        self.register(def);
        self
    }

    pub fn get(&self, name: &TypeName) -> Option<Arc<TypeDef>> {
        self.types.get(name).cloned()
    }

    pub fn require(&self, name: &TypeName) -> Result<Arc<TypeDef>> {
        self.get(name)
            .ok_or_else(|| SandboxError::UnknownType(name.clone()))
    }

    pub fn contains(&self, name: &TypeName) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
