//! # Isolation Configuration
//!
//! Decides which types a sandbox domain loads for itself (isolated, eligible
//! for substitution) and which it takes from the host namespace unchanged.
//!
//! ## Sources, in order
//! 1. Static defaults: the infrastructure prefixes in
//!    [`DEFAULT_EXCLUDED_PREFIXES`]. Engine types must never be reloaded or
//!    substituted inside a domain.
//! 2. The process-wide override, a comma separated list read once from
//!    [`ENV_PACKAGES_TO_NOT_ISOLATE`].
//! 3. Class-level [`SandboxConfig`] declarations.
//! 4. Method-level [`SandboxConfig`] declarations, read in addition to the
//!    class-level ones.
//!
//! ## Resolution rule
//! An explicitly included type is always isolated. Otherwise the longest
//! matching prefix among included packages and excluded prefixes decides,
//! with inclusion winning a tie. A type matching nothing is isolated.

use im::OrdSet;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SandboxError};
use crate::types::TypeName;

pub const ENV_PACKAGES_TO_NOT_ISOLATE: &str = "SHADOWBOX_PACKAGES_TO_NOT_ISOLATE";

pub const DEFAULT_EXCLUDED_PREFIXES: &[&str] = &["std.", "core.", "alloc.", "shadowbox.", "libtest."];

// ============================================================================
// DECLARATIONS
// ============================================================================

/// Per-scope declaration attached to a test class or a test method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SandboxConfig {
    /// Extra substitute types to register for this scope.
    pub shadows: Vec<TypeName>,
    /// Packages to isolate even when a broader exclusion applies.
    pub instrumented_packages: Vec<String>,
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow(mut self, substitute: impl Into<TypeName>) -> Self {
        self.shadows.push(substitute.into());
        self
    }

    pub fn instrumented_package(mut self, package: impl Into<String>) -> Self {
        self.instrumented_packages.push(package.into());
        self
    }

    /// Parses a declaration from JSON.
    ///
    /// ```rust
    /// use shadowbox::config::SandboxConfig;
    /// let config = SandboxConfig::from_json(
    ///     r#"{ "shadows": ["shadows.ShadowClock"], "instrumentedPackages": ["core.time"] }"#,
    /// ).unwrap();
    /// assert_eq!(config.shadows.len(), 1);
    /// assert_eq!(config.instrumented_packages, vec!["core.time".to_string()]);
    /// ```
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SandboxError::InvalidConfig(format!("malformed sandbox config: {e}")))
    }

    /// Shadows declared by the class scope followed by the method scope.
    pub fn merged_shadows(class: Option<&Self>, method: Option<&Self>) -> Vec<TypeName> {
        class
            .into_iter()
            .chain(method)
            .flat_map(|c| c.shadows.iter().cloned())
            .collect()
    }
}

// ============================================================================
// PROCESS-WIDE SETTINGS
// ============================================================================

/// Settings read from the environment once per process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub packages_to_not_isolate: Vec<String>,
}

static GLOBAL_SETTINGS: Lazy<EngineSettings> = Lazy::new(EngineSettings::from_env);

impl EngineSettings {
    /// Reads the environment now. Most callers want [`EngineSettings::global`].
    pub fn from_env() -> Self {
        let raw = std::env::var(ENV_PACKAGES_TO_NOT_ISOLATE).unwrap_or_default();
        Self {
            packages_to_not_isolate: Self::parse_package_list(&raw),
        }
    }

    /// The settings captured the first time they were asked for.
    pub fn global() -> &'static EngineSettings {
        &GLOBAL_SETTINGS
    }

    /// Splits a comma separated package list, dropping empty entries.
    ///
    /// ```rust
    /// use shadowbox::config::EngineSettings;
    /// let pkgs = EngineSettings::parse_package_list("vendor.,, thirdparty.net ,");
    /// assert_eq!(pkgs, vec!["vendor.".to_string(), "thirdparty.net".to_string()]);
    /// ```
    pub fn parse_package_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|pkg| !pkg.is_empty())
            .map(str::to_string)
            .collect()
    }
}

// ============================================================================
// ISOLATION CONFIG
// ============================================================================

/// Immutable isolation policy for one sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsolationConfig {
    excluded_prefixes: OrdSet<String>,
    included_types: OrdSet<TypeName>,
    included_packages: OrdSet<String>,
    extra_substitutes: OrdSet<TypeName>,
}

impl IsolationConfig {
    pub fn builder() -> IsolationConfigBuilder {
        IsolationConfigBuilder::default()
    }

    /// The static defaults plus the process-wide override.
    pub fn defaults(settings: &EngineSettings) -> IsolationConfigBuilder {
        Self::builder().with_default_exclusions().with_settings(settings)
    }

    /// True when the domain should load its own binding for `name`.
    pub fn should_isolate(&self, name: &TypeName) -> bool {
        if self.included_types.contains(name) {
            return true;
        }
        let included = longest_match(&self.included_packages, name);
        let excluded = longest_match(&self.excluded_prefixes, name);
        match (included, excluded) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(inc), Some(exc)) => inc >= exc,
        }
    }

    pub fn excluded_prefixes(&self) -> impl Iterator<Item = &String> {
        self.excluded_prefixes.iter()
    }

    pub fn included_types(&self) -> impl Iterator<Item = &TypeName> {
        self.included_types.iter()
    }

    pub fn included_packages(&self) -> impl Iterator<Item = &String> {
        self.included_packages.iter()
    }

    pub fn extra_substitutes(&self) -> impl Iterator<Item = &TypeName> {
        self.extra_substitutes.iter()
    }
}

fn longest_match(prefixes: &OrdSet<String>, name: &TypeName) -> Option<usize> {
    prefixes
        .iter()
        .filter(|p| name.starts_with(p))
        .map(String::len)
        .max()
}

/// Builder for [`IsolationConfig`]. Every call is additive.
#[derive(Debug, Clone, Default)]
pub struct IsolationConfigBuilder {
    config: IsolationConfig,
}

impl IsolationConfigBuilder {
    pub fn with_default_exclusions(mut self) -> Self {
        for prefix in DEFAULT_EXCLUDED_PREFIXES {
            self.config.excluded_prefixes.insert((*prefix).to_string());
        }
        self
    }

    pub fn with_settings(mut self, settings: &EngineSettings) -> Self {
        for prefix in &settings.packages_to_not_isolate {
            self = self.do_not_isolate_package(prefix);
        }
        self
    }

    /// Excludes every type whose name starts with `prefix`.
    pub fn do_not_isolate_package(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.config.excluded_prefixes.insert(prefix);
        }
        self
    }

    /// Forces one type into the domain.
    pub fn isolate_type(mut self, name: impl Into<TypeName>) -> Self {
        self.config.included_types.insert(name.into());
        self
    }

    /// Forces a package into the domain. `core.time` and `core.time.` are
    /// the same package.
    pub fn isolate_package(mut self, package: impl Into<String>) -> Self {
        let mut package = package.into();
        if package.is_empty() {
            return self;
        }
        if !package.ends_with('.') {
            package.push('.');
        }
        self.config.included_packages.insert(package);
        self
    }

    pub fn add_extra_substitute(mut self, substitute: impl Into<TypeName>) -> Self {
        self.config.extra_substitutes.insert(substitute.into());
        self
    }

    /// Applies a scope declaration's package inclusions.
    pub fn apply(mut self, declaration: Option<&SandboxConfig>) -> Self {
        if let Some(declaration) = declaration {
            for package in &declaration.instrumented_packages {
                self = self.isolate_package(package.clone());
            }
        }
        self
    }

    pub fn build(self) -> IsolationConfig {
        self.config
    }
}
