//! Extension points of the runner.
//!
//! Every method of [`RunnerHooks`] has a default that gives the standard
//! behavior, so an implementation only overrides what it needs. The
//! per-test callbacks run on the sandbox thread; the factory methods run on
//! the caller's thread while the method's sandbox is being assembled.

use std::sync::Arc;

use crate::config::{EngineSettings, IsolationConfig, SandboxConfig};
use crate::domain::{Domain, Resolved};
use crate::errors::Result;
use crate::shadow::{Dispatcher, Interceptors, ShadowDispatcher, SubstitutionTable};
use crate::types::{TypeName, TypeRegistry};

use super::model::{TestClass, TestMethod};

/// What a per-test callback can see of the method being run.
pub struct MethodContext<'a> {
    pub class: &'a TestClass,
    pub method: &'a TestMethod,
    pub domain: &'a Arc<Domain>,
    /// The domain-local binding of the test class.
    pub instance: &'a Resolved,
}

pub trait RunnerHooks: Send + Sync + 'static {
    /// Substitutes declared by the class scope, then the method scope.
    fn extra_substitutes(&self, class: &TestClass, method: &TestMethod) -> Vec<TypeName> {
        SandboxConfig::merged_shadows(class.config.as_ref(), method.config.as_ref())
    }

    /// Default exclusions and the process-wide override, plus both scopes'
    /// instrumented packages. The declared target of every extra substitute
    /// is forced into the domain.
    fn create_isolation_config(
        &self,
        settings: &EngineSettings,
        host: &TypeRegistry,
        class: &TestClass,
        method: &TestMethod,
    ) -> Result<IsolationConfig> {
        let mut builder = IsolationConfig::defaults(settings)
            .apply(class.config.as_ref())
            .apply(method.config.as_ref());
        for extra in self.extra_substitutes(class, method) {
            let target = SubstitutionTable::declared_target(host, &extra)?;
            builder = builder.isolate_type(target).add_extra_substitute(extra);
        }
        Ok(builder.build())
    }

    /// The base table shared by every method of the run.
    fn create_substitution_table(&self) -> Result<Arc<SubstitutionTable>> {
        SubstitutionTable::base()
    }

    fn find_interceptors(&self) -> Interceptors {
        Interceptors::default()
    }

    /// The dispatcher routes through whichever table the domain holds when a
    /// call is made.
    fn create_dispatcher(&self, host: Arc<TypeRegistry>, interceptors: Arc<Interceptors>) -> Arc<dyn Dispatcher> {
        Arc::new(ShadowDispatcher::new(host, interceptors))
    }

    /// Runs with the method's domain as the
    /// [`AmbientContext`](crate::ambient::AmbientContext), like the body and
    /// `after_test`.
    fn before_test(&self, _ctx: &MethodContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs only if the test statement was reached.
    fn after_test(&self, _ctx: &MethodContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Always runs, after the ambient context has been restored. Failures
    /// are logged and never decide the outcome.
    fn finally_after_test(&self, _ctx: &MethodContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs once at the end of the run, after every class teardown.
    fn after_class(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl RunnerHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDef;

    fn host() -> TypeRegistry {
        TypeRegistry::new()
            .with(TypeDef::builder("core.Special").build())
            .with(
                TypeDef::builder("shadows.ShadowSpecial")
                    .substitutes("core.Special")
                    .build(),
            )
            .with(TypeDef::builder("shadows.Orphan").build())
    }

    #[test]
    fn extras_force_their_targets_into_the_domain() {
        let class = TestClass::new("app.SpecialTest")
            .config(SandboxConfig::new().shadow("shadows.ShadowSpecial"));
        let method = TestMethod::new("m");
        let config = DefaultHooks
            .create_isolation_config(&EngineSettings::default(), &host(), &class, &method)
            .unwrap();
        assert!(config.should_isolate(&"core.Special".into()));
        assert!(!config.should_isolate(&"core.Other".into()));
        assert_eq!(
            config.extra_substitutes().cloned().collect::<Vec<_>>(),
            vec![TypeName::new("shadows.ShadowSpecial")]
        );
    }

    #[test]
    fn extras_without_a_target_are_rejected() {
        let class = TestClass::new("app.SpecialTest");
        let method =
            TestMethod::new("m").config(SandboxConfig::new().shadow("shadows.Orphan"));
        let err = DefaultHooks
            .create_isolation_config(&EngineSettings::default(), &host(), &class, &method)
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
