mod common;

use std::sync::Arc;

use common::*;
use shadowbox::prelude::*;
use shadowbox::shadow::{
    register_provider, FnInterceptor, Interceptor, Interceptors, MethodRef, StaticShadowProvider,
};

#[test]
fn extras_round_trip_back_to_the_base() {
    let host = platform_types();
    let base = base_table();

    let extended = base
        .with_extras(&host, &["shadows.ShadowFoo".into()])
        .unwrap();
    assert_eq!(extended.len(), base.len() + 1);
    assert_eq!(
        extended.substitute_for(&"platform.io.Foo".into()),
        Some(&TypeName::new("shadows.ShadowFoo"))
    );
    for (target, substitute) in base.entries() {
        assert_eq!(extended.substitute_for(&target), Some(&substitute));
    }

    let plain = base.with_extras(&host, &[]).unwrap();
    assert_eq!(&plain, base.as_ref());
    assert!(!plain.contains_target(&"platform.io.Foo".into()));
}

fn scoped_class() -> TestClass {
    TestClass::new("app.ScopedTest")
        .config(SandboxConfig::new().shadow("shadows.ShadowFoo"))
        .method(TestMethod::new("m").config(SandboxConfig::new().shadow("shadows.ShadowBar")))
        .method(TestMethod::new("n"))
}

#[test]
fn class_and_method_scopes_add_up() {
    let runner = runner(platform_types());
    let class = scoped_class();

    let for_m = runner
        .substitution_table_for(&class, class.find_method("m").unwrap())
        .unwrap();
    let for_n = runner
        .substitution_table_for(&class, class.find_method("n").unwrap())
        .unwrap();

    assert!(for_m.contains_target(&"platform.io.Foo".into()));
    assert!(for_m.contains_target(&"platform.io.Bar".into()));
    assert!(for_n.contains_target(&"platform.io.Foo".into()));
    assert!(!for_n.contains_target(&"platform.io.Bar".into()));
    assert!(for_n.contains_target(&"platform.os.Clock".into()));
}

fn observe_names(journal: &Journal) -> impl Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static {
    let journal = journal.clone();
    move |inv| {
        let foo = inv.call("platform.io.Foo", "name", &[])?;
        let bar = inv.call("platform.io.Bar", "name", &[])?;
        let now = inv.call("platform.os.Clock", "now", &[])?;
        journal.lock().unwrap().push(format!(
            "{} / {} / {now}",
            foo.as_str().unwrap_or_default(),
            bar.as_str().unwrap_or_default()
        ));
        Ok(())
    }
}

#[test]
fn scoped_substitutes_take_effect_in_test_code() {
    let journal = journal();
    let host = platform_types().with(
        TypeDef::builder("app.ScopedTest")
            .hook("m", observe_names(&journal))
            .hook("n", observe_names(&journal))
            .build(),
    );

    let report = runner(host).run(&[scoped_class()]);

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        entries(&journal),
        vec!["shadow foo / shadow bar / 42", "shadow foo / real bar / 42"]
    );
}

#[test]
fn invalid_extra_is_a_configuration_failure() {
    let host = platform_types().with(TypeDef::builder("app.BadExtraTest").hook("m", |_| Ok(())).build());
    let class = TestClass::new("app.BadExtraTest")
        .method(TestMethod::new("m").config(SandboxConfig::new().shadow("shadows.DoesNotExist")));

    let outcome = runner(host).run_method(&class, &class.methods[0]);

    let failure = outcome.failure().unwrap();
    assert!(failure.is_configuration());
    assert!(matches!(failure, SandboxError::UnknownType(name) if name.as_str() == "shadows.DoesNotExist"));
}

#[test]
fn provider_collisions_are_rejected() {
    let first: Arc<dyn ShadowProvider> =
        Arc::new(StaticShadowProvider::new("first").shadow("platform.io.Foo", "shadows.ShadowFoo"));
    let same: Arc<dyn ShadowProvider> =
        Arc::new(StaticShadowProvider::new("same").shadow("platform.io.Foo", "shadows.ShadowFoo"));
    let rival: Arc<dyn ShadowProvider> =
        Arc::new(StaticShadowProvider::new("rival").shadow("platform.io.Foo", "shadows.OtherFoo"));

    assert_eq!(
        SubstitutionTable::from_providers(&[first.clone(), same])
            .unwrap()
            .len(),
        1
    );
    let err = SubstitutionTable::from_providers(&[first, rival]).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(
        err.to_string(),
        "substitute collision: platform.io.Foo is substituted by both shadows.ShadowFoo and shadows.OtherFoo"
    );
}

struct CollidingProviders;

impl RunnerHooks for CollidingProviders {
    fn create_substitution_table(&self) -> Result<Arc<SubstitutionTable>> {
        let providers: Vec<Arc<dyn ShadowProvider>> = vec![
            Arc::new(StaticShadowProvider::new("a").shadow("platform.io.Bar", "shadows.ShadowBar")),
            Arc::new(StaticShadowProvider::new("b").shadow("platform.io.Bar", "shadows.ShadowFoo")),
        ];
        SubstitutionTable::from_providers(&providers).map(Arc::new)
    }
}

#[test]
fn runner_refuses_to_build_over_colliding_providers() {
    let result = SandboxTestRunner::builder(platform_types())
        .hooks(CollidingProviders)
        .build();
    assert!(matches!(result, Err(SandboxError::ProviderCollision { .. })));
}

#[test]
fn base_table_comes_from_registered_providers() {
    register_provider(Arc::new(
        StaticShadowProvider::new("registered-in-test").shadow("platform.media.Camera", "shadows.ShadowCamera"),
    ));
    SubstitutionTable::reset_base();

    let base = SubstitutionTable::base().unwrap();
    assert_eq!(
        base.substitute_for(&"platform.media.Camera".into()),
        Some(&TypeName::new("shadows.ShadowCamera"))
    );
    assert!(Arc::ptr_eq(&base, &SubstitutionTable::base().unwrap()));
}

struct FrozenClock;

impl RunnerHooks for FrozenClock {
    fn find_interceptors(&self) -> Interceptors {
        let frozen: Arc<dyn Interceptor> = Arc::new(FnInterceptor::new(
            vec![MethodRef::new("platform.os.Clock", "now")],
            |_| Ok(Value::Int(-1)),
        ));
        Interceptors::new([frozen])
    }
}

#[test]
fn interceptors_win_over_the_substitution_table() {
    init_logging();
    let host = platform_types().with(
        TypeDef::builder("app.ClockTest")
            .hook("m", |inv| {
                let now = inv.call("platform.os.Clock", "now", &[])?;
                ensure!(now == Value::Int(-1), "clock was not intercepted: {now}");
                Ok(())
            })
            .build(),
    );
    let class = TestClass::new("app.ClockTest").method(TestMethod::new("m"));
    let runner = SandboxTestRunner::builder(host)
        .base_table(base_table())
        .settings(EngineSettings::default())
        .hooks(FrozenClock)
        .build()
        .unwrap();

    assert!(runner.run(&[class]).is_success());
}
