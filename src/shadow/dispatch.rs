//! Call dispatch for domain-local types.
//!
//! The domain hands every call on a local binding to its [`Dispatcher`].
//! [`ShadowDispatcher`] is the default: interceptors first, then the
//! domain's active substitution table, then the original body. The table is
//! read per call, so a replacement made before the domain starts is the one
//! that routes.

use std::sync::Arc;

use super::interceptor::Interceptors;
use crate::domain::Invocation;
use crate::errors::Result;
use crate::types::TypeRegistry;
use crate::value::Value;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, invocation: &Invocation<'_>) -> Result<Value>;
}

pub struct ShadowDispatcher {
    host: Arc<TypeRegistry>,
    interceptors: Arc<Interceptors>,
}

impl ShadowDispatcher {
    pub fn new(host: Arc<TypeRegistry>, interceptors: Arc<Interceptors>) -> Self {
        Self { host, interceptors }
    }
}

impl Dispatcher for ShadowDispatcher {
    fn dispatch(&self, invocation: &Invocation<'_>) -> Result<Value> {
        let type_name = invocation.type_name();
        if let Some(interceptor) = self.interceptors.find(type_name, invocation.method()) {
            log::trace!("intercepted {}#{}", type_name, invocation.method());
            return interceptor.intercept(invocation);
        }
        let table = invocation.domain().substitution_table();
        let Some(substitute) = table.substitute_for(type_name) else {
            return invocation.call_original();
        };
        let substitute = self.host.require(substitute)?;
        match substitute.method(invocation.method()) {
            Some(body) => body(invocation),
            // Substitutes only override what they declare.
            None => invocation.call_original(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationConfig;
    use crate::domain::Domain;
    use crate::shadow::{FnInterceptor, Interceptor, MethodRef, SubstitutionTable};
    use crate::types::{TypeDef, TypeName};

    fn host() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::new()
                .with(
                    TypeDef::builder("platform.os.Clock")
                        .method("now", 0, |_| Ok(Value::Int(1_700_000_000)))
                        .method("zone", 0, |_| Ok(Value::from("UTC")))
                        .build(),
                )
                .with(
                    TypeDef::builder("shadows.ShadowClock")
                        .substitutes("platform.os.Clock")
                        .method("now", 0, |inv| {
                            let real = inv.call_original()?.as_int().unwrap_or(0);
                            Ok(Value::Int(real - 1_700_000_000 + 42))
                        })
                        .build(),
                ),
        )
    }

    fn domain(interceptors: Interceptors) -> Domain {
        let host = host();
        let table = Arc::new(
            SubstitutionTable::empty()
                .with_extras(&host, &["shadows.ShadowClock".into()])
                .unwrap(),
        );
        let domain = Domain::new(IsolationConfig::default(), host.clone());
        let dispatcher = ShadowDispatcher::new(host, Arc::new(interceptors));
        domain.install(table, Arc::new(dispatcher));
        domain
    }

    #[test]
    fn substitute_methods_replace_originals() {
        let domain = domain(Interceptors::default());
        let clock = TypeName::new("platform.os.Clock");
        assert_eq!(domain.call(&clock, "now", &[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn undeclared_methods_fall_back_to_the_original() {
        let domain = domain(Interceptors::default());
        let clock = TypeName::new("platform.os.Clock");
        assert_eq!(domain.call(&clock, "zone", &[]).unwrap(), Value::from("UTC"));
    }

    #[test]
    fn interceptors_short_circuit_the_table() {
        let interceptor: Arc<dyn Interceptor> = Arc::new(FnInterceptor::new(
            vec![MethodRef::new("platform.os.Clock", "now")],
            |_| Ok(Value::Int(-1)),
        ));
        let domain = domain(Interceptors::new([interceptor]));
        let clock = TypeName::new("platform.os.Clock");
        assert_eq!(domain.call(&clock, "now", &[]).unwrap(), Value::Int(-1));
        assert_eq!(domain.call(&clock, "zone", &[]).unwrap(), Value::from("UTC"));
    }
}
