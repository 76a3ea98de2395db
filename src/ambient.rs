//! Ambient type-resolution context of a sandbox thread.
//!
//! Code running on a sandbox thread resolves types through the domain that
//! is currently entered, which [`AmbientContext::current`] reports. Entering
//! returns an [`AmbientScope`]; dropping the scope restores whatever was
//! current before, on every exit path. The context is per thread, so a
//! scope never leaks into another sandbox.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::Domain;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Domain>>> = const { RefCell::new(None) };
}

/// Accessor for the calling thread's ambient domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientContext;

impl AmbientContext {
    /// The domain entered on this thread, if any.
    pub fn current() -> Option<Arc<Domain>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Makes `domain` current on this thread until the returned scope is
    /// dropped.
    pub fn enter(domain: Arc<Domain>) -> AmbientScope {
        let prior = CURRENT.with(|current| current.borrow_mut().replace(domain.clone()));
        log::trace!("{}: entered as ambient context", domain.id());
        AmbientScope {
            entered: domain,
            prior,
            _thread_bound: PhantomData,
        }
    }
}

#[must_use = "the prior context is restored as soon as the scope is dropped"]
pub struct AmbientScope {
    entered: Arc<Domain>,
    prior: Option<Arc<Domain>>,
    // Restoring must happen on the thread that entered.
    _thread_bound: PhantomData<*const ()>,
}

impl AmbientScope {
    pub fn domain(&self) -> &Arc<Domain> {
        &self.entered
    }

    pub fn prior(&self) -> Option<&Arc<Domain>> {
        self.prior.as_ref()
    }
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        let prior = self.prior.take();
        CURRENT.with(|current| *current.borrow_mut() = prior);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationConfig;
    use crate::types::TypeRegistry;

    fn domain() -> Arc<Domain> {
        Arc::new(Domain::new(
            IsolationConfig::default(),
            Arc::new(TypeRegistry::new()),
        ))
    }

    fn current_id() -> Option<crate::domain::DomainId> {
        AmbientContext::current().map(|d| d.id())
    }

    #[test]
    fn nested_scopes_restore_in_order() {
        let outer = domain();
        let inner = domain();
        {
            let scope = AmbientContext::enter(outer.clone());
            assert!(scope.prior().is_none());
            assert_eq!(current_id(), Some(outer.id()));
            {
                let scope = AmbientContext::enter(inner.clone());
                assert_eq!(scope.prior().map(|d| d.id()), Some(outer.id()));
                assert_eq!(current_id(), Some(inner.id()));
            }
            assert_eq!(current_id(), Some(outer.id()));
        }
        assert!(AmbientContext::current().is_none());
    }

    #[test]
    fn scope_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _scope = AmbientContext::enter(domain());
            panic!("body failed");
        });
        assert!(result.is_err());
        assert!(AmbientContext::current().is_none());
    }

    #[test]
    fn scopes_do_not_cross_threads() {
        let _scope = AmbientContext::enter(domain());
        let elsewhere = std::thread::spawn(|| AmbientContext::current().is_none())
            .join()
            .unwrap();
        assert!(elsewhere);
    }
}
