//! # Substitution
//!
//! Everything that decides where a call on an isolated type ends up:
//!
//! - **`provider`**: pluggable sources of target → substitute mappings
//! - **`table`**: the immutable [`SubstitutionTable`] and the process-wide base
//! - **`interceptor`**: escape hatch for calls the table cannot express
//! - **`dispatch`**: the [`Dispatcher`] capability and its default implementation

pub mod dispatch;
pub mod interceptor;
pub mod provider;
pub mod table;

pub use dispatch::{Dispatcher, ShadowDispatcher};
pub use interceptor::{FnInterceptor, Interceptor, Interceptors, MethodRef};
pub use provider::{register_provider, registered_providers, ShadowProvider, StaticShadowProvider};
pub use table::{SubstitutionTable, SubstitutionTableBuilder};
