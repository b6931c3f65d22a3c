//! Boxed operator dispatch keyed by capability.

pub mod dispatcher;
pub mod keys;
pub mod schema;
pub mod value;

pub use dispatcher::{BoxedKernel, Dispatcher, OperatorHandle};
pub use keys::{
    tls_is_dispatch_key_excluded, tls_is_dispatch_key_included, tls_local_dispatch_key_set,
    AutoDispatchSkipFunctionalize, DispatchKey, DispatchKeySet, ExcludeDispatchKeyGuard,
    IncludeDispatchKeyGuard, LocalDispatchKeySet,
};
pub use schema::{AliasInfo, OperatorSchema};
pub use value::{pop_arguments, MemoryFormat, Stack, TensorArg, Value};
