//! Boxed operator registry with per-key kernels and fallbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::error::{DispatchError, DispatchResult};

use super::keys::{tls_local_dispatch_key_set, DispatchKey};
use super::schema::OperatorSchema;
use super::value::{Stack, Value};

/// Kernel invoked with the arguments on top of `stack`; it must replace them with its returns.
pub type BoxedKernel =
    Arc<dyn Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()> + Send + Sync>;

/// Cheap handle to a registered operator.
#[derive(Clone)]
pub struct OperatorHandle {
    schema: Arc<OperatorSchema>,
}

impl OperatorHandle {
    pub fn schema(&self) -> &OperatorSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

impl fmt::Debug for OperatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OperatorHandle")
            .field(&self.schema.name)
            .finish()
    }
}

struct OperatorEntry {
    handle: OperatorHandle,
    kernels: HashMap<DispatchKey, BoxedKernel>,
}

/// Routes operator calls to the kernel registered for the active dispatch key.
///
/// The key is `Functionalize` when it is not excluded on this thread and either an argument is a
/// functional tensor or the thread's include set has it; otherwise `Backend`. A call resolves the
/// explicit kernel for (operator, key) first, then the fallback for the key.
#[derive(Default)]
pub struct Dispatcher {
    operators: RwLock<HashMap<String, OperatorEntry>>,
    fallbacks: RwLock<HashMap<DispatchKey, BoxedKernel>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `schema`, returning the existing handle if the name is already known.
    pub fn register_operator(&self, schema: OperatorSchema) -> OperatorHandle {
        let mut operators = self.operators.write().expect("operator registry poisoned");
        operators
            .entry(schema.name.clone())
            .or_insert_with(|| OperatorEntry {
                handle: OperatorHandle {
                    schema: Arc::new(schema),
                },
                kernels: HashMap::new(),
            })
            .handle
            .clone()
    }

    /// Installs (or replaces) the kernel for `name` under `key`.
    pub fn register_kernel<F>(&self, name: &str, key: DispatchKey, kernel: F) -> DispatchResult<()>
    where
        F: Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()>
            + Send
            + Sync
            + 'static,
    {
        let mut operators = self.operators.write().expect("operator registry poisoned");
        let entry = operators
            .get_mut(name)
            .ok_or_else(|| DispatchError::UnknownOperator(name.to_string()))?;
        entry.kernels.insert(key, Arc::new(kernel));
        Ok(())
    }

    /// Installs the kernel used for every operator without an explicit kernel under `key`.
    pub fn register_fallback<F>(&self, key: DispatchKey, kernel: F)
    where
        F: Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.fallbacks
            .write()
            .expect("fallback registry poisoned")
            .insert(key, Arc::new(kernel));
    }

    pub fn find(&self, name: &str) -> Option<OperatorHandle> {
        self.operators
            .read()
            .expect("operator registry poisoned")
            .get(name)
            .map(|entry| entry.handle.clone())
    }

    pub fn has_kernel(&self, name: &str, key: DispatchKey) -> bool {
        self.operators
            .read()
            .expect("operator registry poisoned")
            .get(name)
            .is_some_and(|entry| entry.kernels.contains_key(&key))
    }

    /// Calls `name` with `args` and returns its results.
    pub fn call(&self, name: &str, args: Vec<Value>) -> DispatchResult<Vec<Value>> {
        let op = self
            .find(name)
            .ok_or_else(|| DispatchError::UnknownOperator(name.to_string()))?;
        let mut stack = args;
        if stack.len() != op.schema().num_arguments {
            return Err(DispatchError::contract(format!(
                "{} expects {} arguments, got {}",
                op.name(),
                op.schema().num_arguments,
                stack.len()
            )));
        }
        self.call_boxed(&op, &mut stack)?;
        Ok(stack)
    }

    /// Dispatches `op` on the arguments at the top of `stack`.
    pub fn call_boxed(&self, op: &OperatorHandle, stack: &mut Stack) -> DispatchResult<()> {
        let num_arguments = op.schema().num_arguments;
        if stack.len() < num_arguments {
            return Err(DispatchError::contract(format!(
                "{} expects {num_arguments} arguments on the stack, found {}",
                op.name(),
                stack.len()
            )));
        }
        let arguments = &stack[stack.len() - num_arguments..];
        let any_functional = arguments.iter().any(Value::has_functional_tensor);
        let key = compute_dispatch_key(any_functional);
        if key == DispatchKey::Backend && any_functional {
            return Err(DispatchError::contract(format!(
                "functional tensor reached the backend kernel for {}",
                op.name()
            )));
        }
        let kernel = self.lookup(op, key)?;
        trace!(op = op.name(), key = %key, "dispatching");
        kernel(self, op, stack)
    }

    fn lookup(&self, op: &OperatorHandle, key: DispatchKey) -> DispatchResult<BoxedKernel> {
        let explicit = self
            .operators
            .read()
            .expect("operator registry poisoned")
            .get(op.name())
            .and_then(|entry| entry.kernels.get(&key).cloned());
        if let Some(kernel) = explicit {
            return Ok(kernel);
        }
        self.fallbacks
            .read()
            .expect("fallback registry poisoned")
            .get(&key)
            .cloned()
            .ok_or_else(|| DispatchError::MissingKernel {
                op: op.name().to_string(),
                key: key.to_string(),
            })
    }
}

fn compute_dispatch_key(any_functional: bool) -> DispatchKey {
    let local = tls_local_dispatch_key_set();
    let wants_functionalize =
        any_functional || local.included.has(DispatchKey::Functionalize);
    if wants_functionalize && !local.excluded.has(DispatchKey::Functionalize) {
        DispatchKey::Functionalize
    } else {
        DispatchKey::Backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::keys::{AutoDispatchSkipFunctionalize, IncludeDispatchKeyGuard};
    use crate::dispatch::value::pop_arguments;

    fn tagging_kernel(
        tag: &'static str,
    ) -> impl Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()> {
        move |_, op, stack| {
            pop_arguments(stack, op.schema().num_arguments)?;
            stack.push(Value::Str(tag.to_string()));
            Ok(())
        }
    }

    fn tag(values: &[Value]) -> Option<&str> {
        match values.first() {
            Some(Value::Str(tag)) => Some(tag.as_str()),
            _ => None,
        }
    }

    #[test]
    fn include_set_selects_functionalize_unless_excluded() -> DispatchResult<()> {
        let dispatcher = Dispatcher::new();
        dispatcher.register_operator(OperatorSchema::new("tagged", 0, 1));
        dispatcher.register_kernel("tagged", DispatchKey::Backend, tagging_kernel("backend"))?;
        dispatcher.register_fallback(DispatchKey::Functionalize, tagging_kernel("functionalize"));

        assert_eq!(tag(&dispatcher.call("tagged", vec![])?), Some("backend"));
        let _include = IncludeDispatchKeyGuard::new(DispatchKey::Functionalize);
        assert_eq!(tag(&dispatcher.call("tagged", vec![])?), Some("functionalize"));
        let _skip = AutoDispatchSkipFunctionalize::new();
        assert_eq!(tag(&dispatcher.call("tagged", vec![])?), Some("backend"));
        Ok(())
    }

    #[test]
    fn missing_kernel_and_unknown_operator_are_reported() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_operator(OperatorSchema::new("orphan", 0, 0));
        assert!(matches!(
            dispatcher.call("orphan", vec![]),
            Err(DispatchError::MissingKernel { .. })
        ));
        assert!(matches!(
            dispatcher.call("nope", vec![]),
            Err(DispatchError::UnknownOperator(_))
        ));
    }

    #[test]
    fn explicit_kernel_wins_over_fallback() -> DispatchResult<()> {
        let dispatcher = Dispatcher::new();
        dispatcher.register_operator(OperatorSchema::new("special", 0, 1));
        dispatcher.register_fallback(DispatchKey::Backend, tagging_kernel("fallback"));
        assert_eq!(tag(&dispatcher.call("special", vec![])?), Some("fallback"));
        dispatcher.register_kernel("special", DispatchKey::Backend, tagging_kernel("explicit"))?;
        assert_eq!(tag(&dispatcher.call("special", vec![])?), Some("explicit"));
        Ok(())
    }
}
