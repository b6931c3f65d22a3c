//! Boxed fallback that functionalizes every operator without an explicit rewrite.

use tracing::trace;

use crate::dispatch::{
    AutoDispatchSkipFunctionalize, Dispatcher, OperatorHandle, Stack, TensorArg, Value,
};
use crate::error::{DispatchError, DispatchResult};
use crate::tensor::Tensor;

use super::tensor::FunctionalTensor;

/// Syncs and unwraps functional arguments, redispatches past `Functionalize`, and wraps the
/// returns when any input was functional or the call had no tensor inputs at all.
///
/// Mutating and aliasing operators must have explicit rewrites; reaching this fallback with one
/// is a contract violation.
pub fn functionalize_fallback(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
) -> DispatchResult<()> {
    let schema = op.schema();
    if schema.has_any_alias_info() {
        return Err(DispatchError::contract(format!(
            "{} mutates or aliases its inputs and needs an explicit functionalization kernel",
            schema.name
        )));
    }
    if stack.len() < schema.num_arguments {
        return Err(DispatchError::contract(format!(
            "{} expects {} arguments on the stack",
            schema.name, schema.num_arguments
        )));
    }

    let arguments_begin = stack.len() - schema.num_arguments;
    let mut any_tensor_inputs = false;
    let mut any_functional_inputs = false;
    for value in &mut stack[arguments_begin..] {
        match value {
            Value::Tensor(arg) => {
                any_tensor_inputs = true;
                if let Some(unwrapped) = sync_and_unwrap(arg)? {
                    any_functional_inputs = true;
                    *arg = TensorArg::Concrete(unwrapped);
                }
            }
            Value::TensorList(args) => {
                any_tensor_inputs = true;
                for arg in args.iter_mut() {
                    if let Some(unwrapped) = sync_and_unwrap(arg)? {
                        any_functional_inputs = true;
                        *arg = TensorArg::Concrete(unwrapped);
                    }
                }
            }
            Value::OptionalTensorList(args) => {
                any_tensor_inputs = true;
                for arg in args.iter_mut().flatten() {
                    if let Some(unwrapped) = sync_and_unwrap(arg)? {
                        any_functional_inputs = true;
                        *arg = TensorArg::Concrete(unwrapped);
                    }
                }
            }
            _ => {}
        }
    }
    let should_wrap_outputs = !any_tensor_inputs || any_functional_inputs;
    trace!(
        op = op.name(),
        should_wrap_outputs,
        "functionalize fallback redispatch"
    );

    {
        let _guard = AutoDispatchSkipFunctionalize::new();
        dispatcher.call_boxed(op, stack)?;
    }

    if !should_wrap_outputs {
        return Ok(());
    }
    if stack.len() < schema.num_returns {
        return Err(DispatchError::contract(format!(
            "{} left {} values on the stack but declares {} returns",
            schema.name,
            stack.len(),
            schema.num_returns
        )));
    }
    let returns_begin = stack.len() - schema.num_returns;
    for value in &mut stack[returns_begin..] {
        match value {
            Value::Tensor(arg) => wrap_in_place(arg),
            Value::TensorList(args) => args.iter_mut().for_each(wrap_in_place),
            Value::OptionalTensorList(args) => args.iter_mut().flatten().for_each(wrap_in_place),
            _ => {}
        }
    }
    Ok(())
}

/// Returns the synced concrete tensor behind a functional argument, or `None` for plain tensors.
pub(crate) fn sync_and_unwrap(arg: &TensorArg) -> DispatchResult<Option<Tensor>> {
    match arg {
        TensorArg::Functional(tensor) => {
            tensor.sync()?;
            Ok(Some(tensor.unwrap()))
        }
        TensorArg::Concrete(_) => Ok(None),
    }
}

fn wrap_in_place(arg: &mut TensorArg) {
    if let TensorArg::Concrete(tensor) = arg {
        *arg = TensorArg::Functional(FunctionalTensor::wrap(tensor.clone()));
    }
}
