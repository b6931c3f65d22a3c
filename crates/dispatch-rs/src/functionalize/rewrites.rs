//! Functionalization kernels for operators the boxed fallback cannot handle.
//!
//! In-place and view operators mutate or alias their inputs, so each gets a dedicated kernel that
//! computes the result out of place and records the effect on the functional wrapper.

use tracing::{debug, trace};

use crate::config::FunctionalizeConfig;
use crate::dispatch::{
    pop_arguments, tls_is_dispatch_key_included, AutoDispatchSkipFunctionalize, DispatchKey,
    Dispatcher, OperatorHandle, Stack, TensorArg, Value,
};
use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{contiguous_strides, storage_nbytes_contiguous, DeviceKind, Tensor};

use super::fallback::sync_and_unwrap;
use super::tensor::FunctionalTensor;
use super::view_meta::{reapply_views_override, ViewMeta};

/// Calls `name` past the `Functionalize` key and returns its single tensor result.
fn redispatch(dispatcher: &Dispatcher, name: &str, args: Vec<Value>) -> DispatchResult<Tensor> {
    let _guard = AutoDispatchSkipFunctionalize::new();
    single_tensor(name, dispatcher.call(name, args)?)
}

fn single_tensor(name: &str, returns: Vec<Value>) -> DispatchResult<Tensor> {
    match returns.first() {
        Some(value) => value.to_tensor(),
        None => Err(DispatchError::contract(format!("{name} returned no values"))),
    }
}

fn reapply_views(config: &FunctionalizeConfig) -> bool {
    reapply_views_override().unwrap_or(config.reapply_views)
}

/// `resize_(self, size, memory_format?)`.
///
/// A resize that fits in the current storage becomes an `as_strided` view step on the wrapper;
/// one that outgrows it moves the wrapper onto a fresh storage.
pub fn resize_functionalization(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
    config: &FunctionalizeConfig,
) -> DispatchResult<()> {
    let args = pop_arguments(stack, op.schema().num_arguments)?;
    let self_ft = match args[0].as_tensor_arg()? {
        TensorArg::Functional(tensor) => tensor.clone(),
        TensorArg::Concrete(_) => {
            let resized = redispatch(dispatcher, op.name(), args)?;
            stack.push(resized.into());
            return Ok(());
        }
    };
    let size = args[1].to_dims()?;

    self_ft.sync()?;
    let self_ = self_ft.unwrap();
    let resized = redispatch(
        dispatcher,
        "resize_functional",
        vec![self_.clone().into(), args[1].clone(), args[2].clone()],
    )?;

    let itemsize = self_.dtype().size_in_bytes();
    let new_bytes = storage_nbytes_contiguous(&size, itemsize, self_.storage_offset());
    let current_bytes = self_ft.storage_nbytes();
    if new_bytes > current_bytes {
        debug!(new_bytes, current_bytes, ?size, "functional resize outgrows storage");
        self_ft.maybe_replace_storage(resized)?;
    } else {
        trace!(new_bytes, current_bytes, ?size, "functional resize within storage");
        self_ft.mutate_view_meta(resize_view_meta(size, reapply_views(config)))?;
    }
    stack.push(self_ft.into());
    Ok(())
}

/// View step that reinterprets the base as a contiguous tensor of `size`.
fn resize_view_meta(size: Vec<usize>, reapply_views: bool) -> ViewMeta {
    let strides = contiguous_strides(&size).to_vec();
    let inverse_size = size.clone();
    let inverse_strides = strides.clone();
    ViewMeta::new(
        "resize_",
        move |base| {
            if reapply_views {
                base.as_strided(&size, &strides, None)
            } else {
                base.as_strided_copy(&size, &strides, None)
            }
        },
        move |base, mutated_view| {
            base.as_strided_scatter(mutated_view, &inverse_size, &inverse_strides, None)
        },
    )
}

/// `lift(self)`: wraps a plain tensor. Lifting a tensor that is already functional is a
/// contract violation.
pub fn lift_functionalization(
    _dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
) -> DispatchResult<()> {
    let args = pop_arguments(stack, op.schema().num_arguments)?;
    match args[0].as_tensor_arg()? {
        TensorArg::Functional(_) => Err(DispatchError::contract(
            "lift expects a non-functional tensor, but got an already wrapped one",
        )),
        TensorArg::Concrete(tensor) => {
            stack.push(FunctionalTensor::wrap(tensor.clone()).into());
            Ok(())
        }
    }
}

/// `_to_copy(self, dtype?, layout?, device?, pin_memory?, non_blocking, memory_format?)`.
///
/// The copy stays wrapped while `Functionalize` is in the thread's include set or when the target
/// device is opted in; otherwise the plain copy escapes the pass.
pub fn to_copy_functionalization(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
    config: &FunctionalizeConfig,
) -> DispatchResult<()> {
    let mut args = pop_arguments(stack, op.schema().num_arguments)?;
    let self_arg = args[0].as_tensor_arg()?.clone();
    let self_ = match sync_and_unwrap(&self_arg)? {
        Some(unwrapped) => unwrapped,
        None => self_arg.concrete()?.clone(),
    };
    let target_device = args[3].to_optional_device()?.unwrap_or(self_.device());
    args[0] = self_.into();

    let out = redispatch(dispatcher, op.name(), args)?;
    let keep_wrapped = tls_is_dispatch_key_included(DispatchKey::Functionalize)
        || is_opted_in(config, target_device.kind);
    trace!(device = %target_device, keep_wrapped, "functionalized _to_copy");
    if keep_wrapped {
        stack.push(FunctionalTensor::wrap(out).into());
    } else {
        stack.push(out.into());
    }
    Ok(())
}

fn is_opted_in(config: &FunctionalizeConfig, kind: DeviceKind) -> bool {
    config.opted_in_devices.contains(&kind)
}

/// `as_strided(self, size, stride, storage_offset?)`: records the view on the alias group.
pub fn as_strided_functionalization(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
    config: &FunctionalizeConfig,
) -> DispatchResult<()> {
    let args = pop_arguments(stack, op.schema().num_arguments)?;
    let self_ft = match args[0].as_tensor_arg()? {
        TensorArg::Functional(tensor) => tensor.clone(),
        TensorArg::Concrete(_) => {
            let view = redispatch(dispatcher, op.name(), args)?;
            stack.push(view.into());
            return Ok(());
        }
    };
    let size = args[1].to_dims()?;
    let stride = args[2].to_dims()?;
    let offset = args[3].to_optional_offset()?;

    self_ft.sync()?;
    let reapply = reapply_views(config);
    let name = if reapply { "as_strided" } else { "as_strided_copy" };
    let mut view_args = args;
    view_args[0] = self_ft.unwrap().into();
    let view_value = redispatch(dispatcher, name, view_args)?;

    let (inverse_size, inverse_stride) = (size.clone(), stride.clone());
    let meta = ViewMeta::new(
        "as_strided",
        move |base| {
            if reapply {
                base.as_strided(&size, &stride, offset)
            } else {
                base.as_strided_copy(&size, &stride, offset)
            }
        },
        move |base, mutated_view| {
            base.as_strided_scatter(mutated_view, &inverse_size, &inverse_stride, offset)
        },
    );
    stack.push(FunctionalTensor::view_of(&self_ft, view_value, meta).into());
    Ok(())
}

/// Shared body of in-place rewrites: `compute` produces the new value of `self` from the
/// unwrapped arguments, which is then committed to the alias group.
fn inplace_functionalization<F>(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
    compute: F,
) -> DispatchResult<()>
where
    F: FnOnce(&Dispatcher, Vec<Value>) -> DispatchResult<Tensor>,
{
    let mut args = pop_arguments(stack, op.schema().num_arguments)?;
    let self_ft = match args[0].as_tensor_arg()? {
        TensorArg::Functional(tensor) => tensor.clone(),
        TensorArg::Concrete(_) => {
            if args[1..].iter().any(Value::has_functional_tensor) {
                return Err(DispatchError::contract(format!(
                    "{} would mutate a non-functional tensor with a functional one",
                    op.name()
                )));
            }
            let result = redispatch(dispatcher, op.name(), args)?;
            stack.push(result.into());
            return Ok(());
        }
    };
    for value in args.iter_mut() {
        if let Value::Tensor(arg) = value {
            if let Some(unwrapped) = sync_and_unwrap(arg)? {
                *arg = TensorArg::Concrete(unwrapped);
            }
        }
    }

    let updated = {
        let _guard = AutoDispatchSkipFunctionalize::new();
        compute(dispatcher, args)?
    };
    self_ft.replace_(updated);
    self_ft.commit_update();
    self_ft.sync()?;
    trace!(op = op.name(), generation = self_ft.generation(), "committed in-place update");
    stack.push(self_ft.into());
    Ok(())
}

/// `fill_(self, value)` as `fill_(clone(self), value)`.
pub fn fill_functionalization(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
) -> DispatchResult<()> {
    inplace_functionalization(dispatcher, op, stack, |dispatcher, args| {
        let cloned = dispatcher.call("clone", vec![args[0].clone(), Value::None])?;
        let cloned = single_tensor("clone", cloned)?;
        single_tensor(
            "fill_",
            dispatcher.call("fill_", vec![cloned.into(), args[1].clone()])?,
        )
    })
}

/// `add_(self, other, alpha)` as `add(self, other, alpha)`.
pub fn add_functionalization(
    dispatcher: &Dispatcher,
    op: &OperatorHandle,
    stack: &mut Stack,
) -> DispatchResult<()> {
    inplace_functionalization(dispatcher, op, stack, |dispatcher, args| {
        single_tensor("add", dispatcher.call("add", args)?)
    })
}
