//! Backend kernels for the native operator library.
//!
//! Binary arithmetic, comparison and logical ops run through the graph-cached
//! [`BinaryOpDispatcher`]; factories, copies, views and resizes operate on host tensors directly.

use std::sync::Arc;

use tracing::debug;

use crate::backend::GraphBackend;
use crate::dispatch::{pop_arguments, DispatchKey, Dispatcher, OperatorHandle, Stack, Value};
use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{broadcast_shapes, DType, Device, Tensor};

use super::binary::BinaryOpDispatcher;
use super::kind::{BinaryOpKind, RoundingMode};
use super::schemas::register_native_schemas;

/// Adapts a single-result kernel body to the boxed calling convention.
fn kernel<F>(
    body: F,
) -> impl Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()> + Send + Sync + 'static
where
    F: Fn(&[Value]) -> DispatchResult<Tensor> + Send + Sync + 'static,
{
    move |_, op, stack| {
        let args = pop_arguments(stack, op.schema().num_arguments)?;
        let result = body(&args)?;
        stack.push(result.into());
        Ok(())
    }
}

/// Tensor argument, or a scalar-like value promoted to a 0-dim tensor of its default dtype.
fn tensor_or_scalar(value: &Value) -> DispatchResult<Tensor> {
    match value {
        Value::Tensor(_) => value.to_tensor(),
        other => {
            let scalar = other.to_scalar()?;
            Ok(Tensor::scalar(scalar, scalar.default_dtype()))
        }
    }
}

fn binary_kernel<B>(
    binary: Arc<BinaryOpDispatcher<B>>,
    kind: BinaryOpKind,
) -> impl Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()> + Send + Sync + 'static
where
    B: GraphBackend + 'static,
{
    kernel(move |args| {
        let self_ = args[0].to_tensor()?;
        let other = tensor_or_scalar(&args[1])?;
        match kind {
            BinaryOpKind::Add | BinaryOpKind::Sub => {
                let alpha = args[2].to_scalar()?;
                binary.compute(kind, &self_, &other, Some(alpha))
            }
            BinaryOpKind::Div => {
                let kind = match RoundingMode::parse(args[2].to_optional_str()?)? {
                    Some(mode) => BinaryOpKind::DivRounding(mode),
                    None => BinaryOpKind::Div,
                };
                binary.compute(kind, &self_, &other, None)
            }
            _ => binary.compute(kind, &self_, &other, None),
        }
    })
}

fn add_inplace_kernel<B>(
    binary: Arc<BinaryOpDispatcher<B>>,
) -> impl Fn(&Dispatcher, &OperatorHandle, &mut Stack) -> DispatchResult<()> + Send + Sync + 'static
where
    B: GraphBackend + 'static,
{
    kernel(move |args| {
        let self_ = args[0].to_tensor()?;
        let other = tensor_or_scalar(&args[1])?;
        let alpha = args[2].to_scalar()?;
        let shape = broadcast_shapes(self_.sizes(), other.sizes())?;
        if shape.as_slice() != self_.sizes() {
            return Err(DispatchError::Shape(format!(
                "add_ result shape {:?} does not match self {:?}",
                shape.as_slice(),
                self_.sizes()
            )));
        }
        let mut output = self_.clone();
        binary.execute_binary_op(BinaryOpKind::Add, &self_, &other, Some(alpha), &mut output)?;
        Ok(output)
    })
}

fn zeros(args: &[Value]) -> DispatchResult<Tensor> {
    let size = args[0].to_dims()?;
    let dtype = args[1].to_optional_dtype()?.unwrap_or(DType::F32);
    let device = args[2].to_optional_device()?.unwrap_or_default();
    Ok(Tensor::zeros(&size, dtype).with_device(device))
}

fn full(args: &[Value]) -> DispatchResult<Tensor> {
    let size = args[0].to_dims()?;
    let fill_value = args[1].to_scalar()?;
    let dtype = args[2]
        .to_optional_dtype()?
        .unwrap_or(fill_value.default_dtype());
    let device = args[3].to_optional_device()?.unwrap_or_default();
    Ok(Tensor::full(&size, fill_value, dtype).with_device(device))
}

fn arange(args: &[Value]) -> DispatchResult<Tensor> {
    let start = args[0].to_int()?;
    let end = args[1].to_int()?;
    let dtype = args[2].to_optional_dtype()?.unwrap_or(DType::I64);
    let device = args[3].to_optional_device()?.unwrap_or_default();
    Ok(Tensor::arange(start, end, dtype)?.with_device(device))
}

fn fill_(args: &[Value]) -> DispatchResult<Tensor> {
    let self_ = args[0].to_tensor()?;
    self_.fill_(args[1].to_scalar()?);
    Ok(self_)
}

fn clone_contiguous(args: &[Value]) -> DispatchResult<Tensor> {
    Ok(args[0].to_tensor()?.clone_contiguous())
}

fn resize_(args: &[Value]) -> DispatchResult<Tensor> {
    let mut self_ = args[0].to_tensor()?;
    self_.resize_(&args[1].to_dims()?)?;
    Ok(self_)
}

/// Out-of-place resize: a contiguous copy of `self` resized to `size`.
fn resize_functional(args: &[Value]) -> DispatchResult<Tensor> {
    let mut resized = args[0].to_tensor()?.clone_contiguous();
    resized.resize_(&args[1].to_dims()?)?;
    Ok(resized)
}

fn to_copy(args: &[Value]) -> DispatchResult<Tensor> {
    let self_ = args[0].to_tensor()?;
    let dtype = args[1].to_optional_dtype()?;
    let device: Option<Device> = args[3].to_optional_device()?;
    Ok(self_.to_copy(dtype, device))
}

fn lift(args: &[Value]) -> DispatchResult<Tensor> {
    args[0].to_tensor()
}

fn as_strided(args: &[Value]) -> DispatchResult<Tensor> {
    args[0].to_tensor()?.as_strided(
        &args[1].to_dims()?,
        &args[2].to_dims()?,
        args[3].to_optional_offset()?,
    )
}

fn as_strided_copy(args: &[Value]) -> DispatchResult<Tensor> {
    args[0].to_tensor()?.as_strided_copy(
        &args[1].to_dims()?,
        &args[2].to_dims()?,
        args[3].to_optional_offset()?,
    )
}

fn as_strided_scatter(args: &[Value]) -> DispatchResult<Tensor> {
    let src = args[1].to_tensor()?;
    args[0].to_tensor()?.as_strided_scatter(
        &src,
        &args[2].to_dims()?,
        &args[3].to_dims()?,
        args[4].to_optional_offset()?,
    )
}

/// Registers native schemas and their [`DispatchKey::Backend`] kernels.
pub fn register_native_ops<B>(
    dispatcher: &Dispatcher,
    binary: Arc<BinaryOpDispatcher<B>>,
) -> DispatchResult<()>
where
    B: GraphBackend + 'static,
{
    register_native_schemas(dispatcher);
    let backend = DispatchKey::Backend;
    for kind in BinaryOpKind::ALL
        .into_iter()
        .filter(|kind| kind.rounding_mode().is_none())
    {
        dispatcher.register_kernel(kind.name(), backend, binary_kernel(Arc::clone(&binary), kind))?;
    }
    dispatcher.register_kernel("add_", backend, add_inplace_kernel(Arc::clone(&binary)))?;
    dispatcher.register_kernel("fill_", backend, kernel(fill_))?;
    dispatcher.register_kernel("zeros", backend, kernel(zeros))?;
    dispatcher.register_kernel("full", backend, kernel(full))?;
    dispatcher.register_kernel("arange", backend, kernel(arange))?;
    dispatcher.register_kernel("clone", backend, kernel(clone_contiguous))?;
    dispatcher.register_kernel("resize_", backend, kernel(resize_))?;
    dispatcher.register_kernel("resize_functional", backend, kernel(resize_functional))?;
    dispatcher.register_kernel("_to_copy", backend, kernel(to_copy))?;
    dispatcher.register_kernel("lift", backend, kernel(lift))?;
    dispatcher.register_kernel("as_strided", backend, kernel(as_strided))?;
    dispatcher.register_kernel("as_strided_copy", backend, kernel(as_strided_copy))?;
    dispatcher.register_kernel("as_strided_scatter", backend, kernel(as_strided_scatter))?;
    debug!(
        backend = binary.backend().backend_name(),
        "registered native backend kernels"
    );
    Ok(())
}
