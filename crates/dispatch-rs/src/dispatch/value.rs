//! Boxed argument and return values passed through the dispatcher stack.

use crate::error::{DispatchError, DispatchResult};
use crate::functionalize::FunctionalTensor;
use crate::tensor::{DType, Device, Scalar, Tensor};

/// Requested memory layout for freshly allocated results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryFormat {
    Contiguous,
    Preserve,
}

/// Tensor argument that is either a plain tensor or a functional wrapper.
#[derive(Debug, Clone)]
pub enum TensorArg {
    Concrete(Tensor),
    Functional(FunctionalTensor),
}

impl TensorArg {
    pub fn is_functional(&self) -> bool {
        matches!(self, TensorArg::Functional(_))
    }

    /// Returns the plain tensor; functional wrappers are a contract violation here.
    pub fn concrete(&self) -> DispatchResult<&Tensor> {
        match self {
            TensorArg::Concrete(tensor) => Ok(tensor),
            TensorArg::Functional(_) => Err(DispatchError::contract(
                "functional tensor reached a kernel that expects a concrete tensor",
            )),
        }
    }

    pub fn functional(&self) -> Option<&FunctionalTensor> {
        match self {
            TensorArg::Functional(tensor) => Some(tensor),
            TensorArg::Concrete(_) => None,
        }
    }
}

impl From<Tensor> for TensorArg {
    fn from(tensor: Tensor) -> Self {
        TensorArg::Concrete(tensor)
    }
}

impl From<FunctionalTensor> for TensorArg {
    fn from(tensor: FunctionalTensor) -> Self {
        TensorArg::Functional(tensor)
    }
}

/// Boxed value on the dispatcher stack.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    Scalar(Scalar),
    IntList(Vec<i64>),
    DType(DType),
    Device(Device),
    MemoryFormat(MemoryFormat),
    Str(String),
    Tensor(TensorArg),
    TensorList(Vec<TensorArg>),
    OptionalTensorList(Vec<Option<TensorArg>>),
}

/// Arguments are pushed in order; a kernel pops them and pushes its returns.
pub type Stack = Vec<Value>;

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Double(_) => "Double",
            Value::Scalar(_) => "Scalar",
            Value::IntList(_) => "IntList",
            Value::DType(_) => "DType",
            Value::Device(_) => "Device",
            Value::MemoryFormat(_) => "MemoryFormat",
            Value::Str(_) => "Str",
            Value::Tensor(_) => "Tensor",
            Value::TensorList(_) => "TensorList",
            Value::OptionalTensorList(_) => "OptionalTensorList",
        }
    }

    /// Reports whether this value is or contains a functional tensor.
    pub fn has_functional_tensor(&self) -> bool {
        match self {
            Value::Tensor(arg) => arg.is_functional(),
            Value::TensorList(args) => args.iter().any(TensorArg::is_functional),
            Value::OptionalTensorList(args) => {
                args.iter().flatten().any(TensorArg::is_functional)
            }
            _ => false,
        }
    }

    pub fn as_tensor_arg(&self) -> DispatchResult<&TensorArg> {
        match self {
            Value::Tensor(arg) => Ok(arg),
            other => Err(unexpected("Tensor", other)),
        }
    }

    /// Plain tensor argument, as seen by backend kernels.
    pub fn to_tensor(&self) -> DispatchResult<Tensor> {
        self.as_tensor_arg()?.concrete().cloned()
    }

    pub fn to_functional(&self) -> DispatchResult<FunctionalTensor> {
        match self.as_tensor_arg()? {
            TensorArg::Functional(tensor) => Ok(tensor.clone()),
            TensorArg::Concrete(_) => Err(DispatchError::contract(
                "expected a functional tensor argument",
            )),
        }
    }

    pub fn to_tensor_list(&self) -> DispatchResult<Vec<Tensor>> {
        match self {
            Value::TensorList(args) => args.iter().map(|arg| arg.concrete().cloned()).collect(),
            other => Err(unexpected("TensorList", other)),
        }
    }

    /// Scalar-like values: `Scalar`, `Int`, `Double` and `Bool`.
    pub fn to_scalar(&self) -> DispatchResult<Scalar> {
        match self {
            Value::Scalar(value) => Ok(*value),
            Value::Int(value) => Ok(Scalar::Int(*value)),
            Value::Double(value) => Ok(Scalar::Float(*value)),
            Value::Bool(value) => Ok(Scalar::Bool(*value)),
            other => Err(unexpected("Scalar", other)),
        }
    }

    pub fn to_int(&self) -> DispatchResult<i64> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(unexpected("Int", other)),
        }
    }

    pub fn to_bool(&self) -> DispatchResult<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            other => Err(unexpected("Bool", other)),
        }
    }

    /// Non-negative integer list, typically sizes or strides.
    pub fn to_dims(&self) -> DispatchResult<Vec<usize>> {
        match self {
            Value::IntList(values) => values
                .iter()
                .map(|&v| {
                    usize::try_from(v).map_err(|_| {
                        DispatchError::Shape(format!("negative dimension {v} in {values:?}"))
                    })
                })
                .collect(),
            other => Err(unexpected("IntList", other)),
        }
    }

    pub fn to_optional_int(&self) -> DispatchResult<Option<i64>> {
        match self {
            Value::None => Ok(None),
            other => other.to_int().map(Some),
        }
    }

    /// Optional non-negative storage offset.
    pub fn to_optional_offset(&self) -> DispatchResult<Option<usize>> {
        self.to_optional_int()?
            .map(|offset| {
                usize::try_from(offset).map_err(|_| {
                    DispatchError::Shape(format!("negative storage offset {offset}"))
                })
            })
            .transpose()
    }

    pub fn to_optional_dtype(&self) -> DispatchResult<Option<DType>> {
        match self {
            Value::None => Ok(None),
            Value::DType(dtype) => Ok(Some(*dtype)),
            other => Err(unexpected("DType?", other)),
        }
    }

    pub fn to_optional_device(&self) -> DispatchResult<Option<Device>> {
        match self {
            Value::None => Ok(None),
            Value::Device(device) => Ok(Some(*device)),
            other => Err(unexpected("Device?", other)),
        }
    }

    pub fn to_optional_str(&self) -> DispatchResult<Option<&str>> {
        match self {
            Value::None => Ok(None),
            Value::Str(value) => Ok(Some(value.as_str())),
            other => Err(unexpected("Str?", other)),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

fn unexpected(expected: &str, found: &Value) -> DispatchError {
    DispatchError::contract(format!(
        "expected {expected} argument, found {}",
        found.kind()
    ))
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(TensorArg::Concrete(tensor))
    }
}

impl From<FunctionalTensor> for Value {
    fn from(tensor: FunctionalTensor) -> Self {
        Value::Tensor(TensorArg::Functional(tensor))
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Value::Scalar(value)
    }
}

impl From<DType> for Value {
    fn from(dtype: DType) -> Self {
        Value::DType(dtype)
    }
}

impl From<Device> for Value {
    fn from(device: Device) -> Self {
        Value::Device(device)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&[usize]> for Value {
    fn from(dims: &[usize]) -> Self {
        Value::IntList(dims.iter().map(|&d| d as i64).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

/// Removes the last `count` values from `stack`, preserving their order.
pub fn pop_arguments(stack: &mut Stack, count: usize) -> DispatchResult<Vec<Value>> {
    if stack.len() < count {
        return Err(DispatchError::contract(format!(
            "stack holds {} values but {count} arguments were expected",
            stack.len()
        )));
    }
    let start = stack.len() - count;
    Ok(stack.split_off(start))
}
