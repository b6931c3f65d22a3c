pub mod backend;
pub mod config;
pub mod dispatch;
mod env;
pub mod error;
pub mod functionalize;
pub mod ops;
pub mod profiling;
pub mod tensor;

pub use backend::spec::GraphBackend;
pub use config::{DispatchConfig, FunctionalizeConfig, GraphCacheConfig};
pub use dispatch::{Dispatcher, Value};
pub use error::{DispatchError, DispatchResult};
pub use functionalize::{register_functionalization, FunctionalTensor};
pub use ops::{register_native_ops, BinaryOpDispatcher, BinaryOpKind, GraphCache};
pub use tensor::{DType, Device, DeviceKind, Scalar, Tensor};
