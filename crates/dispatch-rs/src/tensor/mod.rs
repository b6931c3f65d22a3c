//! Host tensor model: dtypes, shapes, aliasable storage and strided tensors.

pub mod dense;
pub mod device;
pub mod dtype;
pub mod shape;
pub mod storage;

pub use dense::Tensor;
pub use device::{Device, DeviceKind};
pub use dtype::{check_alpha, promote_types, DType, Scalar};
pub use shape::{
    broadcast_shapes, broadcast_source_index, contiguous_strides, is_contiguous, numel,
    storage_nbytes_contiguous, storage_nbytes_strided, Dims,
};
pub use storage::{HostValues, Storage, StorageElement};
