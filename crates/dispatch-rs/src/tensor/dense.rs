//! Strided host tensor with shared, aliasable storage.

use smallvec::SmallVec;

use super::device::Device;
use super::dtype::{DType, Scalar};
use super::shape::{self, Dims};
use super::storage::{read_scalar, write_scalar, HostValues, Storage, StorageElement};
use crate::error::{DispatchError, DispatchResult};

/// Concrete tensor: a strided window onto a [`Storage`].
///
/// Cloning a tensor aliases its storage, so writes through one handle are visible through every
/// other handle viewing the same bytes. Metadata (sizes, strides, offset) belongs to the handle.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Storage,
    sizes: Dims,
    strides: Dims,
    storage_offset: usize,
    dtype: DType,
    device: Device,
}

impl Tensor {
    /// Builds a contiguous tensor from typed values, validating the length against `sizes`.
    pub fn from_vec<T: StorageElement>(sizes: &[usize], data: Vec<T>) -> DispatchResult<Self> {
        if data.len() != shape::numel(sizes) {
            return Err(DispatchError::Shape(format!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                sizes
            )));
        }
        let itemsize = T::DTYPE.size_in_bytes();
        let mut bytes = vec![0u8; data.len() * itemsize];
        for (value, chunk) in data.into_iter().zip(bytes.chunks_exact_mut(itemsize)) {
            value.write_le(chunk);
        }
        Ok(Self::from_storage(
            Storage::from_bytes(bytes),
            sizes,
            T::DTYPE,
        ))
    }

    /// Builds a contiguous tensor of `dtype` from logical-order host values.
    pub fn from_values(sizes: &[usize], dtype: DType, values: &HostValues) -> DispatchResult<Self> {
        let tensor = Self::zeros(sizes, dtype);
        tensor.write_values(values)?;
        Ok(tensor)
    }

    /// Zero-dimensional tensor holding `value` cast to `dtype`.
    pub fn scalar(value: Scalar, dtype: DType) -> Self {
        let tensor = Self::zeros(&[], dtype);
        tensor.fill_(value);
        tensor
    }

    pub fn zeros(sizes: &[usize], dtype: DType) -> Self {
        let nbytes = shape::numel(sizes) * dtype.size_in_bytes();
        Self::from_storage(Storage::zeroed(nbytes), sizes, dtype)
    }

    pub fn full(sizes: &[usize], value: Scalar, dtype: DType) -> Self {
        let tensor = Self::zeros(sizes, dtype);
        tensor.fill_(value);
        tensor
    }

    /// One-dimensional `[start, end)` sequence with unit step; empty when `end <= start`.
    pub fn arange(start: i64, end: i64, dtype: DType) -> DispatchResult<Self> {
        let len = end
            .checked_sub(start)
            .and_then(|len| usize::try_from(len.max(0)).ok())
            .ok_or_else(|| {
                DispatchError::Shape(format!("arange length overflows for [{start}, {end})"))
            })?;
        let tensor = Self::zeros(&[len], dtype);
        let values = HostValues::from_scalars(dtype, (start..end).map(Scalar::Int));
        tensor.write_values(&values)?;
        Ok(tensor)
    }

    fn from_storage(storage: Storage, sizes: &[usize], dtype: DType) -> Self {
        Tensor {
            storage,
            sizes: SmallVec::from_slice(sizes),
            strides: shape::contiguous_strides(sizes),
            storage_offset: 0,
            dtype,
            device: Device::cpu(),
        }
    }

    /// Returns the same tensor tagged with another device.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn storage_offset(&self) -> usize {
        self.storage_offset
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn numel(&self) -> usize {
        shape::numel(&self.sizes)
    }

    pub fn dim(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_contiguous(&self) -> bool {
        shape::is_contiguous(&self.sizes, &self.strides)
    }

    /// Reports whether both handles view the same storage allocation.
    pub fn is_alias_of(&self, other: &Tensor) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    /// Storage element indices in logical row-major order.
    fn element_offsets(&self) -> Vec<usize> {
        let count = self.numel();
        let rank = self.sizes.len();
        let mut offsets = Vec::with_capacity(count);
        if count == 0 {
            return offsets;
        }
        let mut coord = vec![0usize; rank];
        for _ in 0..count {
            let offset = self.storage_offset
                + coord
                    .iter()
                    .zip(self.strides.iter())
                    .map(|(c, s)| c * s)
                    .sum::<usize>();
            offsets.push(offset);
            for axis in (0..rank).rev() {
                coord[axis] += 1;
                if coord[axis] < self.sizes[axis] {
                    break;
                }
                coord[axis] = 0;
            }
        }
        offsets
    }

    /// Reads every element in logical order.
    pub fn read_values(&self) -> HostValues {
        let itemsize = self.dtype.size_in_bytes();
        let offsets = self.element_offsets();
        let bytes = self.storage.read();
        HostValues::from_scalars(
            self.dtype,
            offsets.into_iter().map(|offset| {
                let start = offset * itemsize;
                read_scalar(&bytes[start..start + itemsize], self.dtype)
            }),
        )
    }

    /// Writes logical-order values through this view, casting to the tensor dtype.
    pub fn write_values(&self, values: &HostValues) -> DispatchResult<()> {
        if values.len() != self.numel() {
            return Err(DispatchError::Shape(format!(
                "cannot write {} values into tensor of shape {:?}",
                values.len(),
                self.sizes.as_slice()
            )));
        }
        let itemsize = self.dtype.size_in_bytes();
        let offsets = self.element_offsets();
        let mut bytes = self.storage.write();
        for (index, offset) in offsets.into_iter().enumerate() {
            let start = offset * itemsize;
            write_scalar(
                &mut bytes[start..start + itemsize],
                self.dtype,
                values.get(index),
            );
        }
        Ok(())
    }

    /// Copies the elements out as `T`, which must match the tensor dtype.
    pub fn to_vec<T: StorageElement>(&self) -> DispatchResult<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(DispatchError::TypeMismatch(format!(
                "requested {:?} elements from a {:?} tensor",
                T::DTYPE,
                self.dtype
            )));
        }
        let itemsize = self.dtype.size_in_bytes();
        let offsets = self.element_offsets();
        let bytes = self.storage.read();
        Ok(offsets
            .into_iter()
            .map(|offset| T::read_le(&bytes[offset * itemsize..(offset + 1) * itemsize]))
            .collect())
    }

    /// Returns the single element of a one-element tensor.
    pub fn item(&self) -> DispatchResult<Scalar> {
        if self.numel() != 1 {
            return Err(DispatchError::Shape(format!(
                "item() requires exactly one element, tensor has shape {:?}",
                self.sizes.as_slice()
            )));
        }
        Ok(self.read_values().get(0))
    }

    /// Overwrites every element viewed by this tensor with `value`.
    pub fn fill_(&self, value: Scalar) {
        let values =
            HostValues::from_scalars(self.dtype, std::iter::repeat(value).take(self.numel()));
        self.write_values(&values)
            .expect("fill length matches tensor numel");
    }

    /// Copies `src` into this view, broadcasting and casting as needed.
    pub fn copy_from(&self, src: &Tensor) -> DispatchResult<()> {
        let target = shape::broadcast_shapes(src.sizes(), self.sizes())?;
        if target.as_slice() != self.sizes() {
            return Err(DispatchError::Shape(format!(
                "cannot copy shape {:?} into {:?}",
                src.sizes(),
                self.sizes()
            )));
        }
        let source = src.read_values();
        let src_strides = shape::contiguous_strides(src.sizes());
        let values = HostValues::from_scalars(
            self.dtype,
            (0..self.numel()).map(|flat| {
                source.get(shape::broadcast_source_index(
                    flat,
                    self.sizes(),
                    src.sizes(),
                    &src_strides,
                    0,
                ))
            }),
        );
        self.write_values(&values)
    }

    /// Dense copy into fresh storage, preserving dtype and device.
    pub fn clone_contiguous(&self) -> Tensor {
        self.to_copy(None, None)
    }

    /// Dense copy into fresh storage with optional dtype and device changes.
    pub fn to_copy(&self, dtype: Option<DType>, device: Option<Device>) -> Tensor {
        let dtype = dtype.unwrap_or(self.dtype);
        let out = Tensor::zeros(&self.sizes, dtype).with_device(device.unwrap_or(self.device));
        let values = self.read_values();
        let values = HostValues::from_scalars(dtype, values.iter());
        out.write_values(&values)
            .expect("copy length matches tensor numel");
        out
    }

    /// Aliasing view with explicit geometry.
    ///
    /// `storage_offset` defaults to this tensor's offset. The view must stay inside the storage.
    pub fn as_strided(
        &self,
        sizes: &[usize],
        strides: &[usize],
        storage_offset: Option<usize>,
    ) -> DispatchResult<Tensor> {
        if sizes.len() != strides.len() {
            return Err(DispatchError::Shape(format!(
                "as_strided rank mismatch: sizes {sizes:?}, strides {strides:?}"
            )));
        }
        let offset = storage_offset.unwrap_or(self.storage_offset);
        let itemsize = self.dtype.size_in_bytes();
        let needed = shape::storage_nbytes_strided(sizes, strides, itemsize, offset);
        let available = self.storage.nbytes();
        if needed > available {
            return Err(DispatchError::Shape(format!(
                "as_strided view needs {needed} bytes but storage holds {available}"
            )));
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            sizes: SmallVec::from_slice(sizes),
            strides: SmallVec::from_slice(strides),
            storage_offset: offset,
            dtype: self.dtype,
            device: self.device,
        })
    }

    /// Non-aliasing version of [`Tensor::as_strided`].
    pub fn as_strided_copy(
        &self,
        sizes: &[usize],
        strides: &[usize],
        storage_offset: Option<usize>,
    ) -> DispatchResult<Tensor> {
        Ok(self.as_strided(sizes, strides, storage_offset)?.clone_contiguous())
    }

    /// Returns a dense copy of `self` with `src` written into the strided window.
    ///
    /// An explicit `storage_offset` is expressed in `self`'s storage coordinates; `None` places
    /// the window at the start of `self`.
    pub fn as_strided_scatter(
        &self,
        src: &Tensor,
        sizes: &[usize],
        strides: &[usize],
        storage_offset: Option<usize>,
    ) -> DispatchResult<Tensor> {
        let output = self.clone_contiguous();
        let relative = match storage_offset {
            Some(offset) => Some(offset.checked_sub(self.storage_offset).ok_or_else(|| {
                DispatchError::Shape(format!(
                    "scatter offset {offset} precedes base offset {}",
                    self.storage_offset
                ))
            })?),
            None => None,
        };
        let window = output.as_strided(sizes, strides, relative)?;
        window.copy_from(src)?;
        Ok(output)
    }

    /// Resizes in place, growing the shared storage when the new shape needs more bytes.
    ///
    /// Strides become contiguous; existing elements keep their storage positions.
    pub fn resize_(&mut self, sizes: &[usize]) -> DispatchResult<()> {
        let needed = shape::storage_nbytes_contiguous(
            sizes,
            self.dtype.size_in_bytes(),
            self.storage_offset,
        );
        if needed > self.storage.nbytes() {
            self.storage.grow_to(needed);
        }
        self.sizes = SmallVec::from_slice(sizes);
        self.strides = shape::contiguous_strides(sizes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_alias_storage() -> DispatchResult<()> {
        let base = Tensor::from_vec(&[4], vec![1.0f32, 2.0, 3.0, 4.0])?;
        let view = base.as_strided(&[2], &[2], Some(1))?;
        assert_eq!(view.to_vec::<f32>()?, vec![2.0, 4.0]);
        view.fill_(Scalar::Float(0.0));
        assert_eq!(base.to_vec::<f32>()?, vec![1.0, 0.0, 3.0, 0.0]);
        Ok(())
    }

    #[test]
    fn arange_rejects_overflowing_bounds() -> DispatchResult<()> {
        assert_eq!(Tensor::arange(-2, 2, DType::I32)?.to_vec::<i32>()?, vec![-2, -1, 0, 1]);
        assert_eq!(Tensor::arange(5, 1, DType::I64)?.numel(), 0);
        let err = Tensor::arange(i64::MIN, i64::MAX, DType::I64);
        assert!(matches!(err, Err(DispatchError::Shape(_))));
        Ok(())
    }

    #[test]
    fn scatter_leaves_source_untouched() -> DispatchResult<()> {
        let base = Tensor::from_vec(&[4], vec![1i32, 2, 3, 4])?;
        let src = Tensor::from_vec(&[2], vec![9i32, 8])?;
        let out = base.as_strided_scatter(&src, &[2], &[1], None)?;
        assert_eq!(out.to_vec::<i32>()?, vec![9, 8, 3, 4]);
        assert_eq!(base.to_vec::<i32>()?, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn resize_grows_shared_storage() -> DispatchResult<()> {
        let mut tensor = Tensor::from_vec(&[2], vec![5i64, 6])?;
        let alias = tensor.clone();
        tensor.resize_(&[2, 3])?;
        assert_eq!(tensor.numel(), 6);
        assert_eq!(alias.storage().nbytes(), 48);
        assert_eq!(tensor.to_vec::<i64>()?[..2], [5, 6]);
        Ok(())
    }

    #[test]
    fn copy_from_broadcasts_and_casts() -> DispatchResult<()> {
        let dst = Tensor::zeros(&[2, 2], DType::F32);
        let src = Tensor::from_vec(&[2], vec![1i32, 2])?;
        dst.copy_from(&src)?;
        assert_eq!(dst.to_vec::<f32>()?, vec![1.0, 2.0, 1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn transposed_view_reads_logical_order() -> DispatchResult<()> {
        let base = Tensor::from_vec(&[2, 3], vec![0i32, 1, 2, 3, 4, 5])?;
        let transposed = base.as_strided(&[3, 2], &[1, 3], None)?;
        assert!(!transposed.is_contiguous());
        assert_eq!(transposed.to_vec::<i32>()?, vec![0, 3, 1, 4, 2, 5]);
        Ok(())
    }
}
