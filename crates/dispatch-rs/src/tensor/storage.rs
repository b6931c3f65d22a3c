//! Shared byte storage and the element conversions host tensors rely on.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::dtype::{DType, Scalar};

/// Trait describing scalar types that can live inside a [`Storage`].
///
/// Implementations provide little-endian encoding so storages stay portable across hosts.
pub trait StorageElement: Copy + Default + Send + Sync + 'static {
    /// Dtype reported by tensors built from this element type.
    const DTYPE: DType;
    /// Encodes the element into `out`, which is exactly `DTYPE.size_in_bytes()` long.
    fn write_le(self, out: &mut [u8]);
    /// Decodes an element from exactly `DTYPE.size_in_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_storage_element {
    ($ty:ty, $dtype:expr) => {
        impl StorageElement for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_storage_element!(u8, DType::U8);
impl_storage_element!(i8, DType::I8);
impl_storage_element!(i16, DType::I16);
impl_storage_element!(i32, DType::I32);
impl_storage_element!(i64, DType::I64);
impl_storage_element!(f32, DType::F32);
impl_storage_element!(f64, DType::F64);

impl StorageElement for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Decodes the element stored at `bytes` as a scalar of its natural category.
pub(crate) fn read_scalar(bytes: &[u8], dtype: DType) -> Scalar {
    match dtype {
        DType::Bool => Scalar::Bool(bool::read_le(bytes)),
        DType::U8 => Scalar::Int(u8::read_le(bytes) as i64),
        DType::I8 => Scalar::Int(i8::read_le(bytes) as i64),
        DType::I16 => Scalar::Int(i16::read_le(bytes) as i64),
        DType::I32 => Scalar::Int(i32::read_le(bytes) as i64),
        DType::I64 => Scalar::Int(i64::read_le(bytes)),
        DType::F32 => Scalar::Float(f32::read_le(bytes) as f64),
        DType::F64 => Scalar::Float(f64::read_le(bytes)),
    }
}

/// Encodes `value` into `out`, casting it to `dtype` first.
pub(crate) fn write_scalar(out: &mut [u8], dtype: DType, value: Scalar) {
    match dtype {
        DType::Bool => value.to_bool().write_le(out),
        DType::U8 => (cast_int(value) as u8).write_le(out),
        DType::I8 => (cast_int(value) as i8).write_le(out),
        DType::I16 => (cast_int(value) as i16).write_le(out),
        DType::I32 => (cast_int(value) as i32).write_le(out),
        DType::I64 => cast_int(value).write_le(out),
        DType::F32 => (value.to_f64() as f32).write_le(out),
        DType::F64 => value.to_f64().write_le(out),
    }
}

fn cast_int(value: Scalar) -> i64 {
    match value {
        Scalar::Float(v) => v.trunc() as i64,
        other => other.to_i64(),
    }
}

/// Logical-order element buffer exchanged between tensors and host executors.
///
/// Integers of every width travel as `i64` and floats as `f64`, so arithmetic on the exchange
/// format is exact for every dtype the tensor model supports.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValues {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl HostValues {
    /// Builds a buffer of the category matching `dtype` from scalars.
    pub fn from_scalars<I: IntoIterator<Item = Scalar>>(dtype: DType, values: I) -> Self {
        let values = values.into_iter();
        if dtype == DType::Bool {
            HostValues::Bool(values.map(Scalar::to_bool).collect())
        } else if dtype.is_floating() {
            HostValues::Float(values.map(Scalar::to_f64).collect())
        } else {
            HostValues::Int(values.map(cast_int).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostValues::Bool(v) => v.len(),
            HostValues::Int(v) => v.len(),
            HostValues::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Scalar {
        match self {
            HostValues::Bool(v) => Scalar::Bool(v[index]),
            HostValues::Int(v) => Scalar::Int(v[index]),
            HostValues::Float(v) => Scalar::Float(v[index]),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Scalar> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// Reference-counted, interior-mutable byte buffer backing one or more tensors.
///
/// Cloning a storage aliases it; identity is pointer identity.
#[derive(Clone)]
pub struct Storage {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl Storage {
    /// Allocates a zero-initialised storage of `nbytes` bytes.
    pub fn zeroed(nbytes: usize) -> Self {
        Self::from_bytes(vec![0; nbytes])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Storage {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    pub fn nbytes(&self) -> usize {
        self.read().len()
    }

    /// Grows the allocation in place so every alias observes the larger buffer.
    pub fn grow_to(&self, nbytes: usize) {
        let mut bytes = self.write();
        if bytes.len() < nbytes {
            bytes.resize(nbytes, 0);
        }
    }

    pub fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Number of live handles (tensors and clones) referencing this allocation.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read().expect("tensor storage poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes.write().expect("tensor storage poisoned")
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("ptr", &Arc::as_ptr(&self.bytes))
            .field("nbytes", &self.nbytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_scalar_wraps_narrow_integers() {
        let mut out = [0u8; 1];
        write_scalar(&mut out, DType::I8, Scalar::Int(130));
        assert_eq!(read_scalar(&out, DType::I8), Scalar::Int(-126));
    }

    #[test]
    fn float_to_int_truncates() {
        let mut out = [0u8; 4];
        write_scalar(&mut out, DType::I32, Scalar::Float(-2.75));
        assert_eq!(read_scalar(&out, DType::I32), Scalar::Int(-2));
    }

    #[test]
    fn growing_storage_is_visible_through_aliases() {
        let storage = Storage::zeroed(8);
        let alias = storage.clone();
        storage.grow_to(32);
        assert_eq!(alias.nbytes(), 32);
        assert!(alias.ptr_eq(&storage));
    }
}
