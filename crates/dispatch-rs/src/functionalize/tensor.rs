//! Functional tensor wrappers that simulate mutation and aliasing over copy-based kernels.
//!
//! Every wrapper points at a shared [`FunctionalStorage`] holding the alias group's base value.
//! Mutations are queued on the storage as updates and bump its generation; any wrapper whose
//! generation lags behind regenerates its value from the base by replaying its view metas.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::{DispatchError, DispatchResult};
use crate::tensor::{DType, Device, Tensor};

use super::view_meta::{replay_forward, replay_inverse, ViewMeta};

struct StorageUpdate {
    new_value: Tensor,
    view_metas: Vec<ViewMeta>,
}

/// Base value shared by an alias group, plus mutations not yet folded into it.
pub struct FunctionalStorage {
    base: Tensor,
    nbytes: usize,
    generation: u64,
    updates: Vec<StorageUpdate>,
}

impl FunctionalStorage {
    fn new(base: Tensor) -> Self {
        let nbytes = base.storage().nbytes();
        FunctionalStorage {
            base,
            nbytes,
            generation: 0,
            updates: Vec::new(),
        }
    }

    fn add_update(&mut self, new_value: Tensor, view_metas: Vec<ViewMeta>) {
        self.updates.push(StorageUpdate {
            new_value,
            view_metas,
        });
        self.generation += 1;
    }

    /// Folds queued updates into the base. Returns whether anything was applied.
    fn apply_updates(&mut self) -> DispatchResult<bool> {
        if self.updates.is_empty() {
            return Ok(false);
        }
        for update in std::mem::take(&mut self.updates) {
            self.base = replay_inverse(&self.base, &update.view_metas, update.new_value)?;
        }
        Ok(true)
    }
}

struct FunctionalInner {
    value: Tensor,
    storage: Arc<Mutex<FunctionalStorage>>,
    view_metas: Vec<ViewMeta>,
    generation: u64,
    has_metadata_mutation: bool,
    /// Created from another wrapper by a view operator, as opposed to a base whose view metas
    /// all come from its own in-place view steps.
    aliases_base: bool,
}

/// Shared handle to a functional tensor; clones refer to the same wrapper.
#[derive(Clone)]
pub struct FunctionalTensor {
    inner: Arc<Mutex<FunctionalInner>>,
}

impl FunctionalTensor {
    /// Wraps `value` as the base of a fresh alias group.
    pub fn wrap(value: Tensor) -> Self {
        let storage = Arc::new(Mutex::new(FunctionalStorage::new(value.clone())));
        Self::from_inner(FunctionalInner {
            value,
            storage,
            view_metas: Vec::new(),
            generation: 0,
            has_metadata_mutation: false,
            aliases_base: false,
        })
    }

    /// Creates a view of `base` whose value is `view_value`, sharing the base's storage.
    pub fn view_of(base: &FunctionalTensor, view_value: Tensor, meta: ViewMeta) -> Self {
        let base = base.lock();
        let mut view_metas = base.view_metas.clone();
        view_metas.push(meta);
        Self::from_inner(FunctionalInner {
            value: view_value,
            storage: Arc::clone(&base.storage),
            view_metas,
            generation: base.generation,
            has_metadata_mutation: false,
            aliases_base: true,
        })
    }

    fn from_inner(inner: FunctionalInner) -> Self {
        FunctionalTensor {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FunctionalInner> {
        self.inner.lock().expect("functional tensor poisoned")
    }

    /// Returns the wrapped tensor as of the last sync.
    pub fn unwrap(&self) -> Tensor {
        self.lock().value.clone()
    }

    pub fn dtype(&self) -> DType {
        self.lock().value.dtype()
    }

    pub fn device(&self) -> Device {
        self.lock().value.device()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.lock().value.sizes().to_vec()
    }

    pub fn storage_offset(&self) -> usize {
        self.lock().value.storage_offset()
    }

    /// Byte size of the alias group's storage, fixed when the storage was created.
    pub fn storage_nbytes(&self) -> usize {
        let inner = self.lock();
        let storage = inner.storage.lock().expect("functional storage poisoned");
        storage.nbytes
    }

    /// Reports whether this wrapper was produced by a view operator on another wrapper.
    pub fn is_view(&self) -> bool {
        self.lock().aliases_base
    }

    pub fn view_meta_names(&self) -> Vec<&'static str> {
        self.lock().view_metas.iter().map(ViewMeta::name).collect()
    }

    pub fn has_metadata_mutation(&self) -> bool {
        self.lock().has_metadata_mutation
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_up_to_date(&self) -> bool {
        let inner = self.lock();
        let storage = inner.storage.lock().expect("functional storage poisoned");
        inner.generation == storage.generation
    }

    /// Reports whether both wrappers belong to the same alias group.
    pub fn shares_storage_with(&self, other: &FunctionalTensor) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let a = Arc::clone(&self.lock().storage);
        let b = Arc::clone(&other.lock().storage);
        Arc::ptr_eq(&a, &b)
    }

    /// Reports whether both handles are the same wrapper.
    pub fn ptr_eq(&self, other: &FunctionalTensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Applies pending storage updates and regenerates this wrapper's value if it is stale.
    pub fn sync(&self) -> DispatchResult<()> {
        let mut inner = self.lock();
        let (base, generation) = {
            let mut storage = inner.storage.lock().expect("functional storage poisoned");
            if storage.apply_updates()? {
                trace!(generation = storage.generation, "applied functional storage updates");
            }
            (storage.base.clone(), storage.generation)
        };
        if inner.generation == generation {
            return Ok(());
        }
        let value = replay_forward(&base, &inner.view_metas)?;
        inner.value = cast_like(value, &inner.value);
        inner.generation = generation;
        trace!(
            generation,
            views = inner.view_metas.len(),
            "regenerated functional tensor from base"
        );
        Ok(())
    }

    /// Appends a metadata-only view step (an in-place view op) and applies it to the value.
    pub fn mutate_view_meta(&self, meta: ViewMeta) -> DispatchResult<()> {
        let mut inner = self.lock();
        let value = meta.forward(&inner.value)?;
        inner.view_metas.push(meta);
        inner.value = value;
        inner.has_metadata_mutation = true;
        Ok(())
    }

    /// Replaces the value with the result of an out-of-place computation.
    ///
    /// The new value keeps the wrapper's dtype. Call [`FunctionalTensor::commit_update`] to
    /// publish the change to the rest of the alias group.
    pub fn replace_(&self, value: Tensor) {
        let mut inner = self.lock();
        inner.value = cast_like(value, &inner.value);
    }

    /// Queues the current value as a mutation of the alias group.
    pub fn commit_update(&self) {
        let mut inner = self.lock();
        let value = inner.value.clone();
        let metas = inner.view_metas.clone();
        let generation = {
            let mut storage = inner.storage.lock().expect("functional storage poisoned");
            storage.add_update(value, metas);
            storage.generation
        };
        inner.generation = generation;
    }

    /// Moves this wrapper onto a fresh storage holding `value`.
    ///
    /// Used when a resize outgrows the current storage. Views cannot be moved: their alias
    /// group would observe a storage they never shared. A base drops the view steps left by
    /// earlier resizes, since the fresh storage holds its value directly.
    pub fn maybe_replace_storage(&self, value: Tensor) -> DispatchResult<()> {
        let mut inner = self.lock();
        if inner.aliases_base {
            return Err(DispatchError::contract(
                "attempted to resize a view tensor to a larger size; this is not allowed in the functionalization pass",
            ));
        }
        debug!(
            nbytes = value.storage().nbytes(),
            "replacing functional storage after growing resize"
        );
        inner.storage = Arc::new(Mutex::new(FunctionalStorage::new(value.clone())));
        inner.value = value;
        inner.view_metas.clear();
        inner.generation = 0;
        inner.has_metadata_mutation = false;
        Ok(())
    }
}

impl fmt::Debug for FunctionalTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("FunctionalTensor")
            .field("value", &inner.value)
            .field("views", &inner.view_metas.len())
            .field("generation", &inner.generation)
            .finish()
    }
}

fn cast_like(value: Tensor, like: &Tensor) -> Tensor {
    if value.dtype() == like.dtype() {
        value
    } else {
        value.to_copy(Some(like.dtype()), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{contiguous_strides, Scalar};

    fn narrow_meta(len: usize) -> ViewMeta {
        let strides = contiguous_strides(&[len]).to_vec();
        let scatter_strides = strides.clone();
        ViewMeta::new(
            "narrow",
            move |base| base.as_strided_copy(&[len], &strides, None),
            move |base, view| base.as_strided_scatter(view, &[len], &scatter_strides, None),
        )
    }

    #[test]
    fn wrap_then_unwrap_is_identity() -> DispatchResult<()> {
        let tensor = Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0])?;
        let wrapped = FunctionalTensor::wrap(tensor.clone());
        let unwrapped = wrapped.unwrap();
        assert!(unwrapped.is_alias_of(&tensor));
        assert_eq!(unwrapped.to_vec::<f32>()?, tensor.to_vec::<f32>()?);
        Ok(())
    }

    #[test]
    fn view_mutation_propagates_to_base_alias() -> DispatchResult<()> {
        let base = FunctionalTensor::wrap(Tensor::from_vec(&[4], vec![1i64, 2, 3, 4])?);
        let meta = narrow_meta(2);
        let view_value = meta.forward(&base.unwrap())?;
        let view = FunctionalTensor::view_of(&base, view_value, meta);
        assert!(view.shares_storage_with(&base));

        view.replace_(Tensor::full(&[2], Scalar::Int(0), DType::I64));
        view.commit_update();
        assert!(!base.is_up_to_date());

        base.sync()?;
        assert_eq!(base.unwrap().to_vec::<i64>()?, vec![0, 0, 3, 4]);
        assert!(base.is_up_to_date());
        Ok(())
    }

    #[test]
    fn growing_a_view_is_rejected() -> DispatchResult<()> {
        let base = FunctionalTensor::wrap(Tensor::zeros(&[4], DType::F32));
        let meta = narrow_meta(2);
        let view_value = meta.forward(&base.unwrap())?;
        let view = FunctionalTensor::view_of(&base, view_value, meta);
        let err = view.maybe_replace_storage(Tensor::zeros(&[8], DType::F32));
        assert!(matches!(err, Err(DispatchError::ContractViolation(_))));
        Ok(())
    }

    #[test]
    fn base_with_resize_steps_can_move_storage() -> DispatchResult<()> {
        let base = FunctionalTensor::wrap(Tensor::arange(0, 4, DType::I64)?);
        base.mutate_view_meta(narrow_meta(2))?;
        assert!(!base.is_view());

        base.maybe_replace_storage(Tensor::zeros(&[8], DType::I64))?;
        assert!(base.view_meta_names().is_empty());
        assert!(!base.has_metadata_mutation());
        assert_eq!(base.generation(), 0);
        assert_eq!(base.storage_nbytes(), 8 * DType::I64.size_in_bytes());
        Ok(())
    }

    #[test]
    fn replace_keeps_the_wrapper_dtype() -> DispatchResult<()> {
        let wrapped = FunctionalTensor::wrap(Tensor::zeros(&[2], DType::I32));
        wrapped.replace_(Tensor::from_vec(&[2], vec![1.5f64, -2.5])?);
        assert_eq!(wrapped.dtype(), DType::I32);
        assert_eq!(wrapped.unwrap().to_vec::<i32>()?, vec![1, -2]);
        Ok(())
    }
}
