//! Recorded view transforms and the thread-local view replay policy.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::DispatchResult;
use crate::tensor::Tensor;

pub type ForwardFn = Arc<dyn Fn(&Tensor) -> DispatchResult<Tensor> + Send + Sync>;
pub type InverseFn = Arc<dyn Fn(&Tensor, &Tensor) -> DispatchResult<Tensor> + Send + Sync>;

/// One view step: how to derive the view from its base, and how to fold a mutated view back.
///
/// `forward(base)` returns the view. `inverse(base, mutated_view)` returns a new base with the
/// view's region replaced by `mutated_view`.
#[derive(Clone)]
pub struct ViewMeta {
    name: &'static str,
    forward: ForwardFn,
    inverse: InverseFn,
}

impl ViewMeta {
    pub fn new<F, I>(name: &'static str, forward: F, inverse: I) -> Self
    where
        F: Fn(&Tensor) -> DispatchResult<Tensor> + Send + Sync + 'static,
        I: Fn(&Tensor, &Tensor) -> DispatchResult<Tensor> + Send + Sync + 'static,
    {
        ViewMeta {
            name,
            forward: Arc::new(forward),
            inverse: Arc::new(inverse),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn forward(&self, base: &Tensor) -> DispatchResult<Tensor> {
        (self.forward)(base)
    }

    pub fn inverse(&self, base: &Tensor, mutated_view: &Tensor) -> DispatchResult<Tensor> {
        (self.inverse)(base, mutated_view)
    }
}

impl fmt::Debug for ViewMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewMeta").field("name", &self.name).finish()
    }
}

/// Replays `metas` over `base`, returning the final view.
pub fn replay_forward(base: &Tensor, metas: &[ViewMeta]) -> DispatchResult<Tensor> {
    metas
        .iter()
        .try_fold(base.clone(), |current, meta| meta.forward(&current))
}

/// Folds `mutated_view`, reached from `base` through `metas`, back into a new base.
pub fn replay_inverse(
    base: &Tensor,
    metas: &[ViewMeta],
    mutated_view: Tensor,
) -> DispatchResult<Tensor> {
    let Some((_, prefix)) = metas.split_last() else {
        return Ok(mutated_view);
    };
    let mut intermediates = Vec::with_capacity(metas.len());
    intermediates.push(base.clone());
    for meta in prefix {
        let next = meta.forward(intermediates.last().unwrap_or(base))?;
        intermediates.push(next);
    }
    metas
        .iter()
        .zip(intermediates.iter())
        .rev()
        .try_fold(mutated_view, |view, (meta, parent)| meta.inverse(parent, &view))
}

thread_local! {
    static REAPPLY_VIEWS: Cell<Option<bool>> = const { Cell::new(None) };
}

/// Thread-local override of the reapply-views policy, if one is active.
pub fn reapply_views_override() -> Option<bool> {
    REAPPLY_VIEWS.with(Cell::get)
}

/// RAII guard selecting whether recorded views replay as aliasing views or as copies.
pub struct ReapplyViewsGuard {
    previous: Option<bool>,
    _not_send: PhantomData<*const ()>,
}

impl ReapplyViewsGuard {
    pub fn new(reapply_views: bool) -> Self {
        let previous = REAPPLY_VIEWS.with(|cell| cell.replace(Some(reapply_views)));
        ReapplyViewsGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ReapplyViewsGuard {
    fn drop(&mut self) {
        REAPPLY_VIEWS.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::contiguous_strides;

    fn prefix_meta(len: usize) -> ViewMeta {
        let strides = contiguous_strides(&[len]).to_vec();
        let inverse_strides = strides.clone();
        ViewMeta::new(
            "prefix",
            move |base| base.as_strided_copy(&[len], &strides, None),
            move |base, view| base.as_strided_scatter(view, &[len], &inverse_strides, None),
        )
    }

    #[test]
    fn inverse_replay_folds_through_every_step() -> DispatchResult<()> {
        let base = Tensor::from_vec(&[6], vec![0i32, 1, 2, 3, 4, 5])?;
        let metas = vec![prefix_meta(4), prefix_meta(2)];
        assert_eq!(replay_forward(&base, &metas)?.to_vec::<i32>()?, vec![0, 1]);

        let mutated = Tensor::from_vec(&[2], vec![9i32, 8])?;
        let new_base = replay_inverse(&base, &metas, mutated)?;
        assert_eq!(new_base.to_vec::<i32>()?, vec![9, 8, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn reapply_guard_nests() {
        assert_eq!(reapply_views_override(), None);
        {
            let _outer = ReapplyViewsGuard::new(true);
            {
                let _inner = ReapplyViewsGuard::new(false);
                assert_eq!(reapply_views_override(), Some(false));
            }
            assert_eq!(reapply_views_override(), Some(true));
        }
        assert_eq!(reapply_views_override(), None);
    }
}
