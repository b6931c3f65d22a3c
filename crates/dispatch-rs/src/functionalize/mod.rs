//! Functionalization: runs mutating and aliasing programs on copy-only kernels.

mod fallback;
mod register;
mod rewrites;
mod tensor;
mod view_meta;

pub use fallback::functionalize_fallback;
pub use register::register_functionalization;
pub use rewrites::{
    add_functionalization, as_strided_functionalization, fill_functionalization,
    lift_functionalization, resize_functionalization, to_copy_functionalization,
};
pub use tensor::{FunctionalStorage, FunctionalTensor};
pub use view_meta::{
    reapply_views_override, replay_forward, replay_inverse, ReapplyViewsGuard, ViewMeta,
};
