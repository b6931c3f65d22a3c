use std::sync::Arc;

use tracing::debug;

use crate::config::FunctionalizeConfig;
use crate::dispatch::{DispatchKey, Dispatcher};
use crate::error::DispatchResult;
use crate::ops::register_native_schemas;

use super::fallback::functionalize_fallback;
use super::rewrites::{
    add_functionalization, as_strided_functionalization, fill_functionalization,
    lift_functionalization, resize_functionalization, to_copy_functionalization,
};

/// Installs the functionalization fallback and the explicit rewrites under
/// [`DispatchKey::Functionalize`].
pub fn register_functionalization(
    dispatcher: &Dispatcher,
    config: FunctionalizeConfig,
) -> DispatchResult<()> {
    register_native_schemas(dispatcher);
    dispatcher.register_fallback(DispatchKey::Functionalize, functionalize_fallback);

    let config = Arc::new(config);
    let resize_config = Arc::clone(&config);
    dispatcher.register_kernel("resize_", DispatchKey::Functionalize, move |d, op, stack| {
        resize_functionalization(d, op, stack, &resize_config)
    })?;
    let to_copy_config = Arc::clone(&config);
    dispatcher.register_kernel("_to_copy", DispatchKey::Functionalize, move |d, op, stack| {
        to_copy_functionalization(d, op, stack, &to_copy_config)
    })?;
    let as_strided_config = Arc::clone(&config);
    dispatcher.register_kernel("as_strided", DispatchKey::Functionalize, move |d, op, stack| {
        as_strided_functionalization(d, op, stack, &as_strided_config)
    })?;
    dispatcher.register_kernel("lift", DispatchKey::Functionalize, lift_functionalization)?;
    dispatcher.register_kernel("fill_", DispatchKey::Functionalize, fill_functionalization)?;
    dispatcher.register_kernel("add_", DispatchKey::Functionalize, add_functionalization)?;

    debug!(
        reapply_views = config.reapply_views,
        opted_in_devices = ?config.opted_in_devices,
        "registered functionalization kernels"
    );
    Ok(())
}
