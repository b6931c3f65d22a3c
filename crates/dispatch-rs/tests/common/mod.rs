#![allow(dead_code)]

use std::sync::Arc;

use dispatch_rs::config::FunctionalizeConfig;
use dispatch_rs::ops::{register_native_ops, BinaryOpDispatcher, CachePolicy, GraphCache};
use dispatch_rs::{register_functionalization, Dispatcher, Value};
use dispatch_rs_backend_ref_cpu::CpuGraphBackend;

pub struct Harness {
    pub backend: Arc<CpuGraphBackend>,
    pub binary: Arc<BinaryOpDispatcher<CpuGraphBackend>>,
}

pub fn harness() -> Harness {
    harness_with_policy(CachePolicy::Unbounded)
}

pub fn harness_with_policy(policy: CachePolicy) -> Harness {
    let backend = Arc::new(CpuGraphBackend::new());
    let cache = Arc::new(GraphCache::new(policy));
    let binary = Arc::new(BinaryOpDispatcher::new(Arc::clone(&backend), cache));
    Harness { backend, binary }
}

/// Dispatcher with native kernels and the functionalization pass installed.
pub fn dispatcher(config: FunctionalizeConfig) -> anyhow::Result<(Dispatcher, Harness)> {
    let harness = harness();
    let dispatcher = Dispatcher::new();
    register_native_ops(&dispatcher, Arc::clone(&harness.binary))?;
    register_functionalization(&dispatcher, config)?;
    Ok((dispatcher, harness))
}

pub fn dims(values: &[usize]) -> Value {
    Value::from(values)
}

pub fn single(mut returns: Vec<Value>) -> anyhow::Result<Value> {
    anyhow::ensure!(returns.len() == 1, "expected one return, got {}", returns.len());
    Ok(returns.remove(0))
}
