mod common;

use std::sync::Arc;

use dispatch_rs::ops::{BinaryOpDispatcher, BinaryOpKind, CachePolicy, GraphCache, GraphCacheStats};
use dispatch_rs::tensor::{DType, Scalar, Tensor};

use common::{harness, harness_with_policy};

#[test]
fn identical_signatures_compile_once() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0])?;
    let rhs = Tensor::from_vec(&[2, 2], vec![2.0f32, 2.0, 2.0, 2.0])?;

    let first = h.binary.compute(BinaryOpKind::Mul, &lhs, &rhs, None)?;
    let second = h.binary.compute(BinaryOpKind::Mul, &lhs, &rhs, None)?;

    assert_eq!(first.to_vec::<f32>()?, vec![2.0, 4.0, 6.0, 8.0]);
    assert_eq!(second.to_vec::<f32>()?, first.to_vec::<f32>()?);
    assert_eq!(h.backend.compile_count(), 1);
    assert_eq!(h.backend.execute_count(), 2);
    assert_eq!(h.binary.cache().stats(), GraphCacheStats { hits: 1, misses: 1 });
    Ok(())
}

#[test]
fn non_unit_alphas_share_one_graph() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0])?;
    let rhs = Tensor::from_vec(&[3], vec![1.0f32, 1.0, 1.0])?;

    let doubled = h.binary.compute(BinaryOpKind::Add, &lhs, &rhs, Some(Scalar::Float(2.0)))?;
    let tripled = h.binary.compute(BinaryOpKind::Add, &lhs, &rhs, Some(Scalar::Float(3.0)))?;
    assert_eq!(doubled.to_vec::<f32>()?, vec![3.0, 4.0, 5.0]);
    assert_eq!(tripled.to_vec::<f32>()?, vec![4.0, 5.0, 6.0]);
    assert_eq!(h.backend.compile_count(), 1);

    // Unit alpha builds the unscaled graph.
    let plain = h.binary.compute(BinaryOpKind::Add, &lhs, &rhs, Some(Scalar::Int(1)))?;
    assert_eq!(plain.to_vec::<f32>()?, vec![2.0, 3.0, 4.0]);
    assert_eq!(h.backend.compile_count(), 2);
    Ok(())
}

#[test]
fn rounding_modes_get_distinct_graphs() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[2], vec![-7.0f32, 7.0])?;
    let rhs = Tensor::from_vec(&[2], vec![2.0f32, 2.0])?;
    let mut out = Tensor::zeros(&[2], DType::F32);

    h.binary.div_rounding(&lhs, &rhs, None, &mut out)?;
    assert_eq!(out.to_vec::<f32>()?, vec![-3.5, 3.5]);
    h.binary.div_rounding(&lhs, &rhs, Some("trunc"), &mut out)?;
    assert_eq!(out.to_vec::<f32>()?, vec![-3.0, 3.0]);
    h.binary.div_rounding(&lhs, &rhs, Some("floor"), &mut out)?;
    assert_eq!(out.to_vec::<f32>()?, vec![-4.0, 3.0]);

    assert_eq!(h.backend.compile_count(), 3);
    assert_eq!(h.binary.cache().len(), 3);
    assert!(h.binary.div_rounding(&lhs, &rhs, Some("round"), &mut out).is_err());
    Ok(())
}

#[test]
fn dispatchers_sharing_a_cache_share_graphs() -> anyhow::Result<()> {
    let h = harness();
    let other = BinaryOpDispatcher::new(Arc::clone(&h.backend), Arc::clone(h.binary.cache()));
    let lhs = Tensor::from_vec(&[2], vec![1i32, 5])?;
    let rhs = Tensor::from_vec(&[2], vec![3i32, 3])?;

    let a = h.binary.compute(BinaryOpKind::Lt, &lhs, &rhs, None)?;
    let b = other.compute(BinaryOpKind::Lt, &lhs, &rhs, None)?;
    assert_eq!(a.to_vec::<bool>()?, vec![true, false]);
    assert_eq!(b.to_vec::<bool>()?, vec![true, false]);
    assert_eq!(h.backend.compile_count(), 1);
    Ok(())
}

#[test]
fn bounded_cache_evicts_least_recently_used() -> anyhow::Result<()> {
    let h = harness_with_policy(CachePolicy::Bounded { capacity: 1 });
    let lhs = Tensor::from_vec(&[2], vec![4.0f64, 9.0])?;
    let rhs = Tensor::from_vec(&[2], vec![2.0f64, 3.0])?;

    h.binary.compute(BinaryOpKind::Mul, &lhs, &rhs, None)?;
    h.binary.compute(BinaryOpKind::Sub, &lhs, &rhs, Some(Scalar::Int(1)))?;
    h.binary.compute(BinaryOpKind::Mul, &lhs, &rhs, None)?;

    assert_eq!(h.binary.cache().len(), 1);
    assert_eq!(h.backend.compile_count(), 3);

    h.binary.cache().clear();
    assert!(h.binary.cache().is_empty());
    assert_eq!(h.binary.cache().stats(), GraphCacheStats::default());
    Ok(())
}

#[test]
fn concurrent_callers_build_each_graph_once() -> anyhow::Result<()> {
    let h = harness();
    let results: Vec<anyhow::Result<Vec<i64>>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| -> anyhow::Result<Vec<i64>> {
                    let lhs = Tensor::from_vec(&[4], vec![1i64, 2, 3, 4])?;
                    let rhs = Tensor::scalar(Scalar::Int(10), DType::I64);
                    let out = h.binary.compute(BinaryOpKind::Maximum, &lhs, &rhs, None)?;
                    Ok(out.to_vec::<i64>()?)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker panicked"))
            .collect()
    });
    for result in results {
        assert_eq!(result?, vec![10, 10, 10, 10]);
    }
    assert_eq!(h.backend.compile_count(), 1);
    assert_eq!(h.binary.cache().stats().misses, 1);
    assert_eq!(h.binary.cache().stats().hits, 7);
    Ok(())
}

#[test]
fn explicit_capacity_policy_from_config() {
    let config = dispatch_rs::GraphCacheConfig { capacity: Some(0) };
    let cache: GraphCache<dispatch_rs_backend_ref_cpu::CpuGraphBackend> =
        GraphCache::new(CachePolicy::from_config(&config));
    assert_eq!(cache.policy(), CachePolicy::Bounded { capacity: 0 });
    assert!(cache.is_empty());
}
