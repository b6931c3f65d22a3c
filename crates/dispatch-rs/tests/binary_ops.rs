mod common;

use dispatch_rs::ops::{result_dtype, BinaryOpKind};
use dispatch_rs::tensor::{DType, Scalar, Tensor};
use dispatch_rs::DispatchError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::harness;

#[test]
fn zero_alpha_copies_self_without_compiling() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0])?;
    let rhs = Tensor::from_vec(&[2], vec![100.0f32, 200.0])?;
    let mut out = Tensor::zeros(&[1], DType::F32);

    h.binary.add(&lhs, &rhs, Scalar::Float(0.0), &mut out)?;

    assert_eq!(out.sizes(), &[2, 2]);
    assert_eq!(out.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
    assert!(!out.is_alias_of(&lhs));
    assert_eq!(h.backend.compile_count(), 0);
    Ok(())
}

#[test]
fn empty_operands_leave_output_untouched() -> anyhow::Result<()> {
    let h = harness();
    let empty = Tensor::zeros(&[0, 3], DType::F32);
    let rhs = Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0])?;
    let mut out = Tensor::full(&[2], Scalar::Float(7.0), DType::F32);

    h.binary.mul(&empty, &rhs, &mut out)?;

    assert_eq!(out.sizes(), &[2]);
    assert_eq!(out.to_vec::<f32>()?, vec![7.0, 7.0]);
    assert_eq!(h.backend.compile_count(), 0);
    assert_eq!(h.backend.execute_count(), 0);
    Ok(())
}

#[test]
fn empty_operands_win_over_zero_alpha() -> anyhow::Result<()> {
    let h = harness();
    let empty = Tensor::zeros(&[0], DType::F32);
    let mut out = Tensor::full(&[2], Scalar::Float(7.0), DType::F32);

    h.binary.add(&empty, &empty, Scalar::Float(0.0), &mut out)?;
    h.binary.sub(&empty, &empty, Scalar::Int(0), &mut out)?;

    assert_eq!(out.sizes(), &[2]);
    assert_eq!(out.to_vec::<f32>()?, vec![7.0, 7.0]);
    assert_eq!(h.backend.compile_count(), 0);
    Ok(())
}

#[test]
fn int32_plus_int64_scalar_lands_in_int32_output() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[3], vec![1i32, 2, 3])?;
    let rhs = Tensor::scalar(Scalar::Int(5), DType::I64);
    let mut out = Tensor::zeros(&[3], DType::I32);

    h.binary.add(&lhs, &rhs, Scalar::Int(1), &mut out)?;

    assert_eq!(out.dtype(), DType::I32);
    assert_eq!(out.to_vec::<i32>()?, vec![6, 7, 8]);
    Ok(())
}

#[test]
fn floating_alpha_on_integer_inputs_is_rejected() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[2], vec![1i64, 2])?;
    let rhs = Tensor::from_vec(&[2], vec![3i64, 4])?;
    let mut out = Tensor::zeros(&[2], DType::I64);

    let err = h.binary.sub(&lhs, &rhs, Scalar::Float(0.5), &mut out);
    assert!(matches!(err, Err(DispatchError::TypeMismatch(_))));
    assert_eq!(h.backend.compile_count(), 0);
    Ok(())
}

#[test]
fn comparisons_and_logical_ops_produce_bool() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[4], vec![1.0f32, 2.0, 3.0, 4.0])?;
    let rhs = Tensor::from_vec(&[4], vec![1i32, 3, 2, 4])?;

    let cases = [
        (BinaryOpKind::Eq, vec![true, false, false, true]),
        (BinaryOpKind::Ne, vec![false, true, true, false]),
        (BinaryOpKind::Lt, vec![false, true, false, false]),
        (BinaryOpKind::Le, vec![true, true, false, true]),
        (BinaryOpKind::Gt, vec![false, false, true, false]),
        (BinaryOpKind::Ge, vec![true, false, true, true]),
    ];
    for (kind, expected) in cases {
        let out = h.binary.compute(kind, &lhs, &rhs, None)?;
        assert_eq!(out.dtype(), DType::Bool, "{}", kind.name());
        assert_eq!(out.to_vec::<bool>()?, expected, "{}", kind.name());
    }

    let mask = Tensor::from_vec(&[4], vec![0i32, 1, 0, 2])?;
    let xor = h.binary.compute(BinaryOpKind::LogicalXor, &lhs, &mask, None)?;
    assert_eq!(xor.to_vec::<bool>()?, vec![true, false, true, false]);
    Ok(())
}

#[test]
fn integer_division_promotes_to_float_unless_rounded() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[3], vec![7i32, -7, 9])?;
    let rhs = Tensor::from_vec(&[3], vec![2i32, 2, 3])?;

    assert_eq!(result_dtype(BinaryOpKind::Div, DType::I32, DType::I32), DType::F32);
    let quotient = h.binary.compute(BinaryOpKind::Div, &lhs, &rhs, None)?;
    assert_eq!(quotient.to_vec::<f32>()?, vec![3.5, -3.5, 3.0]);

    let mut floored = Tensor::zeros(&[3], DType::I32);
    h.binary.div_rounding(&lhs, &rhs, Some("floor"), &mut floored)?;
    assert_eq!(floored.to_vec::<i32>()?, vec![3, -4, 3]);
    Ok(())
}

#[test]
fn remainder_and_pow_follow_integer_semantics() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::from_vec(&[3], vec![-7i64, 7, 5])?;
    let rhs = Tensor::from_vec(&[3], vec![3i64, -3, 2])?;

    let rem = h.binary.compute(BinaryOpKind::Remainder, &lhs, &rhs, None)?;
    assert_eq!(rem.to_vec::<i64>()?, vec![2, -2, 1]);

    let err = h.binary.compute(BinaryOpKind::Pow, &lhs, &rhs, None);
    assert!(matches!(err, Err(DispatchError::Backend(_))));
    Ok(())
}

#[test]
fn broadcast_arithmetic_matches_host_reference() -> anyhow::Result<()> {
    let h = harness();
    let mut rng = StdRng::seed_from_u64(7);
    let (rows, cols) = (3usize, 5usize);
    let matrix: Vec<f64> = (0..rows * cols).map(|_| rng.gen_range(-4.0..4.0)).collect();
    let row: Vec<f64> = (0..cols).map(|_| rng.gen_range(-4.0..4.0)).collect();
    let lhs = Tensor::from_vec(&[rows, cols], matrix.clone())?;
    let rhs = Tensor::from_vec(&[cols], row.clone())?;

    let kinds: [(BinaryOpKind, fn(f64, f64) -> f64); 3] = [
        (BinaryOpKind::Sub, |a, b| a - 0.5 * b),
        (BinaryOpKind::Maximum, f64::max),
        (BinaryOpKind::Atan2, f64::atan2),
    ];
    for (kind, reference) in kinds {
        let alpha = kind.accepts_alpha().then_some(Scalar::Float(0.5));
        let out = h.binary.compute(kind, &lhs, &rhs, alpha)?;
        assert_eq!(out.sizes(), &[rows, cols]);
        let expected: Vec<f64> = matrix
            .iter()
            .enumerate()
            .map(|(i, &a)| reference(a, row[i % cols]))
            .collect();
        for (got, want) in out.to_vec::<f64>()?.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12, "{}: {got} vs {want}", kind.name());
        }
    }
    Ok(())
}

#[test]
fn incompatible_shapes_are_shape_errors() -> anyhow::Result<()> {
    let h = harness();
    let lhs = Tensor::zeros(&[2, 3], DType::F32);
    let rhs = Tensor::zeros(&[4], DType::F32);
    let err = h.binary.compute(BinaryOpKind::Add, &lhs, &rhs, Some(Scalar::Int(1)));
    assert!(matches!(err, Err(DispatchError::Shape(_))));
    Ok(())
}
