//! Elementwise kernels over logical-order host values.

use dispatch_rs::backend::{
    BackendError, BackendResult, ComparisonOp, ElementwiseBinaryOp, ElementwiseUnaryOp, LogicalOp,
};
use dispatch_rs::tensor::{
    broadcast_source_index, contiguous_strides, numel, DType, HostValues, Scalar,
};

/// Expands `values` of shape `from` to shape `to` following broadcasting rules.
pub(crate) fn broadcast_to(values: &HostValues, from: &[usize], to: &[usize]) -> HostValues {
    if from == to {
        return values.clone();
    }
    let strides = contiguous_strides(from);
    let count = numel(to);
    let gather = |flat: usize| values.get(broadcast_source_index(flat, to, from, &strides, 0));
    match values {
        HostValues::Bool(_) => HostValues::Bool((0..count).map(|i| gather(i).to_bool()).collect()),
        HostValues::Int(_) => HostValues::Int((0..count).map(|i| gather(i).to_i64()).collect()),
        HostValues::Float(_) => HostValues::Float((0..count).map(|i| gather(i).to_f64()).collect()),
    }
}

/// Casts to `dtype`, wrapping integers to its width and rounding floats to its precision.
pub(crate) fn cast(values: &HostValues, dtype: DType) -> HostValues {
    match HostValues::from_scalars(dtype, values.iter()) {
        HostValues::Int(ints) => {
            HostValues::Int(ints.into_iter().map(|v| wrap_int(v, dtype)).collect())
        }
        HostValues::Float(floats) if dtype == DType::F32 => {
            HostValues::Float(floats.into_iter().map(|v| v as f32 as f64).collect())
        }
        other => other,
    }
}

fn wrap_int(value: i64, dtype: DType) -> i64 {
    match dtype {
        DType::U8 => value as u8 as i64,
        DType::I8 => value as i8 as i64,
        DType::I16 => value as i16 as i64,
        DType::I32 => value as i32 as i64,
        _ => value,
    }
}

pub(crate) fn binary(
    op: ElementwiseBinaryOp,
    lhs: &HostValues,
    rhs: &HostValues,
    dtype: DType,
) -> BackendResult<HostValues> {
    let pairs = lhs.iter().zip(rhs.iter());
    let result = if dtype.is_floating() {
        let values = pairs
            .map(|(a, b)| binary_float(op, a.to_f64(), b.to_f64()))
            .map(Scalar::Float);
        HostValues::from_scalars(dtype, values)
    } else {
        let values = pairs
            .map(|(a, b)| binary_int(op, a.to_i64(), b.to_i64()).map(Scalar::Int))
            .collect::<BackendResult<Vec<_>>>()?;
        HostValues::from_scalars(dtype, values)
    };
    Ok(cast(&result, dtype))
}

fn binary_float(op: ElementwiseBinaryOp, a: f64, b: f64) -> f64 {
    match op {
        ElementwiseBinaryOp::Add => a + b,
        ElementwiseBinaryOp::Sub => a - b,
        ElementwiseBinaryOp::Mul => a * b,
        ElementwiseBinaryOp::Div => a / b,
        ElementwiseBinaryOp::Pow => a.powf(b),
        ElementwiseBinaryOp::Maximum => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }
        }
        ElementwiseBinaryOp::Minimum => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }
        }
        ElementwiseBinaryOp::Atan2 => a.atan2(b),
        ElementwiseBinaryOp::Remainder => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
    }
}

fn binary_int(op: ElementwiseBinaryOp, a: i64, b: i64) -> BackendResult<i64> {
    let value = match op {
        ElementwiseBinaryOp::Add => a.wrapping_add(b),
        ElementwiseBinaryOp::Sub => a.wrapping_sub(b),
        ElementwiseBinaryOp::Mul => a.wrapping_mul(b),
        ElementwiseBinaryOp::Div => {
            if b == 0 {
                return Err(BackendError::execution("integer division by zero"));
            }
            a.wrapping_div(b)
        }
        ElementwiseBinaryOp::Pow => {
            if b < 0 {
                return Err(BackendError::execution(
                    "integers to negative integer powers are not allowed",
                ));
            }
            a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX))
        }
        ElementwiseBinaryOp::Maximum => a.max(b),
        ElementwiseBinaryOp::Minimum => a.min(b),
        ElementwiseBinaryOp::Atan2 => (a as f64).atan2(b as f64) as i64,
        ElementwiseBinaryOp::Remainder => {
            if b == 0 {
                return Err(BackendError::execution("integer remainder by zero"));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && (r < 0) != (b < 0) {
                r + b
            } else {
                r
            }
        }
    };
    Ok(value)
}

pub(crate) fn unary(op: ElementwiseUnaryOp, input: &HostValues, dtype: DType) -> HostValues {
    let result = match input {
        HostValues::Float(values) => HostValues::Float(
            values
                .iter()
                .map(|&x| match op {
                    ElementwiseUnaryOp::Neg => -x,
                    ElementwiseUnaryOp::Exp => x.exp(),
                    ElementwiseUnaryOp::Log => x.ln(),
                    ElementwiseUnaryOp::Floor => x.floor(),
                    ElementwiseUnaryOp::Trunc => x.trunc(),
                })
                .collect(),
        ),
        other => {
            let ints = other.iter().map(Scalar::to_i64);
            match op {
                ElementwiseUnaryOp::Neg => HostValues::Int(ints.map(i64::wrapping_neg).collect()),
                ElementwiseUnaryOp::Floor | ElementwiseUnaryOp::Trunc => {
                    HostValues::Int(ints.collect())
                }
                ElementwiseUnaryOp::Exp => {
                    HostValues::Float(ints.map(|x| (x as f64).exp()).collect())
                }
                ElementwiseUnaryOp::Log => {
                    HostValues::Float(ints.map(|x| (x as f64).ln()).collect())
                }
            }
        }
    };
    cast(&result, dtype)
}

pub(crate) fn compare(
    op: ComparisonOp,
    lhs: &HostValues,
    rhs: &HostValues,
    operand_dtype: DType,
) -> HostValues {
    let pairs = lhs.iter().zip(rhs.iter());
    let flags = if operand_dtype.is_floating() {
        pairs
            .map(|(a, b)| compare_ord(op, a.to_f64().partial_cmp(&b.to_f64())))
            .collect()
    } else {
        pairs
            .map(|(a, b)| compare_ord(op, Some(a.to_i64().cmp(&b.to_i64()))))
            .collect()
    };
    HostValues::Bool(flags)
}

/// Unordered (NaN) comparisons are false except `NotEqual`.
fn compare_ord(op: ComparisonOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering;
    match (op, ordering) {
        (ComparisonOp::NotEqual, None) => true,
        (_, None) => false,
        (ComparisonOp::Less, Some(o)) => o == Ordering::Less,
        (ComparisonOp::LessEqual, Some(o)) => o != Ordering::Greater,
        (ComparisonOp::Equal, Some(o)) => o == Ordering::Equal,
        (ComparisonOp::GreaterEqual, Some(o)) => o != Ordering::Less,
        (ComparisonOp::Greater, Some(o)) => o == Ordering::Greater,
        (ComparisonOp::NotEqual, Some(o)) => o != Ordering::Equal,
    }
}

pub(crate) fn logical(op: LogicalOp, lhs: &HostValues, rhs: &HostValues) -> HostValues {
    HostValues::Bool(
        lhs.iter()
            .zip(rhs.iter())
            .map(|(a, b)| {
                let (a, b) = (a.to_bool(), b.to_bool());
                match op {
                    LogicalOp::And => a && b,
                    LogicalOp::Or => a || b,
                    LogicalOp::Xor => a != b,
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_follows_divisor_sign() -> BackendResult<()> {
        let lhs = HostValues::Int(vec![-7, 7, -7]);
        let rhs = HostValues::Int(vec![3, -3, -3]);
        let out = binary(ElementwiseBinaryOp::Remainder, &lhs, &rhs, DType::I64)?;
        assert_eq!(out, HostValues::Int(vec![2, -2, -1]));
        Ok(())
    }

    #[test]
    fn integer_division_by_zero_is_an_execution_error() {
        let err = binary(
            ElementwiseBinaryOp::Div,
            &HostValues::Int(vec![1]),
            &HostValues::Int(vec![0]),
            DType::I32,
        );
        assert!(matches!(err, Err(BackendError::Execution { .. })));
    }

    #[test]
    fn narrow_integers_wrap() -> BackendResult<()> {
        let out = binary(
            ElementwiseBinaryOp::Add,
            &HostValues::Int(vec![i32::MAX as i64]),
            &HostValues::Int(vec![1]),
            DType::I32,
        )?;
        assert_eq!(out, HostValues::Int(vec![i32::MIN as i64]));
        Ok(())
    }

    #[test]
    fn broadcast_repeats_rows() {
        let row = HostValues::Float(vec![1.0, 2.0]);
        let out = broadcast_to(&row, &[2], &[2, 2]);
        assert_eq!(out, HostValues::Float(vec![1.0, 2.0, 1.0, 2.0]));
    }

    #[test]
    fn nan_compares_unequal() {
        let lhs = HostValues::Float(vec![f64::NAN]);
        let rhs = HostValues::Float(vec![f64::NAN]);
        assert_eq!(
            compare(ComparisonOp::Equal, &lhs, &rhs, DType::F32),
            HostValues::Bool(vec![false])
        );
        assert_eq!(
            compare(ComparisonOp::NotEqual, &lhs, &rhs, DType::F32),
            HostValues::Bool(vec![true])
        );
    }
}
