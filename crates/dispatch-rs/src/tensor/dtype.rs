//! Enumerates the scalar element types supported by tensors and graph backends.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Logical dtype identifier shared between host tensors and backend graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Boolean stored as one byte per element.
    Bool,
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer, the default index dtype.
    I32,
    /// 64-bit signed integer, the dtype of wrapped integer scalars.
    I64,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Integral dtypes exclude `Bool`.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            DType::U8 | DType::I8 | DType::I16 | DType::I32 | DType::I64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 | DType::F32 | DType::F64
        )
    }

    /// Produces a stable tag used inside signature keys.
    pub fn tag(self) -> &'static str {
        match self {
            DType::Bool => "b8",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Reconstructs a `DType` from its tag representation.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "b8" => Some(DType::Bool),
            "u8" => Some(DType::U8),
            "i8" => Some(DType::I8),
            "i16" => Some(DType::I16),
            "i32" => Some(DType::I32),
            "i64" => Some(DType::I64),
            "f32" => Some(DType::F32),
            "f64" => Some(DType::F64),
            _ => None,
        }
    }

    fn category(self) -> u8 {
        match self {
            DType::Bool => 0,
            DType::U8 | DType::I8 | DType::I16 | DType::I32 | DType::I64 => 1,
            DType::F32 | DType::F64 => 2,
        }
    }
}

/// Returns the dtype both operands are computed in.
///
/// Categories are ordered `Bool < integral < floating`; the higher category wins, and inside a
/// category the wider dtype wins. Mixing `U8` with `I8` lands on `I16` because neither side can
/// represent the other's range.
pub fn promote_types(a: DType, b: DType) -> DType {
    if a == b {
        return a;
    }
    let (ca, cb) = (a.category(), b.category());
    if ca != cb {
        return if ca > cb { a } else { b };
    }
    match (a, b) {
        (DType::U8, DType::I8) | (DType::I8, DType::U8) => DType::I16,
        _ => {
            if a.size_in_bytes() >= b.size_in_bytes() {
                a
            } else {
                b
            }
        }
    }
}

/// Host scalar value used for immediate graph feeds, fills and alpha factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Scalar::Bool(v) => v as i64,
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i64,
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            Scalar::Bool(v) => v,
            Scalar::Int(v) => v != 0,
            Scalar::Float(v) => v != 0.0,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Scalar::Float(_))
    }

    pub fn is_bool(self) -> bool {
        matches!(self, Scalar::Bool(_))
    }

    /// Dtype a scalar takes when it is wrapped into a zero-dimensional tensor.
    pub fn default_dtype(self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::Int(_) => DType::I64,
            Scalar::Float(_) => DType::F32,
        }
    }

    pub fn is_zero(self) -> bool {
        self.to_f64() == 0.0
    }

    pub fn is_one(self) -> bool {
        self.to_f64() == 1.0
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::Float(value as f64)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value as i64)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Validates that `alpha` can scale values of `dtype` without silently changing semantics.
pub fn check_alpha(dtype: DType, alpha: Scalar) -> DispatchResult<()> {
    if dtype == DType::Bool && !alpha.is_bool() {
        return Err(DispatchError::TypeMismatch(format!(
            "boolean alpha only supported for boolean results, got {alpha:?}"
        )));
    }
    if dtype.is_integral() && alpha.is_floating() {
        return Err(DispatchError::TypeMismatch(format!(
            "for integral input tensors, alpha must not be a floating point number (got {alpha:?} for {dtype:?})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_prefers_higher_category() {
        assert_eq!(promote_types(DType::I32, DType::F32), DType::F32);
        assert_eq!(promote_types(DType::Bool, DType::U8), DType::U8);
        assert_eq!(promote_types(DType::I64, DType::F32), DType::F32);
    }

    #[test]
    fn promotion_widens_within_category() {
        assert_eq!(promote_types(DType::I32, DType::I64), DType::I64);
        assert_eq!(promote_types(DType::F64, DType::F32), DType::F64);
        assert_eq!(promote_types(DType::U8, DType::I8), DType::I16);
        assert_eq!(promote_types(DType::U8, DType::I32), DType::I32);
    }

    #[test]
    fn alpha_check_rejects_float_for_integral() {
        assert!(check_alpha(DType::I32, Scalar::Float(0.5)).is_err());
        assert!(check_alpha(DType::I32, Scalar::Int(3)).is_ok());
        assert!(check_alpha(DType::F32, Scalar::Int(3)).is_ok());
        assert!(check_alpha(DType::Bool, Scalar::Int(1)).is_err());
        assert!(check_alpha(DType::Bool, Scalar::Bool(true)).is_ok());
    }

    #[test]
    fn tags_round_trip() {
        for dtype in [DType::Bool, DType::I16, DType::F64] {
            assert_eq!(DType::from_tag(dtype.tag()), Some(dtype));
        }
    }
}
