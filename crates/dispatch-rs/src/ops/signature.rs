//! Signature keys identifying cached graphs.
//!
//! A key spells out everything that determines graph topology: the operator name, then dtype,
//! shape and contiguity of `self`, `other` and `output`, then a variant suffix. Scalar and alpha
//! *values* never enter the key, so one compiled graph serves every value.

use std::fmt;

use crate::tensor::Tensor;

use super::kind::RoundingMode;

/// Cache key for one compiled binary graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureKey(String);

impl SignatureKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Variant suffix appended after the operand signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureVariant {
    Plain,
    /// Add/sub: whether a scale node multiplies the secondary operand.
    Alpha { scaled: bool },
    /// Division: the rounding transform applied after dividing.
    Rounding(Option<RoundingMode>),
}

/// Incrementally assembles a [`SignatureKey`].
pub struct SignatureBuilder {
    key: String,
}

impl SignatureBuilder {
    pub fn new(op: &str) -> Self {
        SignatureBuilder {
            key: op.to_string(),
        }
    }

    /// Appends one `:`-separated component.
    pub fn push(&mut self, component: &str) {
        self.key.push(':');
        self.key.push_str(component);
    }

    pub fn finish(self) -> SignatureKey {
        SignatureKey(self.key)
    }
}

/// Values that contribute a component to a signature key.
pub trait SignatureArg {
    fn add_to_signature(&self, builder: &mut SignatureBuilder);
}

impl SignatureArg for Tensor {
    fn add_to_signature(&self, builder: &mut SignatureBuilder) {
        let dtype = self.dtype().tag();
        if self.dim() == 0 {
            builder.push(&format!("{dtype}[scalar]"));
            return;
        }
        let dims = self
            .sizes()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("x");
        let layout = if self.is_contiguous() { "c" } else { "nc" };
        builder.push(&format!("{dtype}[{dims}]{layout}"));
    }
}

impl SignatureArg for SignatureVariant {
    fn add_to_signature(&self, builder: &mut SignatureBuilder) {
        match self {
            SignatureVariant::Plain => {}
            SignatureVariant::Alpha { scaled } => {
                builder.push(if *scaled { "alpha1" } else { "alpha0" })
            }
            SignatureVariant::Rounding(mode) => {
                builder.push(mode.map(RoundingMode::as_str).unwrap_or("true"))
            }
        }
    }
}

impl<T: SignatureArg + ?Sized> SignatureArg for &T {
    fn add_to_signature(&self, builder: &mut SignatureBuilder) {
        (*self).add_to_signature(builder);
    }
}

/// Builds the key for `op(self, other) -> output`.
pub fn binary_signature(
    op: &str,
    self_: &Tensor,
    other: &Tensor,
    output: &Tensor,
    variant: SignatureVariant,
) -> SignatureKey {
    let mut builder = SignatureBuilder::new(op);
    self_.add_to_signature(&mut builder);
    other.add_to_signature(&mut builder);
    output.add_to_signature(&mut builder);
    variant.add_to_signature(&mut builder);
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchResult;
    use crate::tensor::{DType, Scalar};

    #[test]
    fn key_spells_out_operands_and_variant() -> DispatchResult<()> {
        let lhs = Tensor::zeros(&[2, 3], DType::F32);
        let rhs = Tensor::scalar(Scalar::Float(1.5), DType::F32);
        let out = Tensor::zeros(&[2, 3], DType::F32);
        let key = binary_signature(
            "add",
            &lhs,
            &rhs,
            &out,
            SignatureVariant::Alpha { scaled: true },
        );
        assert_eq!(key.as_str(), "add:f32[2x3]c:f32[scalar]:f32[2x3]c:alpha1");

        let transposed = lhs.as_strided(&[3, 2], &[1, 3], None)?;
        let key = binary_signature(
            "div",
            &transposed,
            &rhs,
            &out,
            SignatureVariant::Rounding(Some(RoundingMode::Floor)),
        );
        assert_eq!(key.as_str(), "div:f32[3x2]nc:f32[scalar]:f32[2x3]c:floor");
        Ok(())
    }

    #[test]
    fn scalar_values_do_not_change_the_key() {
        let out = Tensor::zeros(&[], DType::I64);
        let a = Tensor::scalar(Scalar::Int(1), DType::I64);
        let b = Tensor::scalar(Scalar::Int(99), DType::I64);
        assert_eq!(
            binary_signature("mul", &a, &a, &out, SignatureVariant::Plain),
            binary_signature("mul", &b, &b, &out, SignatureVariant::Plain)
        );
    }
}
