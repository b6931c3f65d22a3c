//! Per-family graph builders for the binary operator set.
//!
//! Each strategy maps two placeholders, already cast to the compute dtype, to the node that
//! holds the operator's result.

use crate::backend::{
    BackendResult, ComparisonOp, ElementwiseBinaryOp, ElementwiseUnaryOp, GraphBuilder, LogicalOp,
    NodeId,
};
use crate::tensor::DType;

use super::kind::{BinaryOpKind, RoundingMode};

pub trait BinaryExpression: Send + Sync {
    /// Dtype both operands are cast to before the expression runs.
    fn compute_dtype(&self, common: DType) -> DType {
        common
    }

    /// Dtype of the node returned by [`BinaryExpression::build_output_expression`].
    fn result_dtype(&self, common: DType) -> DType {
        self.compute_dtype(common)
    }

    fn build_output_expression(
        &self,
        builder: &mut GraphBuilder,
        primary: NodeId,
        secondary: NodeId,
    ) -> BackendResult<NodeId>;
}

pub struct ArithmeticExpression {
    op: ElementwiseBinaryOp,
}

impl ArithmeticExpression {
    pub fn new(op: ElementwiseBinaryOp) -> Self {
        ArithmeticExpression { op }
    }
}

impl BinaryExpression for ArithmeticExpression {
    fn compute_dtype(&self, common: DType) -> DType {
        // atan2 is only defined on floating point.
        if self.op == ElementwiseBinaryOp::Atan2 && !common.is_floating() {
            DType::F32
        } else {
            common
        }
    }

    fn build_output_expression(
        &self,
        builder: &mut GraphBuilder,
        primary: NodeId,
        secondary: NodeId,
    ) -> BackendResult<NodeId> {
        builder.binary(self.op, primary, secondary)
    }
}

pub struct ComparisonExpression {
    op: ComparisonOp,
}

impl ComparisonExpression {
    pub fn new(op: ComparisonOp) -> Self {
        ComparisonExpression { op }
    }
}

impl BinaryExpression for ComparisonExpression {
    fn result_dtype(&self, _common: DType) -> DType {
        DType::Bool
    }

    fn build_output_expression(
        &self,
        builder: &mut GraphBuilder,
        primary: NodeId,
        secondary: NodeId,
    ) -> BackendResult<NodeId> {
        builder.compare(self.op, primary, secondary)
    }
}

pub struct LogicalExpression {
    op: LogicalOp,
}

impl LogicalExpression {
    pub fn new(op: LogicalOp) -> Self {
        LogicalExpression { op }
    }
}

impl BinaryExpression for LogicalExpression {
    fn result_dtype(&self, _common: DType) -> DType {
        DType::Bool
    }

    fn build_output_expression(
        &self,
        builder: &mut GraphBuilder,
        primary: NodeId,
        secondary: NodeId,
    ) -> BackendResult<NodeId> {
        builder.logical(self.op, primary, secondary)
    }
}

/// True division, or division followed by a rounding transform.
///
/// Integer operands are promoted to `F32` for true division. With a rounding mode they divide in
/// `F64` and the result keeps the integral common dtype.
pub struct DivisionExpression {
    mode: Option<RoundingMode>,
}

impl DivisionExpression {
    pub fn new(mode: Option<RoundingMode>) -> Self {
        DivisionExpression { mode }
    }
}

impl BinaryExpression for DivisionExpression {
    fn compute_dtype(&self, common: DType) -> DType {
        match (common.is_floating(), self.mode) {
            (true, _) => common,
            (false, None) => DType::F32,
            (false, Some(_)) => DType::F64,
        }
    }

    fn result_dtype(&self, common: DType) -> DType {
        match (common.is_floating(), self.mode) {
            (false, Some(_)) => common,
            _ => self.compute_dtype(common),
        }
    }

    fn build_output_expression(
        &self,
        builder: &mut GraphBuilder,
        primary: NodeId,
        secondary: NodeId,
    ) -> BackendResult<NodeId> {
        let quotient = builder.binary(ElementwiseBinaryOp::Div, primary, secondary)?;
        match self.mode {
            None => Ok(quotient),
            Some(RoundingMode::Trunc) => builder.unary(ElementwiseUnaryOp::Trunc, quotient),
            Some(RoundingMode::Floor) => builder.unary(ElementwiseUnaryOp::Floor, quotient),
        }
    }
}

/// Resolves the strategy for `kind` once per call.
pub fn expression_for(kind: BinaryOpKind) -> Box<dyn BinaryExpression> {
    match kind {
        BinaryOpKind::Add => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Add)),
        BinaryOpKind::Sub => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Sub)),
        BinaryOpKind::Mul => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Mul)),
        BinaryOpKind::Pow => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Pow)),
        BinaryOpKind::Minimum => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Minimum)),
        BinaryOpKind::Maximum => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Maximum)),
        BinaryOpKind::Atan2 => Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Atan2)),
        BinaryOpKind::Remainder => {
            Box::new(ArithmeticExpression::new(ElementwiseBinaryOp::Remainder))
        }
        BinaryOpKind::Eq => Box::new(ComparisonExpression::new(ComparisonOp::Equal)),
        BinaryOpKind::Ne => Box::new(ComparisonExpression::new(ComparisonOp::NotEqual)),
        BinaryOpKind::Lt => Box::new(ComparisonExpression::new(ComparisonOp::Less)),
        BinaryOpKind::Le => Box::new(ComparisonExpression::new(ComparisonOp::LessEqual)),
        BinaryOpKind::Gt => Box::new(ComparisonExpression::new(ComparisonOp::Greater)),
        BinaryOpKind::Ge => Box::new(ComparisonExpression::new(ComparisonOp::GreaterEqual)),
        BinaryOpKind::LogicalAnd => Box::new(LogicalExpression::new(LogicalOp::And)),
        BinaryOpKind::LogicalOr => Box::new(LogicalExpression::new(LogicalOp::Or)),
        BinaryOpKind::LogicalXor => Box::new(LogicalExpression::new(LogicalOp::Xor)),
        BinaryOpKind::Div => Box::new(DivisionExpression::new(None)),
        BinaryOpKind::DivRounding(mode) => Box::new(DivisionExpression::new(Some(mode))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_true_division_computes_in_float() {
        let expr = DivisionExpression::new(None);
        assert_eq!(expr.compute_dtype(DType::I32), DType::F32);
        assert_eq!(expr.result_dtype(DType::I32), DType::F32);
        assert_eq!(expr.result_dtype(DType::F64), DType::F64);
    }

    #[test]
    fn integer_rounded_division_stays_integral() {
        let expr = DivisionExpression::new(Some(RoundingMode::Floor));
        assert_eq!(expr.compute_dtype(DType::I64), DType::F64);
        assert_eq!(expr.result_dtype(DType::I64), DType::I64);
    }

    #[test]
    fn comparison_builds_bool_node() -> BackendResult<()> {
        let expr = expression_for(BinaryOpKind::Ge);
        let mut builder = GraphBuilder::new("ge");
        let a = builder.placeholder(DType::I32, &[4]);
        let b = builder.placeholder(DType::I32, &[4]);
        let out = expr.build_output_expression(&mut builder, a, b)?;
        assert_eq!(builder.dtype(out)?, DType::Bool);
        assert_eq!(expr.result_dtype(DType::I32), DType::Bool);
        Ok(())
    }
}
