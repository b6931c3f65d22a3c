//! Graph-cached dispatcher for the elementwise binary operator family.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::backend::{ElementwiseBinaryOp, Feed, GraphBackend, GraphBuilder, NodeId};
use crate::error::DispatchResult;
use crate::tensor::{broadcast_shapes, check_alpha, promote_types, DType, Scalar, Tensor};

use super::expression::{expression_for, BinaryExpression};
use super::graph_cache::{CachedGraph, GraphCache};
use super::kind::{BinaryOpKind, OpFamily, RoundingMode};
use super::signature::{binary_signature, SignatureKey, SignatureVariant};

/// Routes binary ops through cached compiled graphs on a [`GraphBackend`].
///
/// The cache is injected so several dispatchers (or tests) can share or isolate it.
pub struct BinaryOpDispatcher<B: GraphBackend> {
    backend: Arc<B>,
    cache: Arc<GraphCache<B>>,
}

impl<B: GraphBackend> BinaryOpDispatcher<B> {
    pub fn new(backend: Arc<B>, cache: Arc<GraphCache<B>>) -> Self {
        BinaryOpDispatcher { backend, cache }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<GraphCache<B>> {
        &self.cache
    }

    /// Computes `kind(self_, other)` into `output`, resizing it to the broadcast shape.
    ///
    /// `alpha` scales `other` for `add`/`sub` and is ignored by every other operator. When either
    /// input is empty the call returns immediately and `output` is left untouched.
    pub fn execute_binary_op(
        &self,
        kind: BinaryOpKind,
        self_: &Tensor,
        other: &Tensor,
        alpha: Option<Scalar>,
        output: &mut Tensor,
    ) -> DispatchResult<()> {
        if self_.numel() == 0 || other.numel() == 0 {
            trace!(op = kind.name(), "empty operand, skipping graph execution");
            return Ok(());
        }
        let alpha = alpha.filter(|_| kind.accepts_alpha());
        if let Some(alpha) = alpha {
            if alpha.is_zero() {
                trace!(op = kind.name(), "zero alpha, copying self into output");
                if output.sizes() != self_.sizes() {
                    output.resize_(self_.sizes())?;
                }
                return output.copy_from(self_);
            }
        }

        let common = promote_types(self_.dtype(), other.dtype());
        let scaled = match alpha {
            Some(alpha) if !alpha.is_one() => {
                check_alpha(common, alpha)?;
                Some(alpha)
            }
            _ => None,
        };
        let variant = match kind.family() {
            OpFamily::Division => SignatureVariant::Rounding(kind.rounding_mode()),
            _ if kind.accepts_alpha() => SignatureVariant::Alpha {
                scaled: scaled.is_some(),
            },
            _ => SignatureVariant::Plain,
        };

        let shape = broadcast_shapes(self_.sizes(), other.sizes())?;
        if output.sizes() != shape.as_slice() {
            output.resize_(&shape)?;
        }

        let expression = expression_for(kind);
        let output_dtype = output.dtype();
        let key = binary_signature(kind.name(), self_, other, output, variant);
        let graph = self.cache.get_or_build(&key, || {
            self.build_graph(
                &key,
                expression.as_ref(),
                common,
                self_,
                other,
                output_dtype,
                scaled.is_some(),
            )
        })?;

        let mut feeds = vec![
            (graph.primary, feed_for(self_)?),
            (graph.secondary, feed_for(other)?),
        ];
        if let (Some(node), Some(alpha)) = (graph.alpha, scaled) {
            feeds.push((node, Feed::Scalar(alpha)));
        }
        self.backend
            .execute(&graph.executable, &feeds, &[(graph.output, output.clone())])?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_graph(
        &self,
        key: &SignatureKey,
        expression: &dyn BinaryExpression,
        common: DType,
        self_: &Tensor,
        other: &Tensor,
        output_dtype: DType,
        scaled: bool,
    ) -> DispatchResult<CachedGraph<B>> {
        let compute = expression.compute_dtype(common);
        let mut builder = GraphBuilder::new(key.as_str());
        let primary = placeholder_for(&mut builder, self_);
        let secondary = placeholder_for(&mut builder, other);

        let lhs = builder.cast(primary, compute)?;
        let mut rhs = builder.cast(secondary, compute)?;
        let alpha = if scaled {
            let alpha = builder.scalar_placeholder(compute);
            rhs = builder.binary(ElementwiseBinaryOp::Mul, rhs, alpha)?;
            Some(alpha)
        } else {
            None
        };

        let result = expression.build_output_expression(&mut builder, lhs, rhs)?;
        let result = builder.cast(result, output_dtype)?;
        let graph = builder.finish(vec![result])?;
        debug!(
            key = %key,
            backend = self.backend.backend_name(),
            nodes = graph.nodes.len(),
            "compiling binary graph"
        );
        let executable = self.backend.compile(&graph)?;
        Ok(CachedGraph {
            executable,
            primary,
            secondary,
            alpha,
            output: result,
        })
    }

    /// Allocates an output of the broadcast shape and result dtype, then runs `kind`.
    pub fn compute(
        &self,
        kind: BinaryOpKind,
        self_: &Tensor,
        other: &Tensor,
        alpha: Option<Scalar>,
    ) -> DispatchResult<Tensor> {
        let shape = broadcast_shapes(self_.sizes(), other.sizes())?;
        let dtype = result_dtype(kind, self_.dtype(), other.dtype());
        let mut output = Tensor::zeros(&shape, dtype).with_device(self_.device());
        self.execute_binary_op(kind, self_, other, alpha, &mut output)?;
        Ok(output)
    }

    pub fn add(
        &self,
        self_: &Tensor,
        other: &Tensor,
        alpha: Scalar,
        output: &mut Tensor,
    ) -> DispatchResult<()> {
        self.execute_binary_op(BinaryOpKind::Add, self_, other, Some(alpha), output)
    }

    pub fn sub(
        &self,
        self_: &Tensor,
        other: &Tensor,
        alpha: Scalar,
        output: &mut Tensor,
    ) -> DispatchResult<()> {
        self.execute_binary_op(BinaryOpKind::Sub, self_, other, Some(alpha), output)
    }

    /// Division with an optional `"trunc"` or `"floor"` rounding mode.
    pub fn div_rounding(
        &self,
        self_: &Tensor,
        other: &Tensor,
        rounding_mode: Option<&str>,
        output: &mut Tensor,
    ) -> DispatchResult<()> {
        let kind = match RoundingMode::parse(rounding_mode)? {
            Some(mode) => BinaryOpKind::DivRounding(mode),
            None => BinaryOpKind::Div,
        };
        self.execute_binary_op(kind, self_, other, None, output)
    }
}

macro_rules! simple_binary_ops {
    ($($name:ident => $kind:ident),* $(,)?) => {
        impl<B: GraphBackend> BinaryOpDispatcher<B> {
            $(
                pub fn $name(
                    &self,
                    self_: &Tensor,
                    other: &Tensor,
                    output: &mut Tensor,
                ) -> DispatchResult<()> {
                    self.execute_binary_op(BinaryOpKind::$kind, self_, other, None, output)
                }
            )*
        }
    };
}

simple_binary_ops!(
    mul => Mul,
    div => Div,
    pow => Pow,
    minimum => Minimum,
    maximum => Maximum,
    atan2 => Atan2,
    remainder => Remainder,
    eq => Eq,
    ne => Ne,
    lt => Lt,
    le => Le,
    gt => Gt,
    ge => Ge,
    logical_and => LogicalAnd,
    logical_or => LogicalOr,
    logical_xor => LogicalXor,
);

/// Dtype an allocating call produces for `kind` applied to operands of these dtypes.
pub fn result_dtype(kind: BinaryOpKind, lhs: DType, rhs: DType) -> DType {
    expression_for(kind).result_dtype(promote_types(lhs, rhs))
}

fn placeholder_for(builder: &mut GraphBuilder, tensor: &Tensor) -> NodeId {
    if tensor.dim() == 0 {
        builder.scalar_placeholder(tensor.dtype())
    } else {
        builder.placeholder(tensor.dtype(), tensor.sizes())
    }
}

fn feed_for(tensor: &Tensor) -> DispatchResult<Feed> {
    if tensor.dim() == 0 {
        Ok(Feed::Scalar(tensor.item()?))
    } else {
        Ok(Feed::Buffer(tensor.clone()))
    }
}
