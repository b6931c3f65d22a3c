//! Mutable builder used to stage nodes before a [`Graph`] is compiled.

use crate::tensor::{broadcast_shapes, DType};

use super::spec::{
    BackendError, BackendResult, ComparisonOp, ElementwiseBinaryOp, ElementwiseUnaryOp, Graph,
    LogicalOp, Node, NodeId, NodeSpec, Operation, PlaceholderKind,
};

/// Records nodes in insertion order and infers each result's dtype and shape.
#[derive(Debug)]
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        GraphBuilder {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Declares a buffer placeholder with a fixed shape.
    pub fn placeholder(&mut self, dtype: DType, shape: &[usize]) -> NodeId {
        self.emit(
            Operation::Placeholder(PlaceholderKind::Buffer),
            Vec::new(),
            NodeSpec::new(dtype, shape),
        )
    }

    /// Declares a zero-dimensional placeholder fed with an immediate value.
    pub fn scalar_placeholder(&mut self, dtype: DType) -> NodeId {
        self.emit(
            Operation::Placeholder(PlaceholderKind::Scalar),
            Vec::new(),
            NodeSpec::new(dtype, &[]),
        )
    }

    /// Elementwise arithmetic; both operands must already share a dtype.
    pub fn binary(
        &mut self,
        op: ElementwiseBinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> BackendResult<NodeId> {
        let dtype = self.same_dtype("elementwise_binary", lhs, rhs)?;
        let shape = self.broadcast(lhs, rhs)?;
        Ok(self.emit(
            Operation::ElementwiseBinary(op),
            vec![lhs, rhs],
            NodeSpec::new(dtype, &shape),
        ))
    }

    /// Comparison producing a `Bool` result.
    pub fn compare(&mut self, op: ComparisonOp, lhs: NodeId, rhs: NodeId) -> BackendResult<NodeId> {
        self.same_dtype("compare", lhs, rhs)?;
        let shape = self.broadcast(lhs, rhs)?;
        Ok(self.emit(
            Operation::Compare(op),
            vec![lhs, rhs],
            NodeSpec::new(DType::Bool, &shape),
        ))
    }

    /// Boolean connective producing a `Bool` result; operands may have any dtype.
    pub fn logical(&mut self, op: LogicalOp, lhs: NodeId, rhs: NodeId) -> BackendResult<NodeId> {
        let shape = self.broadcast(lhs, rhs)?;
        Ok(self.emit(
            Operation::Logical(op),
            vec![lhs, rhs],
            NodeSpec::new(DType::Bool, &shape),
        ))
    }

    pub fn unary(&mut self, op: ElementwiseUnaryOp, input: NodeId) -> BackendResult<NodeId> {
        let spec = self.spec(input)?.clone();
        Ok(self.emit(Operation::ElementwiseUnary(op), vec![input], spec))
    }

    /// Converts `input` to `dtype`; returns `input` unchanged when it already has that dtype.
    pub fn cast(&mut self, input: NodeId, dtype: DType) -> BackendResult<NodeId> {
        let spec = self.spec(input)?;
        if spec.dtype == dtype {
            return Ok(input);
        }
        let spec = NodeSpec::new(dtype, &spec.shape);
        Ok(self.emit(Operation::Cast(dtype), vec![input], spec))
    }

    pub fn spec(&self, id: NodeId) -> BackendResult<&NodeSpec> {
        self.nodes
            .get(id.0 as usize)
            .map(|node| &node.spec)
            .ok_or_else(|| BackendError::invalid_graph(format!("unknown node {id:?}")))
    }

    pub fn dtype(&self, id: NodeId) -> BackendResult<DType> {
        Ok(self.spec(id)?.dtype)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Seals the graph with the given result nodes.
    pub fn finish(self, outputs: Vec<NodeId>) -> BackendResult<Graph> {
        for output in &outputs {
            if output.0 as usize >= self.nodes.len() {
                return Err(BackendError::invalid_graph(format!(
                    "graph '{}' output {output:?} does not exist",
                    self.name
                )));
            }
        }
        Ok(Graph {
            name: self.name,
            nodes: self.nodes,
            outputs,
        })
    }

    fn emit(&mut self, op: Operation, operands: Vec<NodeId>, spec: NodeSpec) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            op,
            operands,
            spec,
        });
        id
    }

    fn same_dtype(&self, what: &str, lhs: NodeId, rhs: NodeId) -> BackendResult<DType> {
        let (a, b) = (self.dtype(lhs)?, self.dtype(rhs)?);
        if a != b {
            return Err(BackendError::invalid_graph(format!(
                "{what} operands disagree on dtype: {a:?} vs {b:?}"
            )));
        }
        Ok(a)
    }

    fn broadcast(&self, lhs: NodeId, rhs: NodeId) -> BackendResult<Vec<usize>> {
        let (a, b) = (self.spec(lhs)?, self.spec(rhs)?);
        broadcast_shapes(&a.shape, &b.shape)
            .map(|dims| dims.to_vec())
            .map_err(|err| BackendError::invalid_graph(err.to_string()))
    }
}
