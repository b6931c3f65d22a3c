//! Graph IR and the contract every graph backend implements.
//!
//! Graphs are small SSA programs: placeholders feed elementwise nodes and the caller fetches any
//! node into a destination tensor. Backends compile a [`Graph`] once into an opaque executable
//! and then execute it many times against fresh feeds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::{DType, Dims, Scalar, Tensor};

/// Identifier of a node inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// How a placeholder expects to be fed at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaceholderKind {
    /// Bound to a tensor buffer of the declared shape.
    Buffer,
    /// Bound to an immediate scalar value; the node is zero-dimensional.
    Scalar,
}

/// Comparator used by `compare` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
}

/// Elementwise unary ops understood by graph backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseUnaryOp {
    Neg,
    Exp,
    Log,
    Floor,
    Trunc,
}

/// Elementwise binary ops understood by graph backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Maximum,
    Minimum,
    Atan2,
    Remainder,
}

/// Boolean connectives; operands are interpreted by truthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
}

/// Static type of a node's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSpec {
    pub dtype: DType,
    pub shape: Dims,
}

impl NodeSpec {
    pub fn new(dtype: DType, shape: &[usize]) -> Self {
        NodeSpec {
            dtype,
            shape: Dims::from_slice(shape),
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Declarative form of graph operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Placeholder(PlaceholderKind),
    ElementwiseBinary(ElementwiseBinaryOp),
    ElementwiseUnary(ElementwiseUnaryOp),
    Compare(ComparisonOp),
    Logical(LogicalOp),
    Cast(DType),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Placeholder(PlaceholderKind::Buffer) => "placeholder",
            Operation::Placeholder(PlaceholderKind::Scalar) => "scalar_placeholder",
            Operation::ElementwiseBinary(_) => "elementwise_binary",
            Operation::ElementwiseUnary(_) => "elementwise_unary",
            Operation::Compare(_) => "compare",
            Operation::Logical(_) => "logical",
            Operation::Cast(_) => "cast",
        }
    }
}

/// Single SSA node; operands always precede the node in [`Graph::nodes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub op: Operation,
    pub operands: Vec<NodeId>,
    pub spec: NodeSpec,
}

/// Topologically ordered graph handed to [`GraphBackend::compile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub outputs: Vec<NodeId>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).filter(|node| node.id == id)
    }

    /// Placeholders in creation order.
    pub fn placeholders(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.op, Operation::Placeholder(_)))
    }
}

/// Runtime binding for a placeholder.
#[derive(Debug, Clone)]
pub enum Feed {
    Buffer(Tensor),
    Scalar(Scalar),
}

/// Errors reported by graph construction and backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    InvalidGraph { message: String },
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
}

impl BackendError {
    pub fn invalid_graph(message: impl Into<String>) -> Self {
        BackendError::InvalidGraph {
            message: message.into(),
        }
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::InvalidGraph { message } => write!(f, "invalid graph: {message}"),
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend that compiles graphs once and executes them synchronously.
pub trait GraphBackend: Send + Sync {
    /// Compiled, immutable form of a graph. Shared across threads by the graph cache.
    type Executable: Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g., `"ref-cpu"`).
    fn backend_name(&self) -> &str;

    /// Lowers `graph` into an executable. Called once per distinct signature.
    fn compile(&self, graph: &Graph) -> BackendResult<Self::Executable>;

    /// Runs `executable`, binding `feeds` to placeholders and writing each fetched node into its
    /// destination tensor. Blocks until every fetch has materialized.
    fn execute(
        &self,
        executable: &Self::Executable,
        feeds: &[(NodeId, Feed)],
        fetches: &[(NodeId, Tensor)],
    ) -> BackendResult<()>;
}
