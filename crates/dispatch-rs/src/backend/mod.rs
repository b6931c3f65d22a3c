pub mod builder;
pub mod spec;

pub use builder::GraphBuilder;
pub use spec::{
    BackendError, BackendResult, ComparisonOp, ElementwiseBinaryOp, ElementwiseUnaryOp, Feed,
    Graph, GraphBackend, LogicalOp, Node, NodeId, NodeSpec, Operation, PlaceholderKind,
};
