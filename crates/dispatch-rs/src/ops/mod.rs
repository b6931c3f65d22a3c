//! Graph-cached binary operators and the native kernel library built on them.

pub mod binary;
pub mod expression;
pub mod graph_cache;
pub mod kind;
pub mod native;
pub mod schemas;
pub mod signature;

pub use binary::{result_dtype, BinaryOpDispatcher};
pub use expression::{
    ArithmeticExpression, BinaryExpression, ComparisonExpression, DivisionExpression,
    LogicalExpression,
};
pub use graph_cache::{CachePolicy, CachedGraph, GraphCache, GraphCacheStats};
pub use kind::{BinaryOpKind, OpFamily, RoundingMode};
pub use native::register_native_ops;
pub use schemas::{native_schemas, register_native_schemas};
pub use signature::{
    binary_signature, SignatureArg, SignatureBuilder, SignatureKey, SignatureVariant,
};
