use thiserror::Error;

use crate::backend::spec::BackendError;

/// Errors surfaced by the dispatcher, the graph-cache ops and the functionalization pass.
///
/// Every variant is fatal to the call that produced it; nothing in this crate retries.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A registration or programming error, such as an aliasing op reaching the fallback.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// A scalar argument is incompatible with the dtype it would be combined with.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no kernel registered for operator '{op}' under {key}")]
    MissingKernel { op: String, key: String },
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("shape error: {0}")]
    Shape(String),
}

impl DispatchError {
    pub fn contract(message: impl Into<String>) -> Self {
        DispatchError::ContractViolation(message.into())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
