use thiserror::Error;

use super::types::OperationFailure;
use crate::provider::ProviderError;

/// Asynchronous outcome of a start/stop, never returned to the requesting caller.
#[derive(Error, Debug)]
pub enum OperationError {
    /// The provider finished the operation with an error payload.
    #[error("{} operation {} failed ({}): {}", .0.action, .0.operation_id, .0.category, .0.message)]
    Failed(OperationFailure),

    /// Waiting on the operation itself failed; the outcome is unknown.
    #[error("waiting on operation {operation_id} failed: {source}")]
    Wait {
        operation_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("monitor for operation {operation_id} was cancelled")]
    Cancelled { operation_id: String },
}

impl OperationError {
    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            OperationError::Failed(f) => Some(f),
            _ => None,
        }
    }
}
