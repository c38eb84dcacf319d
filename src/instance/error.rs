use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::ReadonlyMode;
use crate::provider::{PowerAction, ProviderError};

/// Synchronous failures of instance operations, surfaced to the caller.
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("instance {id} is already running")]
    AlreadyRunning { id: String },

    #[error("instance {id} is already stopped ({status})")]
    AlreadyStopped { id: String, status: String },

    #[error("instance {id} is {mode}: {action} is not allowed")]
    ReadOnlyViolation {
        id: String,
        mode: ReadonlyMode,
        action: PowerAction,
    },

    #[error("instance {id} expires at {expires_at}, too early to extend")]
    TooEarlyToExtend {
        id: String,
        expires_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type InstanceResult<T> = Result<T, InstanceError>;
