use thiserror::Error;

use crate::config::ConfigError;
use crate::instance::InstanceError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("instance {id} not found")]
    NotFound { id: String },

    /// Extension requested for an instance with no running clock.
    #[error("instance {id} is not online")]
    NotOnline { id: String },

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
