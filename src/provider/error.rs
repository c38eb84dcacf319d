use thiserror::Error;

use super::types::Provider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Request { provider: Provider, message: String },

    #[error("{provider} API returned {status}: {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("{provider} authentication failed: {message}")]
    Auth { provider: Provider, message: String },

    #[error("unexpected {provider} response: {message}")]
    Decode { provider: Provider, message: String },

    #[error("{label} failed: {message}")]
    Command { label: String, message: String },

    #[error("instance {id} not found")]
    InstanceNotFound { id: String },

    #[error("{provider} returned no operation handle for {id}")]
    MissingOperation { provider: Provider, id: String },

    #[error("operation {operation_id} still pending after the wait deadline")]
    OperationPending { operation_id: String },

    #[error("simulated provider failure: {0}")]
    Simulated(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
