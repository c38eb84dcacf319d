use thiserror::Error;

/// Why a single delivery failed. Never surfaced to broadcasters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The client's transport is gone; the hub drops the subscription.
    #[error("transport closed")]
    Closed,

    #[error("client buffer full")]
    Backpressure,

    #[error("transport error: {0}")]
    Transport(String),
}
