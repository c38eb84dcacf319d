use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid TTL for key '{key}': must be at least one second")]
    InvalidTtl { key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
