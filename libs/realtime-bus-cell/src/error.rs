use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Relay error: {0}")]
    RelayError(String),
}
