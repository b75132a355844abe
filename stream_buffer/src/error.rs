use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("backend returned a nil result for an operation that must always answer")]
    NilResult,

    #[error("message field {0} missing or malformed")]
    MalformedMessage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
