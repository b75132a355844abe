use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("dynamodb batch write failed: {0}")]
    BatchWrite(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SinkError>;
