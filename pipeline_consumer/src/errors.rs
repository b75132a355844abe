use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("stream buffer error: {0}")]
    StreamBuffer(#[from] stream_buffer::StreamError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
