use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("stream buffer error: {0}")]
    StreamBuffer(#[from] stream_buffer::StreamError),

    #[error("sink error: {0}")]
    Sink(#[from] sink_writer::SinkError),

    #[error("drain cycle produced no persisted entries out of {attempted}; unpersisted={unpersisted:?}")]
    NothingPersisted {
        attempted: usize,
        unpersisted: Vec<String>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DrainError>;
