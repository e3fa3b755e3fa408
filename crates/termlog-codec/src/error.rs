use thiserror::Error;

/// Errors produced by the log codec.
///
/// Running out of chunk space is not an error: `write` and `cut` report it
/// through their `bool` result and the caller starts a new message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("allocation failed: {0}")]
    Alloc(#[from] std::collections::TryReserveError),

    #[error("config error: {0}")]
    Config(String),

    #[error("packet does not fit an empty chunk of {0} bytes")]
    ChunkTooSmall(usize),

    #[error("sink error: {0}")]
    Sink(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Config(e.to_string())
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
