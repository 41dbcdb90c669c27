use thiserror::Error;

/// Errors produced while loading resources or generating text.
#[derive(Error, Debug)]
pub enum Error {
    /// Vocabulary or engine configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller passed a value outside the operation's contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Model loading or an inference call failed.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Token id {id} out of range for vocabulary of size {vocab_size}")]
    OutOfRange { id: usize, vocab_size: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
