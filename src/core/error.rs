use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Embedding cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Vector store write failed: {0}")]
    StoreWrite(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

impl Error {
    /// Whether this error must abort an indexing run.
    ///
    /// `CacheUnavailable` is not listed here: whether it aborts depends on the
    /// configured [`CachePolicy`](crate::core::config::CachePolicy).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfiguration(_)
                | Error::ModelUnavailable(_)
                | Error::StoreWrite(_)
                | Error::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
