//! # Errors
//!
//! One error type for the whole library. The only distinction the assistant
//! makes at runtime is between conditions it heals on its own (a missing note
//! file, a missing index) and everything else, which aborts the current
//! operation. The self-healing cases never reach this type.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load embedding model: {0}")]
    EmbeddingModel(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector index at {path} is corrupted: {reason}")]
    CorruptedIndex { path: PathBuf, reason: String },

    #[error("Vector index error: {0}")]
    Index(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Language model request failed: {0}")]
    Llm(#[from] async_openai::error::OpenAIError),

    #[error("Language model returned no content")]
    EmptyResponse,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cloud store error: {0}")]
    Cloud(String),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Wrap an [`std::io::Error`] together with the path that produced it.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupted(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::CorruptedIndex {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl From<candle_core::Error> for Error {
    fn from(err: candle_core::Error) -> Self {
        Error::Embedding(err.to_string())
    }
}
