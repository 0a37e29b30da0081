// src/error.rs
// Error types for the interposer

use std::time::Duration;

use thiserror::Error;

/// Main error type for the interposer library
#[derive(Error, Debug)]
pub enum InterposeError {
    #[error("frame exceeds maximum size of {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("resolver failure: {0}")]
    Resolver(#[from] ResolverFailure),

    #[error("failed to write answer to worker: {0}")]
    AnswerWrite(#[source] std::io::Error),

    #[error("failed to launch worker: {0}")]
    WorkerLaunch(String),

    #[error("worker exited with status {0}")]
    WorkerExit(i32),

    #[error("failed to read worker output: {0}")]
    StreamRead(#[source] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Result using InterposeError
pub type Result<T> = std::result::Result<T, InterposeError>;

impl InterposeError {
    /// Whether this error aborts the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::WorkerLaunch(_)
                | Self::StreamRead(_)
                | Self::Config(_)
        )
    }
}

/// Why a resolve cycle fell back to default answers
#[derive(Error, Debug)]
pub enum ResolverFailure {
    #[error("failed to spawn resolver: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("resolver I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("resolver timed out after {0:?}")]
    Timeout(Duration),

    #[error("resolver exited with status {}", .0.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    NonZeroExit(Option<i32>),

    #[error("resolver output contained no selection digit")]
    NoSelection,

    #[error("resolver selected option {selected} but the question has {options} option(s)")]
    OutOfRange { selected: usize, options: usize },
}

impl From<tokio::task::JoinError> for InterposeError {
    fn from(err: tokio::task::JoinError) -> Self {
        InterposeError::Io(std::io::Error::other(err.to_string()))
    }
}
