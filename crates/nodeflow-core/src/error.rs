use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeflowError {
    // Executor errors
    #[error("Executor failed: {kind}: {message}")]
    Executor { kind: String, message: String },

    #[error("No executor registered for node kind: {0}")]
    ExecutorNotFound(String),

    #[error("Executor timeout after {timeout_secs}s: {kind}")]
    ExecutorTimeout { kind: String, timeout_secs: u64 },

    #[error("Invalid config for node {node_id}: {message}")]
    InvalidNodeConfig { node_id: String, message: String },

    // Run errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Loop {loop_id} exceeded its {timeout_secs}s time budget")]
    LoopTimeout { loop_id: String, timeout_secs: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeflowError {
    /// Shorthand for an executor failure with a human-readable message.
    pub fn executor(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeflowError>;
