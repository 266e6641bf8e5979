//! Error types for hotspec

use thiserror::Error;

/// Result type alias using [`HotError`]
pub type HotResult<T> = Result<T, HotError>;

#[derive(Error, Debug)]
pub enum HotError {
    /// Malformed spec text or structural violation found while compiling
    #[error("Spec compile error: {0}")]
    Compile(String),

    /// Failure reported by the reset/settle/load collaborator
    #[error("Environment error: {0}")]
    Environment(String),

    /// Unexpected console output collected by the console monitor
    #[error("Console error: {0}")]
    Console(String),

    /// Uncaught exception or crash of the page
    #[error("Page error: {0}")]
    PageError(String),

    #[error("Assertion failed for [{label}]\n  expected: {expected}\n    actual: {actual}")]
    Assertion {
        label: String,
        expected: String,
        actual: String,
    },

    /// Invalid command arguments or command sent in the wrong phase
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    ConfigSer(#[from] toml::ser::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl HotError {
    pub(crate) fn compile(msg: impl Into<String>) -> Self {
        HotError::Compile(msg.into())
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        HotError::Usage(msg.into())
    }
}
