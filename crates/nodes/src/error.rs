//! Node-level error type.

use thiserror::Error;

/// Errors returned by an executor's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: the attempt is repeated with exponential back-off until
///   the node's `max_attempts` is reached.
/// - `Fatal`: the node is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    /// The underlying failure text, exactly as the executor reported it.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
