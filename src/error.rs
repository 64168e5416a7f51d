//! Error types for graph and pattern execution.

use thiserror::Error;

/// The main error type for graphflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A step invocable reported failure (network, provider, validation).
    #[error("Step '{step}' failed: {message}")]
    Step {
        /// The name of the step or node that failed.
        step: String,
        /// The underlying failure message.
        message: String,
    },

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The graph contains a cycle and cannot be executed.
    #[error("Cycle detected involving node '{node}'")]
    CyclicGraph {
        /// A node known to lie on the cycle.
        node: String,
    },

    /// A node id was referenced that does not belong to the graph.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// The run was cancelled by its consumer.
    ///
    /// Distinct from failure: cancellation is never reported as an `error`
    /// progress event.
    #[error("Run cancelled")]
    Cancelled,

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Attribute an error to a named step, preserving cancellation and
    /// existing step attribution.
    pub(crate) fn into_step(self, step: &str) -> Error {
        match self {
            Error::Cancelled => Error::Cancelled,
            Error::Step { .. } => self,
            other => Error::Step {
                step: step.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for graphflow operations.
pub type Result<T> = std::result::Result<T, Error>;
