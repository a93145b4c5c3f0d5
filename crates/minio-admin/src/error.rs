use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result type for admin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the MinIO admin channel.
#[derive(Debug, Error)]
pub enum Error {
    /// The client exited with a non-zero status.
    #[error("mc {command} exited with {status}: {message}")]
    Command {
        /// Short name of the command that failed.
        command: &'static str,
        /// Exit status of the client.
        status: ExitStatus,
        /// Message reported by the client, if any.
        message: String,
    },

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The client produced output that could not be parsed.
    #[error("failed to parse mc {0} output: {1}")]
    Json(&'static str, #[source] serde_json::Error),

    /// The client did not answer before the deadline.
    #[error("mc {command} timed out after {timeout:?}")]
    Timeout {
        /// Short name of the command that timed out.
        command: &'static str,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The admin endpoint URL could not be built.
    #[error("invalid admin endpoint: {0}")]
    Url(String),

    /// An unknown anonymous access policy was requested.
    #[error("unknown bucket policy: {0}")]
    UnknownPolicy(String),
}
