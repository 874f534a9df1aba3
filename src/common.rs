use thiserror::Error;

/// Errors that could occur while building or installing a collector.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The write endpoint could not be parsed into a valid URL.
    #[error("invalid write endpoint: {0}")]
    InvalidWriteEndpoint(String),

    /// The statsd endpoint could not be resolved into a socket address.
    #[error("invalid statsd endpoint: {0}")]
    InvalidStatsdEndpoint(String),

    /// The database name was empty.
    #[error("database name must not be empty")]
    EmptyDatabase,

    /// The submission interval was zero.
    #[error("submission interval must be non-zero")]
    ZeroSubmissionInterval,

    /// The maximum batch size was zero.
    #[error("max batch size must be non-zero")]
    ZeroMaxBatchSize,

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    FailedToCreateClient(String),

    /// Failed when trying to create the necessary Tokio runtime.
    #[error("failed to create Tokio runtime: {0}")]
    FailedToCreateRuntime(String),

    /// Failed to bind the local UDP socket.
    #[error("failed to bind statsd socket: {0}")]
    FailedToBindSocket(String),
}

/// Classified failure of a single batch submission.
///
/// A failed batch is logged and discarded; there is no retry queue. The
/// classification exists so the failure reason shows up in the logs.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request never produced a response (connect, DNS, timeout, ...).
    #[error("network error submitting batch: {0}")]
    Network(#[source] reqwest::Error),

    /// The server refused the configured credentials.
    #[error("authentication rejected by server (HTTP {status})")]
    Auth { status: u16 },

    /// The server answered with a non-success status for the batch itself.
    #[error("server rejected batch (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}
