//! Error types for Shardread Core

use thiserror::Error;

/// Result type alias using Shardread Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for replicated reads
#[derive(Error, Debug)]
pub enum Error {
    /// The request context was cancelled
    #[error("context canceled")]
    Cancelled,

    /// The request context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Replication set cannot be executed as described
    #[error("Invalid replication set: {0}")]
    InvalidReplicationSet(String),

    /// Configuration validation errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single replica failed to serve the request
    #[error("Instance {addr} failed: {message}")]
    Instance {
        /// Address of the failing instance
        addr: String,
        /// Failure reported by the instance
        message: String,
    },

    /// Transport-level errors (connection, stream receive)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Streamed reply violated the expected protocol
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an instance failure
    pub fn instance(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Instance {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid replication set error
    pub fn invalid_replication_set(msg: impl Into<String>) -> Self {
        Self::InvalidReplicationSet(msg.into())
    }

    /// Create a configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from a cancelled or expired context
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Protocol violations observed while consuming a streamed series reply
#[derive(Error, Debug)]
pub enum StreamError {
    /// The stream ended before the declared number of series arrived
    #[error("expected to receive {expected} series, but got EOF after receiving {received} series")]
    UnexpectedEof {
        /// Declared series count
        expected: usize,
        /// Series received before the end of stream
        received: usize,
    },

    /// The stream carried more series than declared
    #[error("expected to receive only {expected} series, but received more than this")]
    TooManySeries {
        /// Declared series count
        expected: usize,
    },

    /// Every buffered series has already been consumed
    #[error(
        "attempted to read series at index {index} from stream, but the stream has already been exhausted"
    )]
    Exhausted {
        /// Requested series index
        index: usize,
    },

    /// The producer reported a terminal failure
    #[error("attempted to read series at index {index} from stream, but the stream has failed: {source}")]
    Failed {
        /// Requested series index
        index: usize,
        /// Failure reported by the producer
        #[source]
        source: Box<Error>,
    },

    /// The next buffered series is not the one requested
    #[error(
        "attempted to read series at index {requested} from stream, but the stream has series with index {actual}"
    )]
    IndexMismatch {
        /// Requested series index
        requested: usize,
        /// Index of the series at the head of the buffer
        actual: usize,
    },

    /// `get_chunks` was called before `start_buffering`
    #[error("attempted to read series at index {index} from stream before buffering was started")]
    NotStarted {
        /// Requested series index
        index: usize,
    },
}
