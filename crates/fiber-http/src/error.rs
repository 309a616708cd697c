use std::io;

use fiber_core::RuntimeError;

/// Result type for client pool operations.
pub type HttpResult<T> = Result<T, HttpError>;

/// Errors produced by the client pool.
///
/// Setup and acquisition errors are returned by `ClientPool::new` and
/// `ClientPool::acquire`; protocol and transport errors are the outcome of a
/// request whose connection has already been closed.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Fiber runtime failure (pool exhausted, resource limit query, ...).
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Rejected `PoolConfig`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// socket(2) failed.
    #[error("socket creation failed: {0}")]
    Socket(#[source] io::Error),

    /// setsockopt(2) failed.
    #[error("setting {option} failed: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    /// The new socket could not be added to the reactor.
    #[error("reactor registration failed: {0}")]
    Register(#[source] RuntimeError),

    /// A descriptor beyond the table sized at pool init.
    #[error("fd {fd} outside descriptor table (limit {limit})")]
    FdOutOfRange { fd: i32, limit: usize },

    /// The descriptor is not an open connection of this pool.
    #[error("fd {fd} is not a tracked connection")]
    UnknownConnection { fd: i32 },

    /// Response does not start with `HTTP/`.
    #[error("malformed status line")]
    MalformedStatusLine,

    /// No numeric status code after the protocol version.
    #[error("missing or invalid status code")]
    MissingStatus,

    /// Peer closed before the end of the header block.
    #[error("connection closed before end of headers")]
    PartialHeaders,

    /// Peer closed before `Content-Length` bytes arrived.
    #[error("connection closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },

    /// Peer closed before the terminating zero-size chunk.
    #[error("connection closed inside chunked body")]
    TruncatedChunked,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    /// Bad chunk-size line or missing chunk delimiter.
    #[error("invalid chunked encoding")]
    InvalidChunk,

    /// read/write failure on the connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The request fiber ended without producing an outcome.
    #[error("request abandoned")]
    Abandoned,

    /// `ClientPool::shutdown` was called.
    #[error("client pool is shut down")]
    Shutdown,
}

impl HttpError {
    /// Whether this error came from the response bytes rather than the
    /// transport or local setup.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            HttpError::MalformedStatusLine
                | HttpError::MissingStatus
                | HttpError::PartialHeaders
                | HttpError::TruncatedBody { .. }
                | HttpError::TruncatedChunked
                | HttpError::InvalidContentLength
                | HttpError::InvalidChunk
        )
    }
}
