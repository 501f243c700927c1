//! Error types for network operations.

use crate::frame::MAX_MESSAGE_SIZE;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to connect to a remote endpoint.
    #[error("connection error: {0}")]
    Connect(String),

    /// Socket-level I/O failure on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame or a field inside a frame could not be decoded.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// A message exceeded [`MAX_MESSAGE_SIZE`].
    #[error("message too large: {0} bytes (max {max})", max = MAX_MESSAGE_SIZE)]
    MessageTooLarge(usize),

    /// A well-formed message of a type the receiver did not expect.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A response carried a different correlation id than its request.
    #[error("correlation id mismatch: sent {sent}, received {received}")]
    CorrelationMismatch {
        /// Correlation id of the request.
        sent: i64,
        /// Correlation id found in the response.
        received: i64,
    },

    /// The peer closed the stream before a full message arrived.
    #[error("stream closed")]
    StreamClosed,
}
