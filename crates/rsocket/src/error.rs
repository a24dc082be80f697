//! Error types for the connection layer

use rsocket_proto::{ErrorCode, FrameType, ProtocolError};
use thiserror::Error;

/// Main error type for connection operations
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Operation attempted after the connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The read loop was already started
    #[error("Connection already started")]
    AlreadyStarted,

    /// I/O errors on the transport
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A frame group reached the transport only in part
    #[error("Partial write after {written} bytes: {source}")]
    PartialWrite {
        /// Bytes the transport accepted before the failure
        written: usize,
        /// What stopped the write
        source: ProtocolError,
    },

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// A frame arrived on a stream its type does not belong to
    #[error("{frame_type} frame not allowed on stream {stream_id}")]
    InvalidStream {
        /// Stream the frame arrived on
        stream_id: u32,
        /// Type of the offending frame
        frame_type: FrameType,
    },

    /// A connection-level handler failed with a connection error code
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Transport(e),
            other => Self::Protocol(other),
        }
    }
}

impl ConnectionError {
    /// Classify a failed write of `written` bytes
    pub(crate) fn write_failed(written: usize, source: ProtocolError) -> Self {
        if written == 0 {
            source.into()
        } else {
            Self::PartialWrite { written, source }
        }
    }
}

/// Failure reported by a frame handler.
///
/// The dispatcher answers with an ERROR frame carrying `code` and `message`
/// on the stream the frame arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    /// Error code sent to the peer
    pub code: ErrorCode,
    /// Human-readable message sent to the peer
    pub message: String,
}

impl HandlerError {
    /// Create a handler error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// APPLICATION_ERROR
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApplicationError, message)
    }

    /// REJECTED
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Rejected, message)
    }

    /// INVALID
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }
}
