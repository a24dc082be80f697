//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer bytes than a frame header needs
    #[error("Malformed frame header: need {needed} bytes, got {available}")]
    MalformedHeader {
        /// Bytes required
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Body shorter than the frame type requires
    #[error("Incomplete {frame_type} frame")]
    IncompleteFrame {
        /// Name of the frame type that failed validation
        frame_type: &'static str,
    },

    /// Frame type code not in the registry
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// A view was asked to wrap a frame of another type
    #[error("Expected {expected} frame, got {actual}")]
    UnexpectedFrameType {
        /// Type the view accepts
        expected: &'static str,
        /// Type actually found
        actual: &'static str,
    },

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Metadata does not fit the 24-bit length prefix
    #[error("Payload too large to encode: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Actual metadata size
        size: usize,
        /// Maximum encodable size
        max: usize,
    },

    /// Text field is not valid UTF-8
    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Field that held the bad bytes
        field: &'static str,
    },

    /// I/O error on the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Shorthand for an [`ProtocolError::IncompleteFrame`] error
    pub(crate) fn incomplete(frame_type: &'static str) -> Self {
        Self::IncompleteFrame { frame_type }
    }

    /// Whether this error signals a broken invariant rather than a bad frame.
    ///
    /// Fatal errors come from the encode side: a frame that cannot be
    /// represented on the wire at all. Retrying the same operation will fail
    /// the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. })
    }

    /// Whether the error invalidates the byte stream it came from.
    ///
    /// After one of these the reader no longer knows where the next frame
    /// starts, so the connection has to go.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. } | Self::FrameTooLarge { .. } | Self::Io(_)
        )
    }
}

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
