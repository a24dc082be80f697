//! Connection control frames: ERROR, KEEPALIVE, LEASE, METADATA_PUSH

use super::{read_u32, read_u64, require_len, Frame};
use crate::{FrameFlags, FrameType, ProtocolError, Result};
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Error codes carried by ERROR frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// SETUP frame is invalid
    InvalidSetup,
    /// SETUP parameters are not supported
    UnsupportedSetup,
    /// Server rejected the SETUP
    RejectedSetup,
    /// Server rejected the RESUME
    RejectedResume,
    /// Connection is being terminated
    ConnectionError,
    /// Connection is being closed cleanly
    ConnectionClose,
    /// Application-level failure on a stream
    ApplicationError,
    /// Responder rejected the request
    Rejected,
    /// Responder cancelled the request
    Canceled,
    /// Request is invalid
    Invalid,
    /// Any other code, kept verbatim
    Other(u32),
}

impl ErrorCode {
    /// Wire value
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidSetup => 0x0000_0001,
            Self::UnsupportedSetup => 0x0000_0002,
            Self::RejectedSetup => 0x0000_0003,
            Self::RejectedResume => 0x0000_0004,
            Self::ConnectionError => 0x0000_0101,
            Self::ConnectionClose => 0x0000_0102,
            Self::ApplicationError => 0x0000_0201,
            Self::Rejected => 0x0000_0202,
            Self::Canceled => 0x0000_0203,
            Self::Invalid => 0x0000_0204,
            Self::Other(code) => code,
        }
    }

    /// Look up an error code by wire value
    pub fn from_code(code: u32) -> Self {
        match code {
            0x0000_0001 => Self::InvalidSetup,
            0x0000_0002 => Self::UnsupportedSetup,
            0x0000_0003 => Self::RejectedSetup,
            0x0000_0004 => Self::RejectedResume,
            0x0000_0101 => Self::ConnectionError,
            0x0000_0102 => Self::ConnectionClose,
            0x0000_0201 => Self::ApplicationError,
            0x0000_0202 => Self::Rejected,
            0x0000_0203 => Self::Canceled,
            0x0000_0204 => Self::Invalid,
            other => Self::Other(other),
        }
    }

    /// Whether this code terminates the whole connection
    pub fn is_connection_error(self) -> bool {
        matches!(
            self,
            Self::InvalidSetup
                | Self::UnsupportedSetup
                | Self::RejectedSetup
                | Self::RejectedResume
                | Self::ConnectionError
                | Self::ConnectionClose
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidSetup => "INVALID_SETUP",
            Self::UnsupportedSetup => "UNSUPPORTED_SETUP",
            Self::RejectedSetup => "REJECTED_SETUP",
            Self::RejectedResume => "REJECTED_RESUME",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::ConnectionClose => "CONNECTION_CLOSE",
            Self::ApplicationError => "APPLICATION_ERROR",
            Self::Rejected => "REJECTED",
            Self::Canceled => "CANCELED",
            Self::Invalid => "INVALID",
            Self::Other(code) => return write!(f, "ERROR_{:#010x}", code),
        };
        f.write_str(name)
    }
}

frame_view!(
    /// ERROR: failure on a stream, or on the connection when sent on stream 0
    ErrorFrame,
    FrameType::Error,
    Error
);

impl ErrorFrame {
    /// Error code
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(read_u32(self.frame.body(), 0))
    }

    /// Raw error data following the code
    pub fn error_data(&self) -> Bytes {
        self.frame.body().slice(4..)
    }

    /// Error data as text
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.frame.body()[4..])
    }

    fn check(frame: &Frame) -> Result<()> {
        require_len(frame, 4)
    }
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

frame_view!(
    /// KEEPALIVE: liveness check carrying the sender's resume position
    KeepaliveFrame,
    FrameType::Keepalive,
    Keepalive
);

impl KeepaliveFrame {
    /// Last position received by the sender (for resumption)
    pub fn last_received_position(&self) -> u64 {
        read_u64(self.frame.body(), 0)
    }

    /// Receiver must answer with its own KEEPALIVE
    pub fn respond(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::RESPOND)
    }

    /// Opaque data to echo back
    pub fn data(&self) -> Bytes {
        self.frame.body().slice(8..)
    }

    fn check(frame: &Frame) -> Result<()> {
        require_len(frame, 8)
    }
}

frame_view!(
    /// LEASE: grants the peer a number of requests for a time window
    LeaseFrame,
    FrameType::Lease,
    Lease
);

impl LeaseFrame {
    /// Validity window of the lease
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(u64::from(read_u32(self.frame.body(), 0)))
    }

    /// Requests allowed during the window
    pub fn number_of_requests(&self) -> u32 {
        read_u32(self.frame.body(), 4)
    }

    /// Lease metadata; it fills the rest of the frame and has no length prefix
    pub fn metadata(&self) -> Option<Bytes> {
        if self.frame.header().has_metadata() {
            Some(self.frame.body().slice(8..))
        } else {
            None
        }
    }

    fn check(frame: &Frame) -> Result<()> {
        require_len(frame, 8)
    }
}

frame_view!(
    /// METADATA_PUSH: connection-level metadata with no data
    MetadataPushFrame,
    FrameType::MetadataPush,
    MetadataPush
);

impl MetadataPushFrame {
    /// The pushed metadata (the whole body)
    pub fn metadata(&self) -> Bytes {
        self.frame.body().clone()
    }

    /// Metadata as text
    pub fn metadata_utf8(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.frame.body())
    }

    fn check(frame: &Frame) -> Result<()> {
        if !frame.header().has_metadata() {
            return Err(ProtocolError::incomplete(FrameType::MetadataPush.name()));
        }
        Ok(())
    }
}
