//! # RSocket Protocol
//!
//! Frame wire format for RSocket: the 6-byte frame header, the shared
//! optional-metadata payload convention, typed views over every frame type,
//! outbound frame builders and the length-prefixed transport codec.

#![warn(missing_docs)]

/// Frame header, frame types and flags
pub mod header;

/// Optional-metadata payload convention
pub mod payload;

/// Decoded frames and per-type views
pub mod frame;

/// Outbound frames
pub mod writeable;

/// Scratch-buffer pool
pub mod pool;

/// Frame codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::{FrameCodec, FRAME_LENGTH_PREFIX, MAX_FRAME_SIZE};
pub use error::{ProtocolError, Result};
pub use frame::{
    CancelFrame, ErrorCode, ErrorFrame, ExtFrame, FireAndForgetFrame, Frame, FrameView,
    KeepaliveFrame, LeaseFrame, MetadataPushFrame, PayloadFrame, RequestChannelFrame,
    RequestNFrame, RequestResponseFrame, RequestStreamFrame, ResumeFrame, ResumeOkFrame,
    SetupFrame, SetupParams, TypedFrame, Version,
};
pub use header::{
    FrameFlags, FrameHeader, FrameType, CONNECTION_STREAM_ID, HEADER_LEN, MAX_STREAM_ID,
};
pub use payload::PayloadRegion;
pub use pool::{BufferPool, PoolConfig, PoolStats, PooledBuf};
pub use writeable::{WriteReport, WriteableFrame};
