//! Decoded frames and per-type views
//!
//! [`Frame`] is the raw header + body pair read off the wire. Each frame type
//! has a view (e.g. [`FireAndForgetFrame`]) that validates the body once and
//! then exposes typed accessors over it. [`TypedFrame`] is the sum of all
//! views, produced by [`Frame::into_typed`].

use crate::{FrameFlags, FrameHeader, FrameType, ProtocolError, Result, WriteableFrame, HEADER_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A decoded frame: header plus an immutable view of its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    body: Bytes,
}

impl Frame {
    /// Create a frame from its parts
    pub fn new(header: FrameHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Decode a complete frame (header followed by body)
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        let header = FrameHeader::decode(&bytes)?;
        bytes.advance(HEADER_LEN);
        Ok(Self { header, body: bytes })
    }

    /// Frame header
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Frame body (everything after the header)
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Stream identifier
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id()
    }

    /// Frame type
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type()
    }

    /// Frame flags
    pub fn flags(&self) -> FrameFlags {
        self.header.flags()
    }

    /// Encoded length (header + body)
    pub fn len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    /// A frame is never empty; it always carries a header
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode header and body into fresh bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.header.encode_into(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Validate the body against its frame type and wrap it in the typed view
    pub fn into_typed(self) -> Result<TypedFrame> {
        let typed = match self.frame_type() {
            FrameType::Reserved => return Err(ProtocolError::UnknownFrameType(0)),
            FrameType::Setup => TypedFrame::Setup(SetupFrame::from_frame(self)?),
            FrameType::Lease => TypedFrame::Lease(LeaseFrame::from_frame(self)?),
            FrameType::Keepalive => TypedFrame::Keepalive(KeepaliveFrame::from_frame(self)?),
            FrameType::RequestResponse => {
                TypedFrame::RequestResponse(RequestResponseFrame::from_frame(self)?)
            }
            FrameType::RequestFnf => {
                TypedFrame::FireAndForget(FireAndForgetFrame::from_frame(self)?)
            }
            FrameType::RequestStream => {
                TypedFrame::RequestStream(RequestStreamFrame::from_frame(self)?)
            }
            FrameType::RequestChannel => {
                TypedFrame::RequestChannel(RequestChannelFrame::from_frame(self)?)
            }
            FrameType::RequestN => TypedFrame::RequestN(RequestNFrame::from_frame(self)?),
            FrameType::Cancel => TypedFrame::Cancel(CancelFrame::from_frame(self)?),
            FrameType::Payload => TypedFrame::Payload(PayloadFrame::from_frame(self)?),
            FrameType::Error => TypedFrame::Error(ErrorFrame::from_frame(self)?),
            FrameType::MetadataPush => {
                TypedFrame::MetadataPush(MetadataPushFrame::from_frame(self)?)
            }
            FrameType::Resume => TypedFrame::Resume(ResumeFrame::from_frame(self)?),
            FrameType::ResumeOk => TypedFrame::ResumeOk(ResumeOkFrame::from_frame(self)?),
            FrameType::Ext => TypedFrame::Ext(ExtFrame::from_frame(self)?),
        };
        Ok(typed)
    }
}

/// Typed, validated view over a [`Frame`] of one frame type
pub trait FrameView: Sized {
    /// Frame type this view accepts
    const FRAME_TYPE: FrameType;

    /// Validate `frame` and wrap it
    fn from_frame(frame: Frame) -> Result<Self>;

    /// Pick this view out of a [`TypedFrame`]
    fn from_typed(frame: TypedFrame) -> Option<Self>;

    /// The underlying frame
    fn as_frame(&self) -> &Frame;

    /// Unwrap into the underlying frame
    fn into_frame(self) -> Frame;

    /// Stream identifier
    fn stream_id(&self) -> u32 {
        self.as_frame().stream_id()
    }

    /// Frame flags
    fn flags(&self) -> FrameFlags {
        self.as_frame().flags()
    }

    /// Serialize a writeable frame in memory and read it back as this view
    fn from_writeable(frame: &WriteableFrame) -> Result<Self> {
        Self::from_frame(frame.to_frame()?)
    }
}

/// Declares a view struct over [`Frame`] and its [`FrameView`] impl.
///
/// The view type must provide `fn check(frame: &Frame) -> Result<()>`.
macro_rules! frame_view {
    ($(#[$meta:meta])* $name:ident, $frame_type:expr, $variant:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            frame: $crate::Frame,
        }

        impl $crate::FrameView for $name {
            const FRAME_TYPE: $crate::FrameType = $frame_type;

            fn from_frame(frame: $crate::Frame) -> $crate::Result<Self> {
                if frame.frame_type() != Self::FRAME_TYPE {
                    return Err($crate::ProtocolError::UnexpectedFrameType {
                        expected: Self::FRAME_TYPE.name(),
                        actual: frame.frame_type().name(),
                    });
                }
                Self::check(&frame)?;
                Ok(Self { frame })
            }

            fn from_typed(frame: $crate::TypedFrame) -> Option<Self> {
                match frame {
                    $crate::TypedFrame::$variant(view) => Some(view),
                    _ => None,
                }
            }

            fn as_frame(&self) -> &$crate::Frame {
                &self.frame
            }

            fn into_frame(self) -> $crate::Frame {
                self.frame
            }
        }
    };
}


mod control;
mod request;
mod setup;

pub use control::{ErrorCode, ErrorFrame, KeepaliveFrame, LeaseFrame, MetadataPushFrame};
pub use request::{
    CancelFrame, ExtFrame, FireAndForgetFrame, PayloadFrame, RequestChannelFrame, RequestNFrame,
    RequestResponseFrame, RequestStreamFrame,
};
pub use setup::{ResumeFrame, ResumeOkFrame, SetupFrame, SetupParams, Version};

/// Every frame type, validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedFrame {
    /// SETUP
    Setup(SetupFrame),
    /// LEASE
    Lease(LeaseFrame),
    /// KEEPALIVE
    Keepalive(KeepaliveFrame),
    /// REQUEST_RESPONSE
    RequestResponse(RequestResponseFrame),
    /// REQUEST_FNF
    FireAndForget(FireAndForgetFrame),
    /// REQUEST_STREAM
    RequestStream(RequestStreamFrame),
    /// REQUEST_CHANNEL
    RequestChannel(RequestChannelFrame),
    /// REQUEST_N
    RequestN(RequestNFrame),
    /// CANCEL
    Cancel(CancelFrame),
    /// PAYLOAD
    Payload(PayloadFrame),
    /// ERROR
    Error(ErrorFrame),
    /// METADATA_PUSH
    MetadataPush(MetadataPushFrame),
    /// RESUME
    Resume(ResumeFrame),
    /// RESUME_OK
    ResumeOk(ResumeOkFrame),
    /// EXT
    Ext(ExtFrame),
}

impl TypedFrame {
    /// The underlying frame
    pub fn as_frame(&self) -> &Frame {
        match self {
            Self::Setup(f) => f.as_frame(),
            Self::Lease(f) => f.as_frame(),
            Self::Keepalive(f) => f.as_frame(),
            Self::RequestResponse(f) => f.as_frame(),
            Self::FireAndForget(f) => f.as_frame(),
            Self::RequestStream(f) => f.as_frame(),
            Self::RequestChannel(f) => f.as_frame(),
            Self::RequestN(f) => f.as_frame(),
            Self::Cancel(f) => f.as_frame(),
            Self::Payload(f) => f.as_frame(),
            Self::Error(f) => f.as_frame(),
            Self::MetadataPush(f) => f.as_frame(),
            Self::Resume(f) => f.as_frame(),
            Self::ResumeOk(f) => f.as_frame(),
            Self::Ext(f) => f.as_frame(),
        }
    }

    /// Frame header
    pub fn header(&self) -> &FrameHeader {
        self.as_frame().header()
    }

    /// Stream identifier
    pub fn stream_id(&self) -> u32 {
        self.as_frame().stream_id()
    }

    /// Frame type
    pub fn frame_type(&self) -> FrameType {
        self.as_frame().frame_type()
    }
}

pub(crate) fn read_u16(body: &[u8], at: usize) -> u16 {
    body.get(at..at + 2).map(|mut b| b.get_u16()).unwrap_or(0)
}

pub(crate) fn read_u32(body: &[u8], at: usize) -> u32 {
    body.get(at..at + 4).map(|mut b| b.get_u32()).unwrap_or(0)
}

pub(crate) fn read_u64(body: &[u8], at: usize) -> u64 {
    body.get(at..at + 8).map(|mut b| b.get_u64()).unwrap_or(0)
}

pub(crate) fn require_len(frame: &Frame, min: usize) -> Result<()> {
    if frame.body().len() < min {
        return Err(ProtocolError::incomplete(frame.frame_type().name()));
    }
    Ok(())
}
