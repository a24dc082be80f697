//! Frame header: stream id, frame type and flags

use crate::{ProtocolError, Result};
use bytes::{Buf, BufMut};
use std::fmt;

/// Encoded header length in bytes
pub const HEADER_LEN: usize = 6;

/// Largest valid stream id; the top bit of the id field is reserved
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Stream id reserved for connection-level frames
pub const CONNECTION_STREAM_ID: u32 = 0;

const FRAME_TYPE_SHIFT: u16 = 10;
const FLAGS_MASK: u16 = 0x03FF;

/// Frame type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Reserved code, never sent
    Reserved = 0x00,
    /// Connection setup
    Setup = 0x01,
    /// Lease grant
    Lease = 0x02,
    /// Connection keepalive
    Keepalive = 0x03,
    /// Request with a single response
    RequestResponse = 0x04,
    /// Request with no response
    RequestFnf = 0x05,
    /// Request with a stream of responses
    RequestStream = 0x06,
    /// Bidirectional stream request
    RequestChannel = 0x07,
    /// Additional demand for a stream
    RequestN = 0x08,
    /// Cancel an outstanding request
    Cancel = 0x09,
    /// Payload on an open stream
    Payload = 0x0A,
    /// Connection or stream error
    Error = 0x0B,
    /// Connection-level metadata
    MetadataPush = 0x0C,
    /// Resume a previous session
    Resume = 0x0D,
    /// Resume accepted
    ResumeOk = 0x0E,
    /// Extension frame
    Ext = 0x3F,
}

impl FrameType {
    /// Look up a frame type by its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        let frame_type = match code {
            0x00 => Self::Reserved,
            0x01 => Self::Setup,
            0x02 => Self::Lease,
            0x03 => Self::Keepalive,
            0x04 => Self::RequestResponse,
            0x05 => Self::RequestFnf,
            0x06 => Self::RequestStream,
            0x07 => Self::RequestChannel,
            0x08 => Self::RequestN,
            0x09 => Self::Cancel,
            0x0A => Self::Payload,
            0x0B => Self::Error,
            0x0C => Self::MetadataPush,
            0x0D => Self::Resume,
            0x0E => Self::ResumeOk,
            0x3F => Self::Ext,
            _ => return None,
        };
        Some(frame_type)
    }

    /// Wire code of this frame type
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Protocol name of this frame type
    pub fn name(self) -> &'static str {
        match self {
            Self::Reserved => "RESERVED",
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Resume => "RESUME",
            Self::ResumeOk => "RESUME_OK",
            Self::Ext => "EXT",
        }
    }

    /// Whether frames of this type may travel on stream 0
    pub fn is_connection_scoped(self) -> bool {
        matches!(
            self,
            Self::Setup
                | Self::Lease
                | Self::Keepalive
                | Self::MetadataPush
                | Self::Resume
                | Self::ResumeOk
                | Self::Error
        )
    }

    /// Whether frames of this type may travel on a non-zero stream
    pub fn is_stream_scoped(self) -> bool {
        matches!(
            self,
            Self::RequestResponse
                | Self::RequestFnf
                | Self::RequestStream
                | Self::RequestChannel
                | Self::RequestN
                | Self::Cancel
                | Self::Payload
                | Self::Error
                | Self::Ext
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame flags for protocol control (10 bits on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(pub u16);

impl FrameFlags {
    /// No special flags
    pub const NONE: Self = Self(0);
    /// Frame may be ignored if not understood
    pub const IGNORE: Self = Self(0x200);
    /// Metadata present
    pub const METADATA: Self = Self(0x100);
    /// More fragments follow
    pub const FOLLOW: Self = Self(0x080);
    /// SETUP: client requests resumption
    pub const RESUME_ENABLE: Self = Self(0x080);
    /// KEEPALIVE: peer must answer
    pub const RESPOND: Self = Self(0x080);
    /// Stream completion
    pub const COMPLETE: Self = Self(0x040);
    /// SETUP: client honours leases
    pub const LEASE: Self = Self(0x040);
    /// PAYLOAD carries a next element
    pub const NEXT: Self = Self(0x020);

    /// Build flags from raw bits, dropping anything outside the 10-bit field
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & FLAGS_MASK)
    }

    /// Raw bit value
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Check if a flag is set
    pub fn has_flag(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Set a flag
    pub fn set_flag(&mut self, flag: FrameFlags) {
        self.0 |= flag.0;
    }

    /// Clear a flag
    pub fn clear_flag(&mut self, flag: FrameFlags) {
        self.0 &= !flag.0;
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Fixed six-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    stream_id: u32,
    frame_type: FrameType,
    flags: FrameFlags,
}

impl FrameHeader {
    /// Create a new header. The reserved top bit of `stream_id` is dropped.
    pub fn new(stream_id: u32, frame_type: FrameType, flags: FrameFlags) -> Self {
        Self {
            stream_id: stream_id & MAX_STREAM_ID,
            frame_type,
            flags: FrameFlags::from_bits(flags.bits()),
        }
    }

    /// Stream identifier
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Frame type
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Frame flags
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Whether the metadata flag is set
    pub fn has_metadata(&self) -> bool {
        self.flags.has_flag(FrameFlags::METADATA)
    }

    /// Whether this header addresses the connection rather than a stream
    pub fn is_connection_level(&self) -> bool {
        self.stream_id == CONNECTION_STREAM_ID
    }

    /// Encode into a fixed array
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut cursor = &mut out[..];
        self.encode_into(&mut cursor);
        out
    }

    /// Append the encoded header to `buf`
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.stream_id);
        buf.put_u16((u16::from(self.frame_type.code()) << FRAME_TYPE_SHIFT) | self.flags.bits());
    }

    /// Decode a header from the front of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::MalformedHeader {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }

        let mut cursor = &bytes[..HEADER_LEN];
        let stream_id = cursor.get_u32() & MAX_STREAM_ID;
        let packed = cursor.get_u16();
        let code = (packed >> FRAME_TYPE_SHIFT) as u8;
        let frame_type = FrameType::from_code(code).ok_or(ProtocolError::UnknownFrameType(code))?;

        Ok(Self {
            stream_id,
            frame_type,
            flags: FrameFlags::from_bits(packed),
        })
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(stream={}, flags={:#05x})",
            self.frame_type,
            self.stream_id,
            self.flags.bits()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_flags() {
        let mut flags = FrameFlags::NONE;
        assert!(!flags.has_flag(FrameFlags::METADATA));

        flags.set_flag(FrameFlags::METADATA);
        assert!(flags.has_flag(FrameFlags::METADATA));

        flags.clear_flag(FrameFlags::METADATA);
        assert!(!flags.has_flag(FrameFlags::METADATA));

        let combined = FrameFlags::NEXT | FrameFlags::COMPLETE;
        assert!(combined.has_flag(FrameFlags::NEXT));
        assert!(combined.has_flag(FrameFlags::COMPLETE));
        assert!(!combined.has_flag(FrameFlags::FOLLOW));
    }

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::new(7, FrameType::RequestFnf, FrameFlags::METADATA);
        let encoded = header.encode();

        // type 0x05 << 10 | 0x100
        assert_eq!(encoded, [0, 0, 0, 7, 0x15, 0x00]);
        assert_eq!(FrameHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_reserved_stream_bit_is_masked() {
        let header = FrameHeader::new(0x8000_0001, FrameType::Payload, FrameFlags::NONE);
        assert_eq!(header.stream_id(), 1);

        let decoded = FrameHeader::decode(&[0x80, 0, 0, 1, 0x28, 0x00]).unwrap();
        assert_eq!(decoded.stream_id(), 1);
        assert_eq!(decoded.frame_type(), FrameType::Payload);
    }

    #[test]
    fn test_short_header() {
        let result = FrameHeader::decode(&[0, 0, 0]);
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedHeader { needed: 6, available: 3 })
        ));
    }

    #[test]
    fn test_unknown_frame_type() {
        // code 0x10 is not assigned
        let result = FrameHeader::decode(&[0, 0, 0, 1, 0x40, 0x00]);
        assert!(matches!(result, Err(ProtocolError::UnknownFrameType(0x10))));
    }

    #[test]
    fn test_scopes() {
        assert!(FrameType::Setup.is_connection_scoped());
        assert!(!FrameType::Setup.is_stream_scoped());
        assert!(FrameType::RequestFnf.is_stream_scoped());
        assert!(!FrameType::RequestFnf.is_connection_scoped());
        assert!(FrameType::Error.is_connection_scoped());
        assert!(FrameType::Error.is_stream_scoped());
    }

    proptest! {
        #[test]
        fn test_header_roundtrip_properties(
            stream_id in 0u32..=MAX_STREAM_ID,
            code in prop::sample::select(vec![
                0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
                0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x3F,
            ]),
            flags in 0u16..0x400
        ) {
            let frame_type = FrameType::from_code(code).unwrap();
            let header = FrameHeader::new(stream_id, frame_type, FrameFlags(flags));
            let decoded = FrameHeader::decode(&header.encode()).unwrap();

            prop_assert_eq!(decoded.stream_id(), stream_id);
            prop_assert_eq!(decoded.frame_type(), frame_type);
            prop_assert_eq!(decoded.flags(), FrameFlags(flags));
        }
    }
}
