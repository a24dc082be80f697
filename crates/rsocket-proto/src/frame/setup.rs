//! Connection establishment frames: SETUP, RESUME, RESUME_OK

use super::{read_u16, read_u32, read_u64, Frame};
use crate::{FrameFlags, FrameType, PayloadRegion, ProtocolError, Result};
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::time::Duration;

/// Protocol version carried by SETUP and RESUME
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
}

impl Version {
    /// Version 1.0
    pub const V1_0: Self = Self { major: 1, minor: 0 };

    /// Create a version
    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parameters for building a SETUP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    /// Protocol version
    pub version: Version,
    /// Interval between client KEEPALIVE frames
    pub keepalive_interval: Duration,
    /// Time without KEEPALIVE after which the peer is considered dead
    pub max_lifetime: Duration,
    /// Token identifying a resumable session
    pub resume_token: Option<Bytes>,
    /// Client will honour LEASE frames
    pub lease: bool,
    /// MIME type of payload metadata
    pub metadata_mime_type: String,
    /// MIME type of payload data
    pub data_mime_type: String,
    /// SETUP metadata
    pub metadata: Option<Bytes>,
    /// SETUP data
    pub data: Bytes,
}

impl Default for SetupParams {
    fn default() -> Self {
        Self {
            version: Version::V1_0,
            keepalive_interval: Duration::from_secs(20),
            max_lifetime: Duration::from_secs(90),
            resume_token: None,
            lease: false,
            metadata_mime_type: "application/binary".to_string(),
            data_mime_type: "application/binary".to_string(),
            metadata: None,
            data: Bytes::new(),
        }
    }
}

/// Offsets of the variable-length SETUP fields
#[derive(Debug, Clone, Default)]
struct SetupLayout {
    resume_token: Option<Range<usize>>,
    metadata_mime: Range<usize>,
    data_mime: Range<usize>,
    payload_offset: usize,
}

impl SetupLayout {
    // version (4) + keepalive interval (4) + max lifetime (4)
    const FIXED_LEN: usize = 12;

    fn parse(frame: &Frame) -> Result<Self> {
        let body = frame.body();
        let incomplete = || ProtocolError::incomplete(FrameType::Setup.name());

        if body.len() < Self::FIXED_LEN {
            return Err(incomplete());
        }
        let mut at = Self::FIXED_LEN;

        let resume_token = if frame.flags().has_flag(FrameFlags::RESUME_ENABLE) {
            if body.len() < at + 2 {
                return Err(incomplete());
            }
            let len = usize::from(read_u16(body, at));
            let token = at + 2..at + 2 + len;
            if body.len() < token.end {
                return Err(incomplete());
            }
            at = token.end;
            Some(token)
        } else {
            None
        };

        let metadata_mime = short_field(body, &mut at).ok_or_else(incomplete)?;
        let data_mime = short_field(body, &mut at).ok_or_else(incomplete)?;

        Ok(Self {
            resume_token,
            metadata_mime,
            data_mime,
            payload_offset: at,
        })
    }
}

/// A u8-length-prefixed field at `*at`; advances `at` past it
fn short_field(body: &[u8], at: &mut usize) -> Option<Range<usize>> {
    let len = usize::from(*body.get(*at)?);
    let range = *at + 1..*at + 1 + len;
    if body.len() < range.end {
        return None;
    }
    *at = range.end;
    Some(range)
}

frame_view!(
    /// SETUP: first frame a client sends on a new connection
    SetupFrame,
    FrameType::Setup,
    Setup
);

impl SetupFrame {
    /// Protocol version requested by the client
    pub fn version(&self) -> Version {
        let body = self.frame.body();
        Version::new(read_u16(body, 0), read_u16(body, 2))
    }

    /// Interval between client KEEPALIVE frames
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(u64::from(read_u32(self.frame.body(), 4)))
    }

    /// Time without KEEPALIVE after which the client is considered dead
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(u64::from(read_u32(self.frame.body(), 8)))
    }

    /// Client honours LEASE frames
    pub fn lease(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::LEASE)
    }

    /// Resume token, present when the client enabled resumption
    pub fn resume_token(&self) -> Option<Bytes> {
        self.layout().resume_token.map(|range| self.frame.body().slice(range))
    }

    /// MIME type of payload metadata on this connection
    pub fn metadata_mime_type(&self) -> Cow<'_, str> {
        let range = self.layout().metadata_mime;
        String::from_utf8_lossy(&self.frame.body()[range])
    }

    /// MIME type of payload data on this connection
    pub fn data_mime_type(&self) -> Cow<'_, str> {
        let range = self.layout().data_mime;
        String::from_utf8_lossy(&self.frame.body()[range])
    }

    fn layout(&self) -> SetupLayout {
        // Validated on construction
        SetupLayout::parse(&self.frame).unwrap_or_default()
    }

    fn check(frame: &Frame) -> Result<()> {
        let layout = SetupLayout::parse(frame)?;
        crate::payload::validate_payload(
            frame.body(),
            frame.header().has_metadata(),
            layout.payload_offset,
            FrameType::Setup.name(),
        )
    }
}

impl PayloadRegion for SetupFrame {
    fn payload_offset(&self) -> usize {
        self.layout().payload_offset
    }
}

frame_view!(
    /// RESUME: client asks to resume a previous session
    ResumeFrame,
    FrameType::Resume,
    Resume
);

impl ResumeFrame {
    /// Protocol version requested by the client
    pub fn version(&self) -> Version {
        let body = self.frame.body();
        Version::new(read_u16(body, 0), read_u16(body, 2))
    }

    /// Token of the session to resume
    pub fn resume_token(&self) -> Bytes {
        self.frame.body().slice(6..self.token_end())
    }

    /// Last implied position the client received from the server
    pub fn last_received_server_position(&self) -> u64 {
        read_u64(self.frame.body(), self.token_end())
    }

    /// Earliest position the client can still replay
    pub fn first_available_client_position(&self) -> u64 {
        read_u64(self.frame.body(), self.token_end() + 8)
    }

    fn token_end(&self) -> usize {
        6 + usize::from(read_u16(self.frame.body(), 4))
    }

    fn check(frame: &Frame) -> Result<()> {
        let body = frame.body();
        if body.len() < 6 {
            return Err(ProtocolError::incomplete(FrameType::Resume.name()));
        }
        let token_end = 6 + usize::from(read_u16(body, 4));
        if body.len() < token_end + 16 {
            return Err(ProtocolError::incomplete(FrameType::Resume.name()));
        }
        Ok(())
    }
}

frame_view!(
    /// RESUME_OK: server accepted a RESUME
    ResumeOkFrame,
    FrameType::ResumeOk,
    ResumeOk
);

impl ResumeOkFrame {
    /// Last implied position the server received from the client
    pub fn last_received_client_position(&self) -> u64 {
        read_u64(self.frame.body(), 0)
    }

    fn check(frame: &Frame) -> Result<()> {
        super::require_len(frame, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameHeader, FrameView, WriteableFrame};

    #[test]
    fn test_setup_roundtrip() {
        let params = SetupParams {
            keepalive_interval: Duration::from_millis(500),
            max_lifetime: Duration::from_secs(10),
            resume_token: Some(Bytes::from_static(b"token-1")),
            lease: true,
            metadata_mime_type: "message/x.rsocket.routing.v0".to_string(),
            data_mime_type: "application/json".to_string(),
            metadata: Some(Bytes::from_static(b"auth")),
            data: Bytes::from_static(b"{}"),
            ..SetupParams::default()
        };
        let frame = SetupFrame::from_writeable(&WriteableFrame::setup(&params).unwrap()).unwrap();

        assert_eq!(frame.stream_id(), 0);
        assert_eq!(frame.version(), Version::V1_0);
        assert_eq!(frame.keepalive_interval(), Duration::from_millis(500));
        assert_eq!(frame.max_lifetime(), Duration::from_secs(10));
        assert!(frame.lease());
        assert_eq!(frame.resume_token(), Some(Bytes::from_static(b"token-1")));
        assert_eq!(frame.metadata_mime_type(), "message/x.rsocket.routing.v0");
        assert_eq!(frame.data_mime_type(), "application/json");
        assert_eq!(frame.metadata(), Some(Bytes::from_static(b"auth")));
        assert_eq!(frame.data_utf8(), "{}");
    }

    #[test]
    fn test_setup_without_resume() {
        let frame =
            SetupFrame::from_writeable(&WriteableFrame::setup(&SetupParams::default()).unwrap())
                .unwrap();

        assert_eq!(frame.resume_token(), None);
        assert!(!frame.lease());
        assert_eq!(frame.metadata(), None);
        assert!(frame.data().is_empty());
        assert_eq!(frame.metadata_mime_type(), "application/binary");
    }

    #[test]
    fn test_setup_truncated_mime() {
        // fixed fields, then a mime length of 10 with only 3 bytes behind it
        let mut body = vec![0u8, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2];
        body.extend_from_slice(&[10, b'a', b'b', b'c']);
        let frame = Frame::new(
            FrameHeader::new(0, FrameType::Setup, FrameFlags::NONE),
            Bytes::from(body),
        );
        assert!(matches!(
            SetupFrame::from_frame(frame),
            Err(ProtocolError::IncompleteFrame { frame_type: "SETUP" })
        ));
    }

    #[test]
    fn test_resume_roundtrip() {
        let writeable =
            WriteableFrame::resume(Version::V1_0, Bytes::from_static(b"tok"), 1024, 512).unwrap();
        let frame = ResumeFrame::from_writeable(&writeable).unwrap();

        assert_eq!(frame.version(), Version::V1_0);
        assert_eq!(frame.resume_token(), Bytes::from_static(b"tok"));
        assert_eq!(frame.last_received_server_position(), 1024);
        assert_eq!(frame.first_available_client_position(), 512);
    }

    #[test]
    fn test_resume_truncated() {
        let frame = Frame::new(
            FrameHeader::new(0, FrameType::Resume, FrameFlags::NONE),
            Bytes::from_static(&[0, 1, 0, 0, 0, 3, b't', b'o', b'k', 0, 0]),
        );
        assert!(ResumeFrame::from_frame(frame).is_err());
    }

    #[test]
    fn test_resume_ok() {
        let frame = ResumeOkFrame::from_writeable(&WriteableFrame::resume_ok(77)).unwrap();
        assert_eq!(frame.last_received_client_position(), 77);
    }
}
