//! Stream-scoped request and payload frames

use super::{read_u32, require_len, Frame, FrameView};
use crate::{FrameFlags, FrameType, PayloadRegion, Result, WriteableFrame};
use bytes::Bytes;

/// Fixed request-n prefix carried by REQUEST_STREAM and REQUEST_CHANNEL
const REQUEST_N_LEN: usize = 4;

fn check_payload(frame: &Frame, offset: usize) -> Result<()> {
    require_len(frame, offset)?;
    crate::payload::validate_payload(
        frame.body(),
        frame.header().has_metadata(),
        offset,
        frame.frame_type().name(),
    )
}

frame_view!(
    /// REQUEST_FNF: a request that expects no response
    FireAndForgetFrame,
    FrameType::RequestFnf,
    FireAndForget
);

impl FireAndForgetFrame {
    /// Build the frame in memory.
    ///
    /// The body is encoded through a pooled scratch buffer and then copied
    /// out, so the pool gets its buffer back before this returns.
    pub fn new(
        stream_id: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Result<Self> {
        Self::from_writeable(&WriteableFrame::fire_and_forget(stream_id, data, metadata, flags))
    }

    fn check(frame: &Frame) -> Result<()> {
        check_payload(frame, 0)
    }
}

impl PayloadRegion for FireAndForgetFrame {}

frame_view!(
    /// REQUEST_RESPONSE: a request that expects exactly one response
    RequestResponseFrame,
    FrameType::RequestResponse,
    RequestResponse
);

impl RequestResponseFrame {
    fn check(frame: &Frame) -> Result<()> {
        check_payload(frame, 0)
    }
}

impl PayloadRegion for RequestResponseFrame {}

frame_view!(
    /// REQUEST_STREAM: a request for a bounded or unbounded response stream
    RequestStreamFrame,
    FrameType::RequestStream,
    RequestStream
);

impl RequestStreamFrame {
    /// Initial demand signalled by the requester
    pub fn initial_request_n(&self) -> u32 {
        read_u32(self.frame.body(), 0)
    }

    fn check(frame: &Frame) -> Result<()> {
        check_payload(frame, REQUEST_N_LEN)
    }
}

impl PayloadRegion for RequestStreamFrame {
    fn payload_offset(&self) -> usize {
        REQUEST_N_LEN
    }
}

frame_view!(
    /// REQUEST_CHANNEL: opens a bidirectional stream
    RequestChannelFrame,
    FrameType::RequestChannel,
    RequestChannel
);

impl RequestChannelFrame {
    /// Initial demand signalled by the requester
    pub fn initial_request_n(&self) -> u32 {
        read_u32(self.frame.body(), 0)
    }

    /// Requester has nothing further to send
    pub fn is_complete(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::COMPLETE)
    }

    /// Payload continues in following fragments
    pub fn is_follow(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::FOLLOW)
    }

    fn check(frame: &Frame) -> Result<()> {
        check_payload(frame, REQUEST_N_LEN)
    }
}

impl PayloadRegion for RequestChannelFrame {
    fn payload_offset(&self) -> usize {
        REQUEST_N_LEN
    }
}

frame_view!(
    /// REQUEST_N: additional demand for an open stream
    RequestNFrame,
    FrameType::RequestN,
    RequestN
);

impl RequestNFrame {
    /// Number of additional items requested
    pub fn request_n(&self) -> u32 {
        read_u32(self.frame.body(), 0)
    }

    fn check(frame: &Frame) -> Result<()> {
        require_len(frame, REQUEST_N_LEN)
    }
}

frame_view!(
    /// CANCEL: abandons an outstanding request
    CancelFrame,
    FrameType::Cancel,
    Cancel
);

impl CancelFrame {
    fn check(_frame: &Frame) -> Result<()> {
        Ok(())
    }
}

frame_view!(
    /// PAYLOAD: an element, completion, or fragment on an open stream
    PayloadFrame,
    FrameType::Payload,
    Payload
);

impl PayloadFrame {
    /// Frame carries a next element
    pub fn is_next(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::NEXT)
    }

    /// Stream is complete after this frame
    pub fn is_complete(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::COMPLETE)
    }

    /// Payload continues in following fragments
    pub fn is_follow(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::FOLLOW)
    }

    fn check(frame: &Frame) -> Result<()> {
        check_payload(frame, 0)
    }
}

impl PayloadRegion for PayloadFrame {}

frame_view!(
    /// EXT: extension frame with an application-defined type
    ExtFrame,
    FrameType::Ext,
    Ext
);

impl ExtFrame {
    /// Extended type code
    pub fn extended_type(&self) -> u32 {
        read_u32(self.frame.body(), 0)
    }

    /// Peer may drop this frame if it does not understand it
    pub fn can_ignore(&self) -> bool {
        self.frame.flags().has_flag(FrameFlags::IGNORE)
    }

    fn check(frame: &Frame) -> Result<()> {
        check_payload(frame, 4)
    }
}

impl PayloadRegion for ExtFrame {
    fn payload_offset(&self) -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameHeader, ProtocolError, TypedFrame};
    use proptest::prelude::*;

    fn raw(stream_id: u32, frame_type: FrameType, flags: FrameFlags, body: &'static [u8]) -> Frame {
        Frame::new(FrameHeader::new(stream_id, frame_type, flags), Bytes::from_static(body))
    }

    #[test]
    fn test_fire_and_forget_with_metadata() {
        let frame = FireAndForgetFrame::new(
            7,
            Bytes::from_static(b"ping"),
            Some(Bytes::from_static(b"m")),
            FrameFlags::NONE,
        )
        .unwrap();

        let header = frame.as_frame().header();
        assert_eq!(header.stream_id(), 7);
        assert_eq!(header.frame_type(), FrameType::RequestFnf);
        assert!(header.has_metadata());
        assert_eq!(&frame.as_frame().body()[..], b"\x00\x00\x01mping");

        assert_eq!(frame.metadata(), Some(Bytes::from_static(b"m")));
        assert_eq!(frame.metadata_utf8().as_deref(), Some("m"));
        assert_eq!(frame.data(), Bytes::from_static(b"ping"));
        assert_eq!(frame.data_utf8(), "ping");
    }

    #[test]
    fn test_fire_and_forget_without_metadata() {
        let frame =
            FireAndForgetFrame::new(7, Bytes::from_static(b"ping"), None, FrameFlags::NONE)
                .unwrap();

        assert!(!frame.as_frame().header().has_metadata());
        assert_eq!(&frame.as_frame().body()[..], b"ping");
        assert_eq!(frame.metadata(), None);
        assert_eq!(frame.metadata_utf8(), None);
    }

    #[test]
    fn test_empty_metadata_present() {
        let frame = FireAndForgetFrame::new(1, Bytes::new(), Some(Bytes::new()), FrameFlags::NONE)
            .unwrap();

        assert!(frame.as_frame().header().has_metadata());
        assert_eq!(frame.metadata(), Some(Bytes::new()));
        assert!(frame.data().is_empty());
    }

    #[test]
    fn test_accessors_are_idempotent() {
        let frame = FireAndForgetFrame::new(
            3,
            Bytes::from_static(b"data"),
            Some(Bytes::from_static(b"meta")),
            FrameFlags::NONE,
        )
        .unwrap();

        let first = (frame.metadata(), frame.data());
        for _ in 0..3 {
            assert_eq!((frame.metadata(), frame.data()), first);
        }
        // length prefix + "meta" + "data"
        assert_eq!(frame.as_frame().body().len(), 3 + 4 + 4);
    }

    #[test]
    fn test_metadata_flag_with_short_body() {
        let cases = [
            (FrameType::RequestFnf, &b"\x00\x01"[..]),
            (FrameType::RequestResponse, &b"\x00"[..]),
            (FrameType::Payload, &b""[..]),
            (FrameType::RequestStream, &b"\x00\x00\x00\x01\x00\x00"[..]),
            (FrameType::RequestChannel, &b"\x00\x00\x00\x01"[..]),
            (FrameType::Ext, &b"\x00\x00\x00\x01\x00"[..]),
            // version, keepalive, lifetime, then two one-byte mime types
            (FrameType::Setup, &b"\x00\x01\x00\x00\x00\x00\x00\x01\x00\x00\x00\x02\x01a\x01b"[..]),
        ];

        for (frame_type, body) in cases {
            let frame = Frame::new(
                FrameHeader::new(1, frame_type, FrameFlags::METADATA),
                Bytes::copy_from_slice(body),
            );
            let result = frame.into_typed();
            assert!(
                matches!(result, Err(ProtocolError::IncompleteFrame { .. })),
                "expected IncompleteFrame for {}",
                frame_type
            );
        }
    }

    #[test]
    fn test_request_stream_fields() {
        let writeable = WriteableFrame::request_stream(
            11,
            64,
            Bytes::from_static(b"body"),
            Some(Bytes::from_static(b"route")),
            FrameFlags::NONE,
        );
        let frame = RequestStreamFrame::from_writeable(&writeable).unwrap();

        assert_eq!(frame.initial_request_n(), 64);
        assert_eq!(frame.metadata_utf8().as_deref(), Some("route"));
        assert_eq!(frame.data_utf8(), "body");
    }

    #[test]
    fn test_request_stream_missing_request_n() {
        let frame = raw(1, FrameType::RequestStream, FrameFlags::NONE, b"\x00\x01");
        assert!(matches!(
            RequestStreamFrame::from_frame(frame),
            Err(ProtocolError::IncompleteFrame { frame_type: "REQUEST_STREAM" })
        ));
    }

    #[test]
    fn test_request_channel_flags() {
        let writeable = WriteableFrame::request_channel(
            13,
            1,
            Bytes::from_static(b"x"),
            None,
            FrameFlags::COMPLETE,
        );
        let frame = RequestChannelFrame::from_writeable(&writeable).unwrap();

        assert!(frame.is_complete());
        assert!(!frame.is_follow());
        assert_eq!(frame.initial_request_n(), 1);
        assert_eq!(frame.data(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_request_n() {
        let frame = RequestNFrame::from_writeable(&WriteableFrame::request_n(5, 1000)).unwrap();
        assert_eq!(frame.request_n(), 1000);

        let short = raw(5, FrameType::RequestN, FrameFlags::NONE, b"\x00\x00");
        assert!(RequestNFrame::from_frame(short).is_err());
    }

    #[test]
    fn test_payload_flags() {
        let writeable = WriteableFrame::payload(
            3,
            Bytes::from_static(b"last"),
            None,
            FrameFlags::NEXT | FrameFlags::COMPLETE,
        );
        let frame = PayloadFrame::from_writeable(&writeable).unwrap();

        assert!(frame.is_next());
        assert!(frame.is_complete());
        assert!(!frame.is_follow());
    }

    #[test]
    fn test_ext_frame() {
        let writeable = WriteableFrame::ext(
            9,
            0xABCD,
            Bytes::from_static(b"ext"),
            Some(Bytes::from_static(b"m")),
            FrameFlags::IGNORE,
        );
        let frame = ExtFrame::from_writeable(&writeable).unwrap();

        assert_eq!(frame.extended_type(), 0xABCD);
        assert!(frame.can_ignore());
        assert_eq!(frame.metadata(), Some(Bytes::from_static(b"m")));
        assert_eq!(frame.data(), Bytes::from_static(b"ext"));
    }

    proptest! {
        #[test]
        fn test_payload_roundtrip_properties(
            stream_id in 1u32..=crate::MAX_STREAM_ID,
            data in prop::collection::vec(any::<u8>(), 0..256),
            metadata in prop::option::of(prop::collection::vec(any::<u8>(), 0..256)),
            kind in 0usize..3
        ) {
            let data = Bytes::from(data);
            let metadata = metadata.map(Bytes::from);
            let writeable = match kind {
                0 => WriteableFrame::fire_and_forget(
                    stream_id,
                    data.clone(),
                    metadata.clone(),
                    FrameFlags::NONE,
                ),
                1 => WriteableFrame::request_response(
                    stream_id,
                    data.clone(),
                    metadata.clone(),
                    FrameFlags::NONE,
                ),
                _ => WriteableFrame::payload(
                    stream_id,
                    data.clone(),
                    metadata.clone(),
                    FrameFlags::NEXT,
                ),
            };

            let decoded = Frame::decode(writeable.to_frame().unwrap().to_bytes()).unwrap();
            prop_assert_eq!(decoded.stream_id(), stream_id);
            prop_assert_eq!(decoded.len(), writeable.len());

            let (got_metadata, got_data) = match decoded.into_typed().unwrap() {
                TypedFrame::FireAndForget(f) => (f.metadata(), f.data()),
                TypedFrame::RequestResponse(f) => (f.metadata(), f.data()),
                TypedFrame::Payload(f) => (f.metadata(), f.data()),
                other => panic!("unexpected frame: {:?}", other),
            };
            prop_assert_eq!(got_metadata, metadata);
            prop_assert_eq!(got_data, data);
        }
    }
}
