//! Length-prefixed frame codec for byte-stream transports
//!
//! Each frame on the wire is preceded by its length as a 24-bit big-endian
//! integer. The length covers header and body, not the prefix itself.

use crate::payload::{get_u24, put_u24};
use crate::writeable::write_counted;
use crate::{BufferPool, Frame, ProtocolError, Result, WriteReport, WriteableFrame, HEADER_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the transport length prefix
pub const FRAME_LENGTH_PREFIX: usize = 3;

/// Largest frame the length prefix can describe (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0xFF_FFFF;

/// Default read buffer capacity
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 8192;

/// Frame codec for encoding/decoding frames over async streams
#[derive(Debug)]
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_limits(MAX_FRAME_SIZE, DEFAULT_READ_BUFFER_CAPACITY)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self::with_limits(max_frame_size, DEFAULT_READ_BUFFER_CAPACITY)
    }

    /// Create a codec with a frame size limit and initial read buffer size.
    ///
    /// `max_frame_size` is capped at [`MAX_FRAME_SIZE`].
    pub fn with_limits(max_frame_size: usize, read_buffer_capacity: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(read_buffer_capacity),
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// Largest frame this codec accepts or emits
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Encode a frame to bytes with length prefix
    pub fn encode_frame(&self, frame: &WriteableFrame) -> Result<Bytes> {
        self.check_size(frame.len())?;

        let mut buf = BytesMut::with_capacity(FRAME_LENGTH_PREFIX + frame.len());
        put_u24(&mut buf, frame.len())?;
        frame.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append length-prefixed frames to `buf`.
    ///
    /// Every frame is size-checked first; on error `buf` is left untouched.
    pub fn encode_frames_into<'a, B, I>(&self, buf: &mut B, frames: I) -> Result<usize>
    where
        B: BufMut,
        I: IntoIterator<Item = &'a WriteableFrame>,
        I::IntoIter: Clone,
    {
        let frames = frames.into_iter();
        let mut total = 0;
        for frame in frames.clone() {
            self.check_size(frame.len())?;
            frame.check_metadata()?;
            total += FRAME_LENGTH_PREFIX + frame.len();
        }
        for frame in frames {
            put_u24(buf, frame.len())?;
            frame.encode_into(buf)?;
        }
        Ok(total)
    }

    /// Write one frame with its length prefix and flush
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &WriteableFrame) -> WriteReport
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_frames(writer, &[frame]).await
    }

    /// Write a group of frames back to back, then flush.
    ///
    /// Sizes are checked before the first byte goes out, so an oversized
    /// frame fails the group without writing any of it. Once writing has
    /// started the first error ends the group and the report says how far
    /// it got.
    pub async fn write_frames<W>(&self, writer: &mut W, frames: &[&WriteableFrame]) -> WriteReport
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        for frame in frames {
            if let Err(err) = self.check_size(frame.len()) {
                return WriteReport::failed(0, err);
            }
        }

        let mut report = WriteReport::default();
        for frame in frames {
            let prefix = (frame.len() as u32).to_be_bytes();
            if let Err(err) =
                write_counted(writer, &prefix[4 - FRAME_LENGTH_PREFIX..], &mut report.written).await
            {
                report.error = Some(err.into());
                return report;
            }
            report.merge(frame.write_to(writer).await);
            if !report.is_ok() {
                return report;
            }
        }

        if let Err(err) = writer.flush().await {
            report.error = Some(err.into());
        }
        report
    }

    /// Write a group of frames, coalescing small groups into one buffer.
    ///
    /// A group that fits in one of `pool`'s buffers is encoded into a
    /// borrowed buffer and handed to the writer in a single write; larger
    /// groups are streamed frame by frame as in [`FrameCodec::write_frames`].
    pub async fn write_frames_pooled<W>(
        &self,
        writer: &mut W,
        frames: &[&WriteableFrame],
        pool: &BufferPool,
    ) -> WriteReport
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let total: usize = frames
            .iter()
            .map(|frame| FRAME_LENGTH_PREFIX + frame.len())
            .sum();
        if total > pool.config().buffer_capacity {
            return self.write_frames(writer, frames).await;
        }

        let mut buf = pool.acquire();
        if let Err(err) = self.encode_frames_into(&mut *buf, frames.iter().copied()) {
            return WriteReport::failed(0, err);
        }

        let mut report = WriteReport::default();
        if let Err(err) = write_counted(writer, &buf, &mut report.written).await {
            report.error = Some(err.into());
            return report;
        }
        if let Err(err) = writer.flush().await {
            report.error = Some(err.into());
        }
        report
    }

    /// Read a frame from an async reader.
    ///
    /// Returns `Ok(None)` on a clean end of stream.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            // Try to decode a frame from the buffer
            if let Some(frame) = self.try_decode_frame()? {
                return Ok(Some(frame));
            }

            if self.read_buf.capacity() == self.read_buf.len() {
                self.read_buf.reserve(DEFAULT_READ_BUFFER_CAPACITY);
            }
            let n = reader.read_buf(&mut self.read_buf).await?;

            if n == 0 {
                // EOF reached
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
            }
        }
    }

    /// Try to decode a frame from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Frame>> {
        let frame_len = match get_u24(&self.read_buf) {
            Some(len) => len,
            // Not enough data for length prefix
            None => return Ok(None),
        };

        self.check_size(frame_len)?;
        if frame_len < HEADER_LEN {
            return Err(ProtocolError::MalformedHeader {
                needed: HEADER_LEN,
                available: frame_len,
            });
        }

        if self.read_buf.len() < FRAME_LENGTH_PREFIX + frame_len {
            self.read_buf.reserve(FRAME_LENGTH_PREFIX + frame_len - self.read_buf.len());
            return Ok(None);
        }

        self.read_buf.advance(FRAME_LENGTH_PREFIX);
        let frame_data = self.read_buf.split_to(frame_len).freeze();
        Frame::decode(frame_data).map(Some)
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    /// Clear the internal buffer
    pub fn clear_buffer(&mut self) {
        self.read_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameFlags, FrameType, PayloadRegion, TypedFrame};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn data_frame(stream_id: u32, data: &'static [u8]) -> WriteableFrame {
        WriteableFrame::payload(stream_id, Bytes::from_static(data), None, FrameFlags::NEXT)
    }

    #[tokio::test]
    async fn test_frame_encode_decode() {
        let codec = FrameCodec::new();
        let frame = data_frame(1, b"test payload");

        let encoded = codec.encode_frame(&frame).unwrap();
        assert_eq!(encoded.len(), FRAME_LENGTH_PREFIX + frame.len());
        assert_eq!(get_u24(&encoded), Some(frame.len()));

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(encoded);
        let decoded = codec2.read_frame(&mut cursor).await.unwrap().unwrap();

        assert_eq!(decoded.stream_id(), 1);
        assert_eq!(decoded.frame_type(), FrameType::Payload);
        assert_eq!(&decoded.body()[..], b"test payload");
    }

    #[tokio::test]
    async fn test_write_read_frame() {
        let codec = FrameCodec::new();
        let frame = WriteableFrame::cancel(123);

        let mut buffer = Vec::new();
        let report = codec.write_frame(&mut buffer, &frame).await;
        assert_eq!(report.into_result().unwrap(), FRAME_LENGTH_PREFIX + HEADER_LEN);

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(buffer);
        let decoded = codec2.read_frame(&mut cursor).await.unwrap().unwrap();

        assert_eq!(decoded.stream_id(), 123);
        assert_eq!(decoded.frame_type(), FrameType::Cancel);
    }

    #[tokio::test]
    async fn test_partial_frame_reading() {
        let codec = FrameCodec::new();
        let encoded = codec.encode_frame(&data_frame(1, b"test")).unwrap();

        let mut codec2 = FrameCodec::new();

        // Add partial data to the buffer
        let mid = encoded.len() / 2;
        codec2.read_buf.extend_from_slice(&encoded[..mid]);
        assert!(codec2.try_decode_frame().unwrap().is_none());

        // Add the rest of the data
        codec2.read_buf.extend_from_slice(&encoded[mid..]);
        let decoded = codec2.try_decode_frame().unwrap().unwrap();

        assert_eq!(decoded.stream_id(), 1);
        assert_eq!(&decoded.body()[..], b"test");
        assert_eq!(codec2.buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_buffer() {
        let codec = FrameCodec::new();
        let frames = [data_frame(1, b"first"), data_frame(2, b"second")];

        let mut buffer = Vec::new();
        let report = codec.write_frames(&mut buffer, &[&frames[0], &frames[1]]).await;
        assert!(report.is_ok());
        assert_eq!(report.written, buffer.len());

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(buffer);

        let decoded1 = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded1.stream_id(), 1);
        assert_eq!(&decoded1.body()[..], b"first");

        let decoded2 = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded2.stream_id(), 2);
        assert_eq!(&decoded2.body()[..], b"second");

        // No more frames
        assert!(codec2.read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let codec = FrameCodec::with_max_frame_size(100);
        let frame = WriteableFrame::payload(1, Bytes::from(vec![0u8; 200]), None, FrameFlags::NEXT);

        let result = codec.encode_frame(&frame);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));

        // Oversized frame fails the whole group before anything is written
        let small = data_frame(1, b"ok");
        let mut buffer = Vec::new();
        let report = codec.write_frames(&mut buffer, &[&small, &frame]).await;
        assert_eq!(report.written, 0);
        assert!(buffer.is_empty());
        assert!(matches!(report.error, Some(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_pooled_write_matches_streamed_write() {
        let codec = FrameCodec::new();
        let pool = BufferPool::new(crate::PoolConfig {
            buffer_capacity: 64,
            max_idle: 4,
        });
        let small = [data_frame(1, b"a"), data_frame(1, b"b")];
        let large = [WriteableFrame::payload(
            2,
            Bytes::from(vec![7u8; 100]),
            None,
            FrameFlags::NEXT,
        )];

        for group in [&small[..], &large[..]] {
            let group: Vec<&WriteableFrame> = group.iter().collect();
            let mut pooled = Vec::new();
            let report = codec.write_frames_pooled(&mut pooled, &group, &pool).await;
            assert_eq!(report.into_result().unwrap(), pooled.len());

            let mut streamed = Vec::new();
            codec.write_frames(&mut streamed, &group).await.into_result().unwrap();
            assert_eq!(pooled, streamed);
        }

        // only the small group went through the pool
        let stats = pool.stats();
        assert_eq!(stats.borrowed, 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn test_encode_frames_into_checks_before_writing() {
        let codec = FrameCodec::with_max_frame_size(32);
        let frames = [
            data_frame(1, b"fits"),
            WriteableFrame::payload(2, Bytes::from(vec![0u8; 64]), None, FrameFlags::NEXT),
        ];

        let mut buf = BytesMut::new();
        assert!(codec.encode_frames_into(&mut buf, frames.iter()).is_err());
        assert!(buf.is_empty());

        let written = codec.encode_frames_into(&mut buf, frames[..1].iter()).unwrap();
        assert_eq!(written, buf.len());
    }

    #[test]
    fn test_declared_length_too_large() {
        let mut codec = FrameCodec::with_max_frame_size(100);
        put_u24(&mut codec.read_buf, 101).unwrap();

        let err = codec.try_decode_frame().unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 101, max: 100 }));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn test_declared_length_below_header() {
        let mut codec = FrameCodec::new();
        codec.read_buf.put_slice(&[0, 0, 4, 0, 0, 0, 1]);

        assert!(matches!(
            codec.try_decode_frame(),
            Err(ProtocolError::MalformedHeader { needed: 6, available: 4 })
        ));
    }

    #[tokio::test]
    async fn test_unknown_frame_type_consumes_frame() {
        let mut data = BytesMut::new();
        // type 0x20 is unassigned
        data.put_slice(&[0, 0, 6, 0, 0, 0, 1, 0x80, 0x00]);
        data.put_slice(&codec_bytes(&data_frame(3, b"after")));

        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(data.freeze());

        let result = codec.read_frame(&mut cursor).await;
        assert!(matches!(result, Err(ProtocolError::UnknownFrameType(0x20))));

        let next = codec.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(next.stream_id(), 3);
    }

    fn codec_bytes(frame: &WriteableFrame) -> Bytes {
        FrameCodec::new().encode_frame(frame).unwrap()
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let encoded = codec_bytes(&data_frame(1, b"cut short"));
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(encoded.slice(..encoded.len() - 2));

        let result = codec.read_frame(&mut cursor).await;
        assert!(matches!(result, Err(ProtocolError::Io(_))));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(Vec::<u8>::new());

        let result = codec.read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    proptest! {
        #[test]
        fn test_codec_roundtrip_properties(
            stream_id in 1u32..=crate::MAX_STREAM_ID,
            data in prop::collection::vec(any::<u8>(), 0..1000),
            metadata in prop::option::of(prop::collection::vec(any::<u8>(), 0..64))
        ) {
            tokio_test::block_on(async {
                let codec = FrameCodec::new();
                let data = Bytes::from(data);
                let metadata = metadata.map(Bytes::from);
                let frame = WriteableFrame::request_response(
                    stream_id,
                    data.clone(),
                    metadata.clone(),
                    FrameFlags::NONE,
                );

                let mut buffer = Vec::new();
                codec.write_frame(&mut buffer, &frame).await.into_result()?;

                let mut codec2 = FrameCodec::new();
                let mut cursor = Cursor::new(buffer);
                let decoded = codec2.read_frame(&mut cursor).await?.unwrap();

                prop_assert_eq!(decoded.stream_id(), stream_id);
                match decoded.into_typed()? {
                    TypedFrame::RequestResponse(rr) => {
                        prop_assert_eq!(rr.metadata(), metadata);
                        prop_assert_eq!(rr.data(), data);
                    }
                    other => prop_assert!(false, "unexpected frame: {:?}", other),
                }

                Ok(())
            })?;
        }
    }
}
