//! Outbound frames
//!
//! A [`WriteableFrame`] keeps the header, the fixed-field prefix and the
//! metadata/data buffers apart until it is written. Metadata and data are
//! reference-counted [`Bytes`], so building a frame never copies the
//! caller's payload. [`WriteableFrame::write_to`] streams the segments
//! straight to the transport; [`WriteableFrame::to_frame`] is the in-memory
//! counterpart used when a frame has to be held or dispatched locally.

use crate::frame::{ErrorCode, Frame, SetupParams, Version};
use crate::payload::{payload_len, METADATA_LEN_PREFIX, MAX_METADATA_LEN};
use crate::{BufferPool, FrameFlags, FrameHeader, FrameType, ProtocolError, Result, HEADER_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Largest SETUP/RESUME resume token (u16 length prefix)
pub const MAX_RESUME_TOKEN_LEN: usize = u16::MAX as usize;

/// Largest SETUP MIME type (u8 length prefix)
pub const MAX_MIME_TYPE_LEN: usize = u8::MAX as usize;

/// Outcome of writing frames to a transport.
///
/// `written` counts every byte the transport accepted, including the bytes of
/// a frame that failed half way. A report with an error and a non-zero count
/// means the peer saw a partial frame.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Bytes accepted by the writer
    pub written: usize,
    /// First error encountered, if any
    pub error: Option<ProtocolError>,
}

impl WriteReport {
    /// A successful write of `written` bytes
    pub fn ok(written: usize) -> Self {
        Self { written, error: None }
    }

    /// A failed write after `written` bytes
    pub fn failed(written: usize, error: impl Into<ProtocolError>) -> Self {
        Self {
            written,
            error: Some(error.into()),
        }
    }

    /// Whether the write completed
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Fold another report into this one, keeping the first error
    pub fn merge(&mut self, other: WriteReport) {
        self.written += other.written;
        if self.error.is_none() {
            self.error = other.error;
        }
    }

    /// Convert into the byte count, or the error
    pub fn into_result(self) -> Result<usize> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }
}

/// A frame waiting to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteableFrame {
    header: FrameHeader,
    fixed: Bytes,
    metadata: Option<Bytes>,
    data: Bytes,
}

impl WriteableFrame {
    fn with_payload(
        stream_id: u32,
        frame_type: FrameType,
        fixed: Bytes,
        data: Bytes,
        metadata: Option<Bytes>,
        mut flags: FrameFlags,
    ) -> Self {
        flags.clear_flag(FrameFlags::METADATA);
        if metadata.is_some() {
            flags.set_flag(FrameFlags::METADATA);
        }
        Self {
            header: FrameHeader::new(stream_id, frame_type, flags),
            fixed,
            metadata,
            data,
        }
    }

    fn raw(
        stream_id: u32,
        frame_type: FrameType,
        flags: FrameFlags,
        fixed: Bytes,
        data: Bytes,
    ) -> Self {
        Self {
            header: FrameHeader::new(stream_id, frame_type, flags),
            fixed,
            metadata: None,
            data,
        }
    }

    /// REQUEST_FNF
    pub fn fire_and_forget(
        stream_id: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Self {
        Self::with_payload(stream_id, FrameType::RequestFnf, Bytes::new(), data, metadata, flags)
    }

    /// REQUEST_RESPONSE
    pub fn request_response(
        stream_id: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Self {
        Self::with_payload(
            stream_id,
            FrameType::RequestResponse,
            Bytes::new(),
            data,
            metadata,
            flags,
        )
    }

    /// REQUEST_STREAM with an initial demand of `initial_request_n`
    pub fn request_stream(
        stream_id: u32,
        initial_request_n: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Self {
        Self::with_payload(
            stream_id,
            FrameType::RequestStream,
            u32_field(initial_request_n),
            data,
            metadata,
            flags,
        )
    }

    /// REQUEST_CHANNEL with an initial demand of `initial_request_n`
    pub fn request_channel(
        stream_id: u32,
        initial_request_n: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Self {
        Self::with_payload(
            stream_id,
            FrameType::RequestChannel,
            u32_field(initial_request_n),
            data,
            metadata,
            flags,
        )
    }

    /// PAYLOAD; `flags` carries NEXT, COMPLETE and FOLLOW
    pub fn payload(
        stream_id: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Self {
        Self::with_payload(stream_id, FrameType::Payload, Bytes::new(), data, metadata, flags)
    }

    /// EXT with an application-defined `extended_type`
    pub fn ext(
        stream_id: u32,
        extended_type: u32,
        data: Bytes,
        metadata: Option<Bytes>,
        flags: FrameFlags,
    ) -> Self {
        Self::with_payload(
            stream_id,
            FrameType::Ext,
            u32_field(extended_type),
            data,
            metadata,
            flags,
        )
    }

    /// REQUEST_N
    pub fn request_n(stream_id: u32, n: u32) -> Self {
        Self::raw(stream_id, FrameType::RequestN, FrameFlags::NONE, u32_field(n), Bytes::new())
    }

    /// CANCEL
    pub fn cancel(stream_id: u32) -> Self {
        Self::raw(stream_id, FrameType::Cancel, FrameFlags::NONE, Bytes::new(), Bytes::new())
    }

    /// ERROR; stream 0 reports a connection error
    pub fn error(stream_id: u32, code: ErrorCode, message: &str) -> Self {
        Self::raw(
            stream_id,
            FrameType::Error,
            FrameFlags::NONE,
            u32_field(code.code()),
            Bytes::copy_from_slice(message.as_bytes()),
        )
    }

    /// KEEPALIVE on stream 0
    pub fn keepalive(last_received_position: u64, data: Bytes, respond: bool) -> Self {
        let flags = if respond { FrameFlags::RESPOND } else { FrameFlags::NONE };
        let mut fixed = BytesMut::with_capacity(8);
        fixed.put_u64(last_received_position);
        Self::raw(0, FrameType::Keepalive, flags, fixed.freeze(), data)
    }

    /// LEASE on stream 0; metadata fills the rest of the frame unprefixed
    pub fn lease(time_to_live: Duration, number_of_requests: u32, metadata: Option<Bytes>) -> Self {
        let mut fixed = BytesMut::with_capacity(8);
        fixed.put_u32(millis(time_to_live));
        fixed.put_u32(number_of_requests);
        let (flags, data) = match metadata {
            Some(metadata) => (FrameFlags::METADATA, metadata),
            None => (FrameFlags::NONE, Bytes::new()),
        };
        Self::raw(0, FrameType::Lease, flags, fixed.freeze(), data)
    }

    /// METADATA_PUSH on stream 0
    pub fn metadata_push(metadata: Bytes) -> Self {
        Self::raw(0, FrameType::MetadataPush, FrameFlags::METADATA, Bytes::new(), metadata)
    }

    /// SETUP on stream 0
    pub fn setup(params: &SetupParams) -> Result<Self> {
        let mut fixed = BytesMut::with_capacity(
            16 + params.metadata_mime_type.len() + params.data_mime_type.len(),
        );
        fixed.put_u16(params.version.major);
        fixed.put_u16(params.version.minor);
        fixed.put_u32(millis(params.keepalive_interval));
        fixed.put_u32(millis(params.max_lifetime));

        let mut flags = FrameFlags::NONE;
        if let Some(token) = &params.resume_token {
            put_resume_token(&mut fixed, token)?;
            flags.set_flag(FrameFlags::RESUME_ENABLE);
        }
        if params.lease {
            flags.set_flag(FrameFlags::LEASE);
        }
        put_mime_type(&mut fixed, &params.metadata_mime_type, "metadata mime type")?;
        put_mime_type(&mut fixed, &params.data_mime_type, "data mime type")?;

        Ok(Self::with_payload(
            0,
            FrameType::Setup,
            fixed.freeze(),
            params.data.clone(),
            params.metadata.clone(),
            flags,
        ))
    }

    /// RESUME on stream 0
    pub fn resume(
        version: Version,
        resume_token: Bytes,
        last_received_server_position: u64,
        first_available_client_position: u64,
    ) -> Result<Self> {
        let mut fixed = BytesMut::with_capacity(22 + resume_token.len());
        fixed.put_u16(version.major);
        fixed.put_u16(version.minor);
        put_resume_token(&mut fixed, &resume_token)?;
        fixed.put_u64(last_received_server_position);
        fixed.put_u64(first_available_client_position);
        Ok(Self::raw(0, FrameType::Resume, FrameFlags::NONE, fixed.freeze(), Bytes::new()))
    }

    /// RESUME_OK on stream 0
    pub fn resume_ok(last_received_client_position: u64) -> Self {
        let mut fixed = BytesMut::with_capacity(8);
        fixed.put_u64(last_received_client_position);
        Self::raw(0, FrameType::ResumeOk, FrameFlags::NONE, fixed.freeze(), Bytes::new())
    }

    /// Frame header
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Stream identifier
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id()
    }

    /// Frame type
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type()
    }

    /// Exact encoded length (header + body)
    pub fn len(&self) -> usize {
        HEADER_LEN + self.fixed.len() + payload_len(&self.data, self.metadata.as_deref())
    }

    /// A frame is never empty; it always carries a header
    pub fn is_empty(&self) -> bool {
        false
    }

    pub(crate) fn check_metadata(&self) -> Result<()> {
        match &self.metadata {
            Some(metadata) if metadata.len() > MAX_METADATA_LEN => {
                Err(ProtocolError::PayloadTooLarge {
                    size: metadata.len(),
                    max: MAX_METADATA_LEN,
                })
            }
            _ => Ok(()),
        }
    }

    /// Append the encoded frame to `buf`. Nothing is written on error.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        self.check_metadata()?;
        self.header.encode_into(buf);
        buf.put_slice(&self.fixed);
        crate::payload::encode_payload_into(buf, &self.data, self.metadata.as_deref())?;
        Ok(())
    }

    /// Stream the frame to `writer`: header, fixed fields, then the payload.
    ///
    /// The report counts exactly the bytes the writer accepted; after the
    /// first failure nothing more is written.
    pub async fn write_to<W>(&self, writer: &mut W) -> WriteReport
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if let Err(err) = self.check_metadata() {
            return WriteReport::failed(0, err);
        }

        let header = self.header.encode();
        let metadata: &[u8] = self.metadata.as_deref().unwrap_or_default();
        let metadata_len = (metadata.len() as u32).to_be_bytes();
        let prefix: &[u8] = if self.metadata.is_some() {
            &metadata_len[4 - METADATA_LEN_PREFIX..]
        } else {
            &[]
        };

        let mut written = 0;
        let segments: [&[u8]; 5] = [&header, &self.fixed, prefix, metadata, &self.data];
        for segment in segments {
            if let Err(err) = write_counted(writer, segment, &mut written).await {
                return WriteReport::failed(written, err);
            }
        }
        WriteReport::ok(written)
    }

    /// Encode into a pooled scratch buffer and decode the result.
    ///
    /// The returned frame owns its own copy; the scratch buffer is back in
    /// the pool before this returns, on success and on error alike. Errors
    /// here are of the [`ProtocolError::is_fatal`] kind.
    pub fn to_frame(&self) -> Result<Frame> {
        self.to_frame_in(BufferPool::global())
    }

    /// [`WriteableFrame::to_frame`] with scratch space from `pool`
    pub fn to_frame_in(&self, pool: &BufferPool) -> Result<Frame> {
        let mut buf = pool.acquire();
        buf.reserve(self.len());
        self.encode_into(&mut *buf)?;
        Frame::decode(Bytes::copy_from_slice(&buf))
    }
}

/// Write all of `bytes`, adding each accepted chunk to `written`
pub(crate) async fn write_counted<W>(
    writer: &mut W,
    mut bytes: &[u8],
    written: &mut usize,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while !bytes.is_empty() {
        let n = writer.write(bytes).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        *written += n;
        bytes = &bytes[n..];
    }
    Ok(())
}

fn u32_field(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn put_resume_token(buf: &mut BytesMut, token: &[u8]) -> Result<()> {
    let len = u16::try_from(token.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: token.len(),
        max: MAX_RESUME_TOKEN_LEN,
    })?;
    buf.put_u16(len);
    buf.put_slice(token);
    Ok(())
}

fn put_mime_type(buf: &mut BytesMut, mime_type: &str, field: &'static str) -> Result<()> {
    if !mime_type.is_ascii() {
        return Err(ProtocolError::InvalidUtf8 { field });
    }
    let len = u8::try_from(mime_type.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: mime_type.len(),
        max: MAX_MIME_TYPE_LEN,
    })?;
    buf.put_u8(len);
    buf.put_slice(mime_type.as_bytes());
    Ok(())
}
