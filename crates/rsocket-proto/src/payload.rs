//! Optional-metadata payload convention shared by payload-bearing frames
//!
//! When the metadata flag is set the payload region starts with a 24-bit
//! big-endian length, then that many metadata bytes, then the data bytes.
//! When the flag is clear the whole region is data.

use crate::frame::FrameView;
use crate::{FrameFlags, ProtocolError, Result};
use bytes::{BufMut, Bytes};
use std::borrow::Cow;
use std::ops::Range;

/// Width of the metadata length prefix
pub const METADATA_LEN_PREFIX: usize = 3;

/// Largest metadata block the 24-bit prefix can describe
pub const MAX_METADATA_LEN: usize = 0xFF_FFFF;

/// Write a 24-bit big-endian length
pub fn put_u24<B: BufMut>(buf: &mut B, value: usize) -> Result<()> {
    if value > MAX_METADATA_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            size: value,
            max: MAX_METADATA_LEN,
        });
    }
    buf.put_uint(value as u64, 3);
    Ok(())
}

/// Read a 24-bit big-endian length from the front of `bytes`
pub fn get_u24(bytes: &[u8]) -> Option<usize> {
    match bytes {
        [a, b, c, ..] => Some((usize::from(*a) << 16) | (usize::from(*b) << 8) | usize::from(*c)),
        _ => None,
    }
}

/// Encoded size of a payload region
pub fn payload_len(data: &[u8], metadata: Option<&[u8]>) -> usize {
    match metadata {
        Some(metadata) => METADATA_LEN_PREFIX + metadata.len() + data.len(),
        None => data.len(),
    }
}

/// Append a payload region to `buf`.
///
/// `Some(&[])` is metadata that is present but empty: the flag is set and
/// three zero length bytes are written. `None` leaves the flag clear.
/// Returns the flags the frame header must carry for this region.
pub fn encode_payload_into<B: BufMut>(
    buf: &mut B,
    data: &[u8],
    metadata: Option<&[u8]>,
) -> Result<FrameFlags> {
    let mut flags = FrameFlags::NONE;
    if let Some(metadata) = metadata {
        put_u24(buf, metadata.len())?;
        buf.put_slice(metadata);
        flags.set_flag(FrameFlags::METADATA);
    }
    buf.put_slice(data);
    Ok(flags)
}

/// Encode a payload region into fresh bytes
pub fn encode_payload(data: &[u8], metadata: Option<&[u8]>) -> Result<(Bytes, FrameFlags)> {
    let mut buf = crate::BufferPool::global().acquire();
    let flags = encode_payload_into(&mut *buf, data, metadata)?;
    Ok((Bytes::copy_from_slice(&buf), flags))
}

/// Check that the payload region starting at `offset` is well formed
pub fn validate_payload(
    body: &[u8],
    has_metadata: bool,
    offset: usize,
    frame_type: &'static str,
) -> Result<()> {
    if body.len() < offset {
        return Err(ProtocolError::incomplete(frame_type));
    }
    if !has_metadata {
        return Ok(());
    }
    let len = get_u24(&body[offset..]).ok_or_else(|| ProtocolError::incomplete(frame_type))?;
    if body.len() < offset + METADATA_LEN_PREFIX + len {
        return Err(ProtocolError::incomplete(frame_type));
    }
    Ok(())
}

/// Byte range of the metadata block, or `None` when absent
pub fn metadata_range(body: &[u8], has_metadata: bool, offset: usize) -> Option<Range<usize>> {
    if !has_metadata {
        return None;
    }
    let len = get_u24(body.get(offset..)?)?;
    let start = offset + METADATA_LEN_PREFIX;
    let end = (start + len).min(body.len());
    Some(start..end)
}

/// Byte range of the data block
pub fn data_range(body: &[u8], has_metadata: bool, offset: usize) -> Range<usize> {
    let start = match metadata_range(body, has_metadata, offset) {
        Some(metadata) => metadata.end,
        None => offset.min(body.len()),
    };
    start..body.len()
}

/// Read the metadata block at `offset`; `None` when the flag is clear
pub fn decode_metadata(body: &Bytes, has_metadata: bool, offset: usize) -> Option<Bytes> {
    metadata_range(body, has_metadata, offset).map(|range| body.slice(range))
}

/// Read the data block that follows the metadata (or `offset`)
pub fn decode_data(body: &Bytes, has_metadata: bool, offset: usize) -> Bytes {
    body.slice(data_range(body, has_metadata, offset))
}

/// Frames whose body ends with an optional-metadata payload region.
///
/// Implementors only say where the region starts; every accessor is shared.
/// Accessors are views over the received body and return the same bytes on
/// every call.
pub trait PayloadRegion: FrameView {
    /// Offset of the payload region within the body
    fn payload_offset(&self) -> usize {
        0
    }

    /// Metadata bytes, `None` when the frame carries no metadata
    fn metadata(&self) -> Option<Bytes> {
        let frame = self.as_frame();
        decode_metadata(frame.body(), frame.header().has_metadata(), self.payload_offset())
    }

    /// Metadata as text, `None` when absent
    fn metadata_utf8(&self) -> Option<Cow<'_, str>> {
        let frame = self.as_frame();
        let range =
            metadata_range(frame.body(), frame.header().has_metadata(), self.payload_offset())?;
        Some(String::from_utf8_lossy(&frame.body()[range]))
    }

    /// Data bytes, possibly empty
    fn data(&self) -> Bytes {
        let frame = self.as_frame();
        decode_data(frame.body(), frame.header().has_metadata(), self.payload_offset())
    }

    /// Data as text
    fn data_utf8(&self) -> Cow<'_, str> {
        let frame = self.as_frame();
        let range = data_range(frame.body(), frame.header().has_metadata(), self.payload_offset());
        String::from_utf8_lossy(&frame.body()[range])
    }

    /// Validate the payload region of this frame
    fn validate_payload(&self) -> Result<()> {
        let frame = self.as_frame();
        validate_payload(
            frame.body(),
            frame.header().has_metadata(),
            self.payload_offset(),
            frame.header().frame_type().name(),
        )
    }
}
