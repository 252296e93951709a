//! On-disk frame codec for the index log
//!
//! Each log entry is a frame of `[header | body | padding]`:
//!
//! - header: 8-byte field holding a zigzag varint of the body length,
//!   zero padded to the full field width
//! - body: bincode-encoded [`IndexEntry`]
//! - padding: 4 zero bytes separating frames, so a partially-written
//!   tail decodes as garbage instead of sliding into the next frame

use crate::types::Position;
use crate::{Result, StrataError};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of the frame header field
pub const HEADER_SIZE: usize = 8;

/// Zero bytes separating frames
pub const PADDING_SIZE: usize = 4;

/// One series entry in the index: its tag vector and record position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Ordered tag values identifying the series
    pub values: Vec<String>,
    /// Record slot inside the bucket's block store
    pub position: Position,
}

/// Encode an entry into a complete frame
pub fn encode_frame(entry: &IndexEntry) -> Result<Vec<u8>> {
    let body =
        bincode::serialize(entry).map_err(|e| StrataError::InvalidFormat(e.to_string()))?;

    let mut header = [0u8; HEADER_SIZE];
    let written = put_varint(&mut header, body.len() as i64);
    if written > HEADER_SIZE {
        return Err(StrataError::InvalidFormat(
            "index element too large for frame header".to_string(),
        ));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len() + PADDING_SIZE);
    frame.put_slice(&header);
    frame.put_slice(&body);
    frame.put_bytes(0, PADDING_SIZE);

    Ok(frame.to_vec())
}

/// Decode the frame starting at the beginning of `data`.
///
/// Returns the entry and the number of bytes the frame consumed, or `None`
/// when the bytes are truncated or undecodable — the caller stops replay
/// there and treats the rest of the file as overwritable tail.
pub fn decode_frame(data: &[u8]) -> Option<(IndexEntry, usize)> {
    if data.len() < HEADER_SIZE {
        return None;
    }

    let (body_len, _) = varint(&data[..HEADER_SIZE])?;
    if body_len <= 0 {
        return None;
    }

    let body_len = body_len as usize;
    let body_end = HEADER_SIZE.checked_add(body_len)?;
    let frame_end = body_end.checked_add(PADDING_SIZE)?;
    if frame_end > data.len() {
        return None;
    }

    let entry: IndexEntry = bincode::deserialize(&data[HEADER_SIZE..body_end]).ok()?;

    Some((entry, frame_end))
}

/// Write a zigzag varint into `buf`, returning the number of bytes used.
///
/// Panics if `buf` is too short for the value; header-sized buffers fit any
/// length the codec can produce.
fn put_varint(buf: &mut [u8], value: i64) -> usize {
    let mut bits = (value as u64) << 1;
    if value < 0 {
        bits = !bits;
    }

    let mut used = 0;
    while bits >= 0x80 {
        buf[used] = (bits as u8) | 0x80;
        bits >>= 7;
        used += 1;
    }
    buf[used] = bits as u8;
    used + 1
}

/// Read a zigzag varint from the front of `buf`
fn varint(buf: &[u8]) -> Option<(i64, usize)> {
    let mut bits: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if byte < 0x80 {
            if i > 9 || (i == 9 && byte > 1) {
                return None; // overflows i64
            }
            bits |= (byte as u64) << shift;
            let mut value = (bits >> 1) as i64;
            if bits & 1 != 0 {
                value = !value;
            }
            return Some((value, i + 1));
        }
        bits |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }

    None
}
