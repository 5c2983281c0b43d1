//! Dictionary log framing.
//!
//! Every commit that touches a dictionary appends one frame to its log:
//!
//! ```text
//! | magic (2) | payload len (4) | payload | crc32 (4) |
//! payload = | count (4) | { op (1) | key len (4) | key | [value len (4) | value] }* |
//! ```
//!
//! A frame is applied entirely or not at all; replay stops at the first
//! frame that is incomplete or fails its checksum.

use crate::error::{StorageError, StorageResult};
use bytes::{Buf, BufMut, BytesMut};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 2] = *b"QD";

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const FRAME_OVERHEAD: usize = 2 + 4 + 4;

/// One committed row change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Row key.
    pub key: Vec<u8>,
    /// New value, or `None` for a delete.
    pub value: Option<Vec<u8>>,
}

/// Encodes the mutations of one commit as a frame.
///
/// # Errors
///
/// Returns an error if a key or value does not fit a 4-byte length.
pub fn encode_frame(mutations: &[Mutation]) -> StorageResult<Vec<u8>> {
    let mut payload = BytesMut::new();
    payload.put_u32_le(len_u32(mutations.len())?);
    for mutation in mutations {
        match &mutation.value {
            Some(value) => {
                payload.put_u8(OP_PUT);
                payload.put_u32_le(len_u32(mutation.key.len())?);
                payload.put_slice(&mutation.key);
                payload.put_u32_le(len_u32(value.len())?);
                payload.put_slice(value);
            }
            None => {
                payload.put_u8(OP_DELETE);
                payload.put_u32_le(len_u32(mutation.key.len())?);
                payload.put_slice(&mutation.key);
            }
        }
    }

    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.put_slice(&FRAME_MAGIC);
    frame.put_u32_le(len_u32(payload.len())?);
    frame.put_slice(&payload);
    frame.put_u32_le(compute_crc32(&payload));
    Ok(frame.to_vec())
}

/// Result of replaying a log.
#[derive(Debug, Default)]
pub struct Replay {
    /// Frames in log order.
    pub frames: Vec<Vec<Mutation>>,
    /// Length of the intact prefix; anything after it is a torn tail.
    pub valid_len: u64,
}

/// Decodes every intact frame in `data`.
#[must_use]
pub fn replay(data: &[u8]) -> Replay {
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while let Some((mutations, used)) = decode_frame(&data[offset..]) {
        replay.frames.push(mutations);
        offset += used;
    }
    replay.valid_len = offset as u64;
    replay
}

fn decode_frame(data: &[u8]) -> Option<(Vec<Mutation>, usize)> {
    if data.len() < FRAME_OVERHEAD || data[..2] != FRAME_MAGIC {
        return None;
    }
    let mut header = &data[2..6];
    let payload_len = header.get_u32_le() as usize;
    let end = 6usize.checked_add(payload_len)?.checked_add(4)?;
    if data.len() < end {
        return None;
    }
    let payload = &data[6..6 + payload_len];
    let mut crc = &data[6 + payload_len..end];
    if crc.get_u32_le() != compute_crc32(payload) {
        return None;
    }
    decode_payload(payload).ok().map(|mutations| (mutations, end))
}

fn decode_payload(mut payload: &[u8]) -> StorageResult<Vec<Mutation>> {
    let count = read_u32(&mut payload)? as usize;
    let mut mutations = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        if !payload.has_remaining() {
            return Err(StorageError::corrupted("frame ends before its mutations"));
        }
        let op = payload.get_u8();
        let key = read_bytes(&mut payload)?;
        let value = match op {
            OP_PUT => Some(read_bytes(&mut payload)?),
            OP_DELETE => None,
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown mutation op {other}"
                )))
            }
        };
        mutations.push(Mutation { key, value });
    }
    if payload.has_remaining() {
        return Err(StorageError::corrupted("trailing bytes in frame"));
    }
    Ok(mutations)
}

fn read_u32(buf: &mut &[u8]) -> StorageResult<u32> {
    if buf.remaining() < 4 {
        return Err(StorageError::corrupted("unexpected end of frame"));
    }
    Ok(buf.get_u32_le())
}

fn read_bytes(buf: &mut &[u8]) -> StorageResult<Vec<u8>> {
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(StorageError::corrupted("unexpected end of frame"));
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn len_u32(len: usize) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| StorageError::corrupted(format!("length {len} too large")))
}

/// CRC-32 (IEEE polynomial) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}
