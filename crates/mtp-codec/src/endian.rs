//! Little-endian integer and PTP-string primitives (component C0).

use byteorder::{ByteOrder, LittleEndian};

/// Encodes an unsigned integer as little-endian bytes. Output length is
/// always `size_of::<T>()`.
pub trait LeEncode {
    fn le_encode(self) -> Vec<u8>;
}

impl LeEncode for u16 {
    fn le_encode(self) -> Vec<u8> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, self);
        buf.to_vec()
    }
}

impl LeEncode for u32 {
    fn le_encode(self) -> Vec<u8> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, self);
        buf.to_vec()
    }
}

impl LeEncode for u64 {
    fn le_encode(self) -> Vec<u8> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, self);
        buf.to_vec()
    }
}

/// Decodes a little-endian integer at `offset` in `bytes`. Returns `None`
/// instead of panicking when the slice is too short — per spec, an
/// out-of-range offset is a non-exceptional "no value".
pub fn decode_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes
        .get(offset..offset + 2)
        .map(LittleEndian::read_u16)
}

pub fn decode_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(LittleEndian::read_u32)
}

pub fn decode_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    bytes
        .get(offset..offset + 8)
        .map(LittleEndian::read_u64)
}

/// In-place decode that advances `offset` past the field consumed. Returns
/// `None` (leaving `offset` unchanged) on short input.
pub fn decode_u32_at(slice: &[u8], offset: &mut usize) -> Option<u32> {
    let v = decode_u32(slice, *offset)?;
    *offset += 4;
    Some(v)
}

pub fn decode_u16_at(slice: &[u8], offset: &mut usize) -> Option<u16> {
    let v = decode_u16(slice, *offset)?;
    *offset += 2;
    Some(v)
}

/// Errors from the PTP string codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PtpStringError {
    #[error("truncated PTP string: declared {declared} code units, {available} bytes available")]
    Truncated { declared: usize, available: usize },
}

/// Decodes a length-prefixed UTF-16LE PTP string starting at `offset`.
/// Returns the decoded string (without the trailing NUL) and the number of
/// bytes consumed (including the 1-byte length prefix).
pub fn decode_ptp_string(bytes: &[u8], offset: usize) -> Result<(String, usize), PtpStringError> {
    let count = *bytes
        .get(offset)
        .ok_or(PtpStringError::Truncated { declared: 0, available: 0 })? as usize;
    if count == 0 {
        return Ok((String::new(), 1));
    }
    let needed = count * 2;
    let body = bytes.get(offset + 1..offset + 1 + needed).ok_or(
        PtpStringError::Truncated {
            declared: count,
            available: bytes.len().saturating_sub(offset + 1) / 2,
        },
    )?;
    // `count` includes the trailing NUL code unit.
    let code_units: Vec<u16> = body
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take(count.saturating_sub(1))
        .collect();
    let s = String::from_utf16_lossy(&code_units);
    Ok((s, 1 + needed))
}

/// Encodes a PTP string: 1-byte code-unit count (including trailing NUL)
/// followed by UTF-16LE code units, always NUL-terminated.
pub fn encode_ptp_string(s: &str) -> Vec<u8> {
    if s.is_empty() {
        return vec![0u8];
    }
    let mut units: Vec<u16> = s.encode_utf16().collect();
    units.push(0);
    let count = units.len().min(255) as u8;
    let mut out = Vec::with_capacity(1 + units.len() * 2);
    out.push(count);
    for u in units.into_iter().take(count as usize) {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, u);
        out.extend_from_slice(&b);
    }
    out
}
