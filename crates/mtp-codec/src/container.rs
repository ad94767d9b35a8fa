//! PTP container framing: Command/Data/Response/Event phases (component C1).

use crate::endian::{decode_u32, LeEncode};
use num_enum::TryFromPrimitive;

pub const HEADER_SIZE: usize = 12;
const MAX_PARAMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum ContainerKind {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("container too short: {len} bytes, header needs {HEADER_SIZE}")]
    TooShort { len: usize },
    #[error("declared length {declared} exceeds buffer of {available} bytes")]
    LengthExceedsBuffer { declared: u32, available: usize },
    #[error("unknown container kind {0:#06x}")]
    UnknownKind(u16),
}

/// A fully parsed PTP container. `params` is populated for Command,
/// Response and Event phases; `payload` is populated for Data phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ContainerKind,
    pub code: u16,
    pub txn_id: u32,
    pub params: Vec<u32>,
    pub payload: Vec<u8>,
}

impl Container {
    pub fn belongs_to(&self, txn_id: u32) -> bool {
        self.txn_id == txn_id
    }
}

fn header(kind: ContainerKind, code: u16, txn_id: u32, payload_len: usize) -> Vec<u8> {
    let total = (HEADER_SIZE + payload_len) as u32;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
    buf.extend_from_slice(&total.le_encode());
    buf.extend_from_slice(&(kind as u16).le_encode());
    buf.extend_from_slice(&code.le_encode());
    buf.extend_from_slice(&txn_id.le_encode());
    buf
}

fn params_payload(params: &[u32]) -> Vec<u8> {
    let n = params.len().min(MAX_PARAMS);
    let mut buf = Vec::with_capacity(n * 4);
    for p in &params[..n] {
        buf.extend_from_slice(&p.le_encode());
    }
    buf
}

/// Builds a Command container carrying up to 5 32-bit parameters.
pub fn encode_command(code: u16, txn_id: u32, params: &[u32]) -> Vec<u8> {
    let payload = params_payload(params);
    let mut buf = header(ContainerKind::Command, code, txn_id, payload.len());
    buf.extend_from_slice(&payload);
    buf
}

/// Builds a Data container carrying a self-delimiting payload linked to
/// `txn_id`.
pub fn encode_data(code: u16, txn_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = header(ContainerKind::Data, code, txn_id, payload.len());
    buf.extend_from_slice(payload);
    buf
}

/// Builds a Response container with up to 5 32-bit parameters. Not part of
/// the host's outbound vocabulary in real use (hosts don't emit responses),
/// but used to construct `MockUsbHost` fixtures in tests for `mtp-session`
/// and `mtp-device`.
pub fn encode_response(code: u16, txn_id: u32, params: &[u32]) -> Vec<u8> {
    let payload = params_payload(params);
    let mut buf = header(ContainerKind::Response, code, txn_id, payload.len());
    buf.extend_from_slice(&payload);
    buf
}

/// Builds an Event container with up to 3 32-bit parameters (per MTP event
/// framing); used the same way as `encode_response` for test fixtures.
pub fn encode_event(code: u16, txn_id: u32, params: &[u32]) -> Vec<u8> {
    let payload = params_payload(&params[..params.len().min(3)]);
    let mut buf = header(ContainerKind::Event, code, txn_id, payload.len());
    buf.extend_from_slice(&payload);
    buf
}

/// Parses a container from `bytes`. Never panics: malformed input yields a
/// `CodecError`, it never crashes the caller (spec §4.2 fuzz target).
pub fn parse(bytes: &[u8]) -> Result<Container, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::TooShort { len: bytes.len() });
    }
    let declared_len = decode_u32(bytes, 0).ok_or(CodecError::TooShort { len: bytes.len() })?;
    if declared_len as usize > bytes.len() || (declared_len as usize) < HEADER_SIZE {
        return Err(CodecError::LengthExceedsBuffer {
            declared: declared_len,
            available: bytes.len(),
        });
    }
    let kind_raw = crate::endian::decode_u16(bytes, 4)
        .ok_or(CodecError::TooShort { len: bytes.len() })?;
    let kind = ContainerKind::try_from(kind_raw).map_err(|_| CodecError::UnknownKind(kind_raw))?;
    let code = crate::endian::decode_u16(bytes, 6).ok_or(CodecError::TooShort { len: bytes.len() })?;
    let txn_id = decode_u32(bytes, 8).ok_or(CodecError::TooShort { len: bytes.len() })?;

    let content = &bytes[HEADER_SIZE..declared_len as usize];

    match kind {
        ContainerKind::Data => Ok(Container {
            kind,
            code,
            txn_id,
            params: Vec::new(),
            payload: content.to_vec(),
        }),
        ContainerKind::Command | ContainerKind::Response | ContainerKind::Event => {
            let max = if matches!(kind, ContainerKind::Event) { 3 } else { MAX_PARAMS };
            let n = (content.len() / 4).min(max);
            let mut params = Vec::with_capacity(n);
            for i in 0..n {
                if let Some(p) = decode_u32(content, i * 4) {
                    params.push(p);
                }
            }
            Ok(Container {
                kind,
                code,
                txn_id,
                params,
                payload: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn command_round_trips() {
        let bytes = encode_command(0x1001, 7, &[1, 2, 3]);
        let c = parse(&bytes).unwrap();
        assert_eq!(c.kind, ContainerKind::Command);
        assert_eq!(c.code, 0x1001);
        assert_eq!(c.txn_id, 7);
        assert_eq!(c.params, vec![1, 2, 3]);
    }

    #[test]
    fn data_round_trips() {
        let payload = b"hello world".to_vec();
        let bytes = encode_data(0x1009, 42, &payload);
        let c = parse(&bytes).unwrap();
        assert_eq!(c.kind, ContainerKind::Data);
        assert_eq!(c.payload, payload);
        assert!(c.belongs_to(42));
    }

    #[test]
    fn params_are_capped_at_five() {
        let bytes = encode_command(0x1001, 1, &[1, 2, 3, 4, 5, 6, 7]);
        let c = parse(&bytes).unwrap();
        assert_eq!(c.params.len(), 5);
    }

    #[test]
    fn rejects_too_short() {
        assert!(matches!(parse(&[1, 2, 3]), Err(CodecError::TooShort { .. })));
    }

    #[test]
    fn rejects_length_exceeding_buffer() {
        let mut bytes = encode_command(0x1001, 1, &[1]);
        bytes[0] = 0xFF; // declared length way too large
        assert!(matches!(
            parse(&bytes),
            Err(CodecError::LengthExceedsBuffer { .. })
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut bytes = encode_command(0x1001, 1, &[]);
        bytes[4] = 0x09; // kind byte 0, invalid kind 9
        bytes[5] = 0x00;
        assert!(matches!(parse(&bytes), Err(CodecError::UnknownKind(9))));
    }

    #[test]
    fn fuzz_parse_never_panics() {
        let mut rng = rand::thread_rng();
        for _ in 0..20_000 {
            let len = (rng.next_u32() % 64) as usize;
            let mut buf = vec![0u8; len];
            rng.fill_bytes(&mut buf);
            let _ = parse(&buf);
        }
    }
}
