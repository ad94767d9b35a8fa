//! Session-layer error type (spec §7: protocol errors surfaced unchanged
//! except `SessionAlreadyOpen`, handled locally, and `DeviceBusy`, retried).

use mtp_codec::CodecError;
use mtp_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("mismatched transaction id: expected {expected}, got {got}")]
    MismatchedTransaction { expected: u32, got: u32 },
    #[error("device responded {0:#06x}")]
    DeviceError(u16),
}
