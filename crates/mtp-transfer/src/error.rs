//! `TransferEngine` error type (component C7, spec §7).

use mtp_codec::codes::ResponseCode;
use mtp_session::SessionError;
use mtp_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object not found")]
    ObjectNotFound,
    #[error("storage full")]
    StorageFull,
    #[error("object is write protected")]
    WriteProtected,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("operation timed out")]
    Timeout,
    #[error("device reported busy, retries exhausted")]
    Busy,
    #[error("transfer cancelled")]
    Cancelled,
}

/// Maps a non-`Ok` PTP response code to the semantic kind named in spec
/// §4.2/§7. Unrecognized codes fall back to `InvalidParameter` carrying the
/// raw code for diagnostics.
pub fn classify_response(code: u16) -> TransferError {
    match ResponseCode::try_from(code) {
        Ok(ResponseCode::InvalidStorageID) => TransferError::InvalidParameter("invalid storage id".into()),
        Ok(ResponseCode::InvalidObjectHandle) => TransferError::ObjectNotFound,
        Ok(ResponseCode::StorageFull) => TransferError::StorageFull,
        Ok(ResponseCode::ObjectWriteProtected) => TransferError::WriteProtected,
        Ok(ResponseCode::InvalidParameter) => TransferError::InvalidParameter("device rejected parameters".into()),
        Ok(ResponseCode::DeviceBusy) => TransferError::Busy,
        _ => TransferError::InvalidParameter(format!("device responded {code:#06x}")),
    }
}
