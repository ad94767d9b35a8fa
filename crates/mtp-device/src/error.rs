//! Device-facade error composition (spec §7).

use mtp_session::SessionError;
use mtp_transfer::TransferError;
use mtp_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("object {0:#010x} not found")]
    ObjectNotFound(u32),
    #[error("storage {0:#010x} not found")]
    StorageNotFound(u32),
    #[error("malformed device response: {0}")]
    MalformedResponse(String),
    #[error("device returned protocol error {0:#06x}")]
    DeviceError(u16),
}

impl From<crate::dataset::DatasetError> for DeviceError {
    fn from(e: crate::dataset::DatasetError) -> Self {
        DeviceError::MalformedResponse(e.to_string())
    }
}

pub(crate) fn expect_ok(code: u16) -> Result<(), DeviceError> {
    if code == mtp_codec::ResponseCode::Ok as u16 {
        Ok(())
    } else if code == mtp_codec::ResponseCode::InvalidObjectHandle as u16 {
        Err(DeviceError::ObjectNotFound(0))
    } else if code == mtp_codec::ResponseCode::InvalidStorageID as u16 {
        Err(DeviceError::StorageNotFound(0))
    } else {
        Err(DeviceError::DeviceError(code))
    }
}
