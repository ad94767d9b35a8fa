//! Top-level error composition (spec §7): every sub-crate's error type
//! folds into one enum so callers at the process boundary match on a
//! single type instead of threading five.

use mtp_cache::CacheError;
use mtp_device::DeviceError;
use mtp_quirks::QuirkFileError;
use mtp_scheduler::SchedulerError;
use mtp_session::SessionError;
use mtp_store::StoreError;
use mtp_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Quirk(#[from] QuirkFileError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("config error: {0}")]
    Config(String),
    #[error("device {0} is not connected")]
    NotConnected(String),
    #[error("{0} is not supported by this device")]
    NotSupported(&'static str),
    #[error("transfer {0} not found in the journal")]
    TransferNotFound(String),
}
