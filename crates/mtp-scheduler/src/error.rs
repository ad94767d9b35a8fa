//! `mtp-scheduler` error composition (spec §7).

use mtp_device::DeviceError;
use mtp_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
